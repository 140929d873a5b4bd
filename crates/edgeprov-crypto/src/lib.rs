//! edgeprov identity material
//!
//! - **PEM checks**: cheap structural validation of certificate and key PEM
//!   text before it is written to disk
//! - **Certificates** (`certs` feature): local CA and device certificate
//!   generation for devices whose record carries no pre-issued material

#[cfg(feature = "certs")]
pub mod certs;
pub mod error;
pub mod pem;

pub use error::CryptoError;
pub use pem::{PemKind, has_pem_block};
