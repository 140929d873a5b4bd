//! edgeprov agent library
//!
//! One-shot provisioning of an edge device: probe for an existing
//! installation, verify cloud reachability, load the device record, write the
//! certificate bundle and the runtime configuration, and publish progress to
//! the status document throughout.

pub mod cert_provisioning;
pub mod config_gen;
pub mod connectivity;
pub mod device;
pub mod error;
pub mod identity;
pub mod layout;
pub mod lock;
pub mod machine;
pub mod probe;
pub mod repository;
pub mod templates;

pub use error::ProvisionError;
pub use machine::{Provisioner, RunOutcome, provision};
