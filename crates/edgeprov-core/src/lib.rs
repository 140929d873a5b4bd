//! edgeprov core library
//!
//! Shared functionality for the provisioning agent:
//! - Hierarchical agent configuration
//! - Read-only access helpers for the device database
//! - Atomic file replacement
//! - Status document publishing
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod fs;
pub mod status;
pub mod tracing_init;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use status::{ProvisioningState, StatusDocument, StatusReporter};
