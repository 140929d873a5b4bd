//! Run-level error taxonomy.

use edgeprov_core::db::DatabaseError;
use thiserror::Error;

use crate::cert_provisioning::CertificateError;
use crate::config_gen::ConfigWriteError;
use crate::connectivity::ConnectivityError;
use crate::lock::LockError;

/// Exit status for connectivity failures.
pub const EXIT_CONNECTIVITY: u8 = 2;
/// Exit status for every other failure.
pub const EXIT_FAILURE: u8 = 1;

/// Terminal failure of a provisioning run.
///
/// `Display` names the failing collaborator and is published verbatim as the
/// status document's `error_details`.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("DatabaseError: {0}")]
    Database(#[from] DatabaseError),

    #[error("ConnectivityError: {0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("CertificateError: {0}")]
    Certificate(#[from] CertificateError),

    #[error("ConfigWriteError: {0}")]
    ConfigWrite(#[from] ConfigWriteError),

    #[error("LockError: {0}")]
    Lock(#[from] LockError),
}

impl ProvisionError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Connectivity(_) => EXIT_CONNECTIVITY,
            _ => EXIT_FAILURE,
        }
    }

    /// Short summary used as the ERROR status message.
    pub const fn summary(&self) -> &'static str {
        match self {
            Self::Database(_) => "Failed to read device configuration",
            Self::Connectivity(_) => "Cloud endpoints are unreachable",
            Self::Certificate(_) => "Failed to provision device certificates",
            Self::ConfigWrite(_) => "Failed to write runtime configuration",
            Self::Lock(_) => "Another provisioning run is in progress",
        }
    }
}
