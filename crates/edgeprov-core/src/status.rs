//! Provisioning status document and its single writer.
//!
//! The status document is a small JSON file polled by an external
//! supervisor. [`StatusReporter`] owns it for the duration of a run: every
//! publish renders a complete document and atomically replaces the previous
//! one, so a concurrent reader always parses a whole document.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};
use crate::fs::{WORLD_READABLE_MODE, write_atomic};

/// Externally observable provisioning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningState {
    NotStarted,
    CheckingProvisioning,
    CheckingConnectivity,
    ReadingDatabase,
    GeneratingConfig,
    Completed,
    AlreadyProvisioned,
    Error,
}

impl ProvisioningState {
    /// Wire name used in the status document.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::CheckingProvisioning => "CHECKING_PROVISIONING",
            Self::CheckingConnectivity => "CHECKING_CONNECTIVITY",
            Self::ReadingDatabase => "READING_DATABASE",
            Self::GeneratingConfig => "GENERATING_CONFIG",
            Self::Completed => "COMPLETED",
            Self::AlreadyProvisioned => "ALREADY_PROVISIONED",
            Self::Error => "ERROR",
        }
    }

    /// Nominal progress on entry. `None` for `Error`, which keeps whatever
    /// progress the run had reached.
    pub const fn progress(self) -> Option<u8> {
        match self {
            Self::NotStarted => Some(0),
            Self::CheckingProvisioning => Some(20),
            Self::CheckingConnectivity => Some(40),
            Self::ReadingDatabase => Some(60),
            Self::GeneratingConfig => Some(80),
            Self::Completed | Self::AlreadyProvisioned => Some(100),
            Self::Error => None,
        }
    }

    /// Message published when the caller does not supply one.
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::NotStarted => "Provisioning has not started",
            Self::CheckingProvisioning => "Checking whether the device is already provisioned",
            Self::CheckingConnectivity => "Checking connectivity to cloud endpoints",
            Self::ReadingDatabase => "Reading device configuration from database",
            Self::GeneratingConfig => "Materializing certificates and runtime configuration",
            Self::Completed => "Provisioning completed successfully",
            Self::AlreadyProvisioned => "Device is already provisioned",
            Self::Error => "An error occurred during provisioning",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyProvisioned | Self::Error)
    }

    /// Terminal states that map to a zero exit status.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyProvisioned)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete status document as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub status: ProvisioningState,
    pub message: String,
    pub timestamp: String,
    pub progress_percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Single writer of the status document.
#[derive(Debug)]
pub struct StatusReporter {
    path: PathBuf,
    last_progress: u8,
    published: Vec<StatusDocument>,
}

impl StatusReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_progress: 0,
            published: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Documents successfully written so far, oldest first.
    pub fn published(&self) -> &[StatusDocument] {
        &self.published
    }

    /// Publish a complete status document, replacing the previous one.
    ///
    /// Progress never moves backwards and only reaches 100 in a successful
    /// terminal state. `error_details` is only kept for [`ProvisioningState::Error`],
    /// where it is always non-empty.
    pub fn publish(
        &mut self,
        state: ProvisioningState,
        message: Option<&str>,
        progress: Option<u8>,
        error_details: Option<&str>,
    ) -> Result<()> {
        let document = self.render(state, message, progress, error_details);
        self.last_progress = document.progress_percentage;

        let mut json = serde_json::to_vec_pretty(&document)?;
        json.push(b'\n');

        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Status(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        write_atomic(&self.path, &json, WORLD_READABLE_MODE)
            .map_err(|e| Error::Status(format!("{}: {e}", self.path.display())))?;

        tracing::info!(
            status = %document.status,
            progress = document.progress_percentage,
            "{}",
            document.message
        );
        self.published.push(document);
        Ok(())
    }

    /// Publish entry into `state` with its default message and progress.
    pub fn enter(&mut self, state: ProvisioningState) -> Result<()> {
        self.publish(state, None, None, None)
    }

    /// Publish the terminal `ERROR` state.
    pub fn fail(&mut self, message: &str, details: &str) -> Result<()> {
        self.publish(ProvisioningState::Error, Some(message), None, Some(details))
    }

    fn render(
        &self,
        state: ProvisioningState,
        message: Option<&str>,
        progress: Option<u8>,
        error_details: Option<&str>,
    ) -> StatusDocument {
        let requested = progress
            .or_else(|| state.progress())
            .unwrap_or(self.last_progress)
            .min(100);
        let ceiling = if state.is_success() { 100 } else { 99 };
        let progress_percentage = requested.max(self.last_progress).min(ceiling);

        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| state.default_message())
            .to_string();

        let error_details = (state == ProvisioningState::Error).then(|| {
            error_details
                .filter(|d| !d.trim().is_empty())
                .map_or_else(|| message.clone(), str::to_string)
        });

        StatusDocument {
            status: state,
            message,
            timestamp: now_rfc3339(),
            progress_percentage,
            error_details,
        }
    }
}

/// Read and parse a status document.
pub fn read_status(path: &Path) -> Result<StatusDocument> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
