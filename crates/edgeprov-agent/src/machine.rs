//! The provisioning state machine.
//!
//! Drives the collaborators in a fixed order and publishes a status document
//! on entry to every state. Each stage hands its output to the next; the
//! only state carried across stages is the current [`ProvisioningState`].

use edgeprov_core::{AgentConfig, ProvisioningState, StatusDocument, StatusReporter};
use tracing::{debug, error, info, warn};

use crate::cert_provisioning::{
    CertificateError, CertificateIssuer, CertificateProvisioner, LocalIssuer,
};
use crate::config_gen::{ConfigGenerator, ProvisioningConfig};
use crate::connectivity::{ConnectivityChecker, ReachabilityCheck};
use crate::error::ProvisionError;
use crate::identity::detect_device_identifier;
use crate::layout::RuntimeLayout;
use crate::lock::{LockError, RunLock};
use crate::probe::{InstallationVerdict, probe_installation};
use crate::repository::{DeviceConfigRepository, DeviceSource};

use edgeprov_core::ProvisioningState as S;

/// Whether the state table allows moving from `from` to `to`.
pub const fn can_transition(from: ProvisioningState, to: ProvisioningState) -> bool {
    match (from, to) {
        (S::NotStarted, S::CheckingProvisioning)
        | (S::CheckingProvisioning, S::AlreadyProvisioned | S::CheckingConnectivity)
        | (S::CheckingConnectivity, S::ReadingDatabase)
        | (S::ReadingDatabase, S::GeneratingConfig)
        | (S::GeneratingConfig, S::Completed) => true,
        (from, S::Error) => !from.is_terminal(),
        _ => false,
    }
}

/// Result of one provisioning run.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: ProvisioningState,
    pub error: Option<ProvisionError>,
    /// Written configuration, on `COMPLETED` only.
    pub config: Option<ProvisioningConfig>,
    /// Every status document successfully published, oldest first.
    pub published: Vec<StatusDocument>,
    /// At least one status publication failed.
    pub status_degraded: bool,
}

impl RunOutcome {
    /// Process exit status mirroring the terminal state.
    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map_or(0, ProvisionError::exit_code)
    }

    /// Publish `ERROR` for a failure that happened before the machine could start.
    pub fn failed_before_start(mut reporter: StatusReporter, err: ProvisionError) -> Self {
        let status_degraded = !report_failure(&mut reporter, &err);
        Self {
            state: S::Error,
            error: Some(err),
            config: None,
            published: reporter.published().to_vec(),
            status_degraded,
        }
    }
}

/// Publish the terminal ERROR document. Returns `false` if that failed too.
fn report_failure(reporter: &mut StatusReporter, err: &ProvisionError) -> bool {
    error!(error = %err, "Provisioning failed");
    match reporter.fail(err.summary(), &err.to_string()) {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, status_file = %reporter.path().display(), "Failed to publish ERROR status");
            false
        }
    }
}

/// One provisioning run over substitutable collaborators.
pub struct Provisioner<'a, D, C, I> {
    config: &'a AgentConfig,
    layout: RuntimeLayout,
    reporter: StatusReporter,
    devices: D,
    connectivity: C,
    certificates: CertificateProvisioner<I>,
    generator: ConfigGenerator,
    state: ProvisioningState,
    status_degraded: bool,
}

impl<'a, D, C, I> Provisioner<'a, D, C, I>
where
    D: DeviceSource,
    C: ReachabilityCheck,
    I: CertificateIssuer,
{
    pub fn new(
        config: &'a AgentConfig,
        reporter: StatusReporter,
        devices: D,
        connectivity: C,
        issuer: I,
    ) -> Self {
        let layout = RuntimeLayout::new(&config.paths.runtime_root);
        Self {
            certificates: CertificateProvisioner::new(&layout, issuer, config.issuance.timeout()),
            generator: ConfigGenerator::new(&layout, &config.runtime),
            config,
            layout,
            reporter,
            devices,
            connectivity,
            state: S::NotStarted,
            status_degraded: false,
        }
    }

    /// Run to a terminal state. Never panics on collaborator failure; the
    /// outcome carries the error and the matching exit code.
    ///
    /// The run lock is held from before the first publication until after the
    /// terminal one. A run that finds the lock held leaves the status document
    /// to its holder.
    pub async fn run(mut self) -> RunOutcome {
        let lock = match RunLock::acquire(&self.layout.lock_file()) {
            Ok(lock) => lock,
            Err(err @ LockError::Held(_)) => {
                error!(error = %err, "Provisioning run rejected");
                return self.finish(S::Error, Some(err.into()), None);
            }
            Err(err) => return RunOutcome::failed_before_start(self.reporter, err.into()),
        };

        info!(
            runtime_root = %self.layout.root().display(),
            status_file = %self.reporter.path().display(),
            "Provisioning run started"
        );
        self.publish(S::NotStarted, None);

        let outcome = match self.drive().await {
            Ok((state, config)) => {
                info!(%state, "Provisioning run finished");
                self.finish(state, None, config)
            }
            Err(err) => {
                debug_assert!(can_transition(self.state, S::Error));
                self.state = S::Error;
                if !report_failure(&mut self.reporter, &err) {
                    self.status_degraded = true;
                }
                self.finish(S::Error, Some(err), None)
            }
        };
        debug!(path = %lock.path().display(), "Run lock released");
        drop(lock);
        outcome
    }

    async fn drive(
        &mut self,
    ) -> Result<(ProvisioningState, Option<ProvisioningConfig>), ProvisionError> {
        self.transition(S::CheckingProvisioning, None);

        match probe_installation(&self.layout) {
            InstallationVerdict::Valid { thing_name, bundle } => {
                info!(
                    %thing_name,
                    certificate = %bundle.certificate.display(),
                    "Existing installation is valid"
                );
                let message = format!("Device {thing_name} is already provisioned");
                self.transition(S::AlreadyProvisioned, Some(&message));
                return Ok((S::AlreadyProvisioned, None));
            }
            InstallationVerdict::Corrupt(reason) => {
                warn!(%reason, "Existing installation is incomplete");
                return Err(CertificateError::Corrupt(reason).into());
            }
            InstallationVerdict::Missing => debug!("No existing installation"),
        }

        self.transition(S::CheckingConnectivity, None);
        self.connectivity
            .check_reachable(&self.config.connectivity.endpoints)
            .await?;

        self.transition(S::ReadingDatabase, None);
        let record = self.devices.load_device_record().await?;

        let message = format!("Provisioning thing {}", record.thing_name);
        self.transition(S::GeneratingConfig, Some(&message));
        let bundle = self.certificates.ensure_provisioned(&record).await?;
        let written = self
            .generator
            .render(&record, &bundle, &self.layout.config_file())?;

        let message = format!(
            "Provisioned thing {} for endpoint {}",
            written.thing_name, written.iot_data_endpoint
        );
        self.transition(S::Completed, Some(&message));
        Ok((S::Completed, Some(written)))
    }

    fn transition(&mut self, to: ProvisioningState, message: Option<&str>) {
        debug_assert!(
            can_transition(self.state, to),
            "illegal transition {} -> {to}",
            self.state
        );
        self.state = to;
        self.publish(to, message);
    }

    /// Publication failures are logged and the run continues.
    fn publish(&mut self, state: ProvisioningState, message: Option<&str>) {
        if let Err(e) = self.reporter.publish(state, message, None, None) {
            warn!(%state, error = %e, "Failed to publish status");
            self.status_degraded = true;
        }
    }

    fn finish(
        self,
        state: ProvisioningState,
        error: Option<ProvisionError>,
        config: Option<ProvisioningConfig>,
    ) -> RunOutcome {
        RunOutcome {
            state,
            error,
            config,
            published: self.reporter.published().to_vec(),
            status_degraded: self.status_degraded,
        }
    }
}

/// Run provisioning with the production collaborators.
pub async fn provision(config: &AgentConfig) -> RunOutcome {
    let reporter = StatusReporter::new(&config.paths.status_file);
    let connectivity = match ConnectivityChecker::new(&config.connectivity) {
        Ok(checker) => checker,
        Err(e) => return RunOutcome::failed_before_start(reporter, e.into()),
    };

    let identifier = config
        .device_identifier
        .clone()
        .or_else(detect_device_identifier);
    debug!(identifier = ?identifier, "Device identifier");

    let devices = DeviceConfigRepository::new(config, identifier);
    let issuer = LocalIssuer::from_config(&config.issuance);
    Provisioner::new(config, reporter, devices, connectivity, issuer)
        .run()
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const ALL: [ProvisioningState; 8] = [
        S::NotStarted,
        S::CheckingProvisioning,
        S::CheckingConnectivity,
        S::ReadingDatabase,
        S::GeneratingConfig,
        S::Completed,
        S::AlreadyProvisioned,
        S::Error,
    ];

    #[test]
    fn happy_path_is_allowed_in_order() {
        let path = [
            S::NotStarted,
            S::CheckingProvisioning,
            S::CheckingConnectivity,
            S::ReadingDatabase,
            S::GeneratingConfig,
            S::Completed,
        ];
        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(can_transition(S::CheckingProvisioning, S::AlreadyProvisioned));
    }

    #[test]
    fn error_reachable_from_every_non_terminal_state() {
        for state in ALL {
            assert_eq!(can_transition(state, S::Error), !state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn terminal_states_are_final_and_no_skipping() {
        for to in ALL {
            for from in [S::Completed, S::AlreadyProvisioned, S::Error] {
                assert!(!can_transition(from, to), "{from} -> {to}");
            }
        }
        assert!(!can_transition(S::NotStarted, S::ReadingDatabase));
        assert!(!can_transition(S::CheckingConnectivity, S::AlreadyProvisioned));
        assert!(!can_transition(S::ReadingDatabase, S::Completed));
    }

    #[test]
    fn failed_before_start_publishes_error() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = StatusReporter::new(dir.path().join("status.json"));
        let err = ProvisionError::from(crate::connectivity::ConnectivityError::Client("tls".into()));

        let outcome = RunOutcome::failed_before_start(reporter, err);
        assert_eq!(outcome.state, S::Error);
        assert_eq!(outcome.exit_code(), 2);
        assert!(!outcome.status_degraded);
        let last = outcome.published.last().unwrap();
        assert_eq!(last.status, S::Error);
        assert!(last.error_details.as_deref().is_some_and(|d| d.contains("tls")));
    }
}
