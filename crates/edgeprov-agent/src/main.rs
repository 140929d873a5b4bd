use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use edgeprov_agent::error::EXIT_FAILURE;
use edgeprov_core::config::load_config;
use edgeprov_core::tracing_init::{default_filter, init_tracing};
use edgeprov_core::{AgentConfig, StatusReporter};

/// Provision this edge device into a configured IoT runtime.
#[derive(Debug, Parser)]
#[command(name = "edgeprov-agent", version, about)]
struct Args {
    /// Device database (read-only)
    #[arg(short = 'd', long, env = "EDGEPROV_DB_PATH")]
    database_path: Option<PathBuf>,

    /// Runtime root receiving `config/` and `certs/`
    #[arg(short = 'g', long, env = "EDGEPROV_RUNTIME_ROOT")]
    runtime_root: Option<PathBuf>,

    /// Status document path
    #[arg(short = 's', long, env = "EDGEPROV_STATUS_FILE")]
    status_file: Option<PathBuf>,

    /// JSON settings file
    #[arg(short = 'c', long, env = "EDGEPROV_CONFIG")]
    config: Option<PathBuf>,

    /// Hardware identifier used to select the device record
    #[arg(long, env = "EDGEPROV_DEVICE_ID")]
    device_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "EDGEPROV_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn resolve(&self) -> Result<AgentConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(path) = &self.database_path {
            config.paths.database_path.clone_from(path);
        }
        if let Some(path) = &self.runtime_root {
            config.paths.runtime_root.clone_from(path);
        }
        if let Some(path) = &self.status_file {
            config.paths.status_file.clone_from(path);
        }
        if let Some(id) = self.device_id.as_deref().filter(|id| !id.is_empty()) {
            config.device_identifier = Some(id.to_string());
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Where to report a failure that happens before a config exists.
    fn fallback_status_file(&self) -> PathBuf {
        self.status_file
            .clone()
            .unwrap_or_else(|| AgentConfig::default().paths.status_file)
    }
}

/// Publish ERROR for a configuration the run cannot start with.
fn reject_configuration(status_file: PathBuf, err: &anyhow::Error) -> u8 {
    tracing::error!(error = %format!("{err:#}"), "Cannot start provisioning");
    let mut reporter = StatusReporter::new(status_file);
    if let Err(publish) = reporter.fail("Invalid configuration", &format!("ConfigError: {err:#}")) {
        tracing::error!(error = %publish, "Failed to publish ERROR status");
    }
    EXIT_FAILURE
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(default_filter(args.verbose), args.log_json);

    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => return ExitCode::from(reject_configuration(args.fallback_status_file(), &e)),
    };

    let outcome = edgeprov_agent::provision(&config).await;
    if outcome.status_degraded {
        tracing::warn!(
            status_file = %config.paths.status_file.display(),
            "Status document may be stale"
        );
    }
    ExitCode::from(outcome.exit_code())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use edgeprov_core::ProvisioningState;
    use edgeprov_core::status::read_status;
    use std::path::Path;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("edgeprov-agent").chain(args.iter().copied())).unwrap()
    }

    fn settings(dir: &Path, json: &str) -> String {
        let path = dir.join("settings.json");
        std::fs::write(&path, json).unwrap();
        path.display().to_string()
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = settings(
            dir.path(),
            r#"{"paths": {"database_path": "/file/devices.db", "runtime_root": "/file/v2"},
                "connectivity": {"attempts": 7}}"#,
        );

        let config = parse(&["-c", &file, "-d", "/flag/devices.db", "--device-id", "aabbccddeeff"])
            .resolve()
            .unwrap();

        assert_eq!(config.paths.database_path, Path::new("/flag/devices.db"));
        assert_eq!(config.paths.runtime_root, Path::new("/file/v2"));
        assert_eq!(config.connectivity.attempts, 7);
        assert_eq!(config.device_identifier.as_deref(), Some("aabbccddeeff"));
    }

    #[test]
    fn empty_device_id_flag_is_ignored() {
        let config = parse(&["-g", "/srv/gg", "--device-id", ""]).resolve().unwrap();
        assert_eq!(config.paths.runtime_root, Path::new("/srv/gg"));
        assert_eq!(config.device_identifier, None);
    }

    #[test]
    fn invalid_configuration_publishes_error_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = settings(dir.path(), r#"{"connectivity": {"attempts": 0}}"#);
        let status_file = dir.path().join("run").join("status.json");
        let args = parse(&["-c", &file, "-s", status_file.to_str().unwrap()]);

        let err = args.resolve().unwrap_err();
        assert_eq!(reject_configuration(args.fallback_status_file(), &err), 1);

        let doc = read_status(&status_file).unwrap();
        assert_eq!(doc.status, ProvisioningState::Error);
        let details = doc.error_details.unwrap();
        assert!(details.starts_with("ConfigError: "), "{details}");
        assert!(details.contains("attempts"), "{details}");
    }

    #[test]
    fn unreadable_settings_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = parse(&["-c", "/nonexistent/edgeprov.json"]);
        assert!(args.resolve().is_err());
        assert_eq!(args.fallback_status_file(), AgentConfig::default().paths.status_file);

        let status_file = dir.path().join("status.json");
        let args = parse(&["-c", "/nonexistent/edgeprov.json", "-s", status_file.to_str().unwrap()]);
        assert_eq!(args.fallback_status_file(), status_file);
    }
}
