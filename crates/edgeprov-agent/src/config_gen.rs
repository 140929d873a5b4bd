//! Runtime configuration generation.

use std::path::{Path, PathBuf};

use edgeprov_core::config::RuntimeConfig;
use edgeprov_core::fs::{WORLD_READABLE_MODE, write_atomic};
use thiserror::Error;
use tracing::info;

use crate::cert_provisioning::CertificateBundle;
use crate::device::DeviceRecord;
use crate::layout::RuntimeLayout;
use crate::templates::{RuntimeConfigValues, runtime_config_yaml};

#[derive(Debug, Error)]
pub enum ConfigWriteError {
    #[error("cannot render runtime configuration: {0}")]
    Render(String),

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// The configuration that was written, for logging and the final status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub path: PathBuf,
    pub thing_name: String,
    pub iot_data_endpoint: String,
    pub nucleus_version: String,
}

/// Renders `config.yaml` from a device record and its certificate bundle.
#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    layout: RuntimeLayout,
    default_version: String,
}

impl ConfigGenerator {
    pub fn new(layout: &RuntimeLayout, runtime: &RuntimeConfig) -> Self {
        Self {
            layout: layout.clone(),
            default_version: runtime.default_version.clone(),
        }
    }

    /// Render and atomically write the runtime configuration to `output_path`.
    ///
    /// Missing runtime working directories are created. Existing files are
    /// left alone except for the document itself, which is replaced.
    pub fn render(
        &self,
        record: &DeviceRecord,
        bundle: &CertificateBundle,
        output_path: &Path,
    ) -> Result<ProvisioningConfig, ConfigWriteError> {
        let nucleus_version = record.nucleus_version_or(&self.default_version);
        let values = RuntimeConfigValues {
            record,
            certificate_path: utf8(&bundle.certificate)?,
            private_key_path: utf8(&bundle.private_key)?,
            root_ca_path: utf8(&bundle.root_ca)?,
            root_path: utf8(self.layout.root())?,
            nucleus_version,
        };
        let yaml = runtime_config_yaml(&values);

        let write_error = |path: &Path, e: std::io::Error| ConfigWriteError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        for dir in self.layout.runtime_dirs() {
            create_runtime_dir(&dir).map_err(|e| write_error(&dir, e))?;
        }
        if let Some(dir) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| write_error(dir, e))?;
        }
        write_atomic(output_path, yaml.as_bytes(), WORLD_READABLE_MODE)
            .map_err(|e| write_error(output_path, e))?;

        info!(
            path = %output_path.display(),
            thing_name = %record.thing_name,
            nucleus_version,
            "Runtime configuration written"
        );
        Ok(ProvisioningConfig {
            path: output_path.to_path_buf(),
            thing_name: record.thing_name.clone(),
            iot_data_endpoint: record.iot_endpoint.to_string(),
            nucleus_version: nucleus_version.to_string(),
        })
    }
}

fn create_runtime_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir)
}

fn utf8(path: &Path) -> Result<&str, ConfigWriteError> {
    path.to_str()
        .ok_or_else(|| ConfigWriteError::Render(format!("path is not UTF-8: {}", path.display())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::device::tests::sample_record;

    fn generator(root: &Path) -> (RuntimeLayout, ConfigGenerator) {
        let layout = RuntimeLayout::new(root);
        let generator = ConfigGenerator::new(&layout, &RuntimeConfig::default());
        (layout, generator)
    }

    #[test]
    fn writes_document_with_bundle_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, generator) = generator(dir.path());
        let bundle = CertificateBundle::for_thing(&layout.certs_dir(), "edge-01");

        let written = generator
            .render(&sample_record(), &bundle, &layout.config_file())
            .unwrap();

        assert_eq!(written.path, layout.config_file());
        assert_eq!(written.iot_data_endpoint, "iot.example:8443");
        assert_eq!(written.nucleus_version, "2.9.0");

        let yaml = std::fs::read_to_string(layout.config_file()).unwrap();
        assert!(yaml.contains("thingName: edge-01"));
        assert!(yaml.contains("iotDataEndpoint: iot.example:8443"));
        assert!(yaml.contains(&format!("privateKeyPath: {}", bundle.private_key.display())));
        assert!(yaml.contains(&format!("rootpath: {}", dir.path().display())));
    }

    #[test]
    fn record_version_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, generator) = generator(dir.path());
        let bundle = CertificateBundle::for_thing(&layout.certs_dir(), "edge-01");
        let mut record = sample_record();
        record.nucleus_version = Some("2.12.1".into());

        let written = generator
            .render(&record, &bundle, &layout.config_file())
            .unwrap();
        assert_eq!(written.nucleus_version, "2.12.1");
    }

    #[test]
    fn rerender_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, generator) = generator(dir.path());
        let bundle = CertificateBundle::for_thing(&layout.certs_dir(), "edge-01");
        std::fs::create_dir_all(layout.config_dir()).unwrap();
        std::fs::write(layout.config_file(), "stale: true\n").unwrap();
        std::fs::write(layout.config_dir().join("keep.yaml"), "untouched\n").unwrap();

        generator
            .render(&sample_record(), &bundle, &layout.config_file())
            .unwrap();

        let yaml = std::fs::read_to_string(layout.config_file()).unwrap();
        assert!(!yaml.contains("stale"));
        assert_eq!(
            std::fs::read_to_string(layout.config_dir().join("keep.yaml")).unwrap(),
            "untouched\n"
        );
    }

    #[test]
    fn creates_runtime_working_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, generator) = generator(&dir.path().join("v2"));
        let bundle = CertificateBundle::for_thing(&layout.certs_dir(), "edge-01");

        generator
            .render(&sample_record(), &bundle, &layout.config_file())
            .unwrap();

        for name in ["logs", "work", "packages", "deployments", "ggc-root", "config"] {
            assert!(layout.root().join(name).is_dir(), "{name}");
        }
        #[cfg(unix)]
        {
            let mode = edgeprov_core::fs::file_mode(&layout.root().join("ggc-root")).unwrap();
            assert_eq!(mode & 0o007, 0, "mode {mode:o}");
        }
    }

    #[test]
    fn unwritable_output_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, generator) = generator(dir.path());
        let bundle = CertificateBundle::for_thing(&layout.certs_dir(), "edge-01");
        std::fs::write(layout.config_dir(), b"file in the way").unwrap();

        let err = generator
            .render(&sample_record(), &bundle, &layout.config_file())
            .unwrap_err();
        assert!(matches!(err, ConfigWriteError::Write { .. }));
    }
}
