//! Detection of an existing installation under the runtime root.
//!
//! Read-only: nothing here touches the network or the device database.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cert_provisioning::{
    BundleVerdict, CERT_SUFFIX, CertificateBundle, KEY_SUFFIX, probe_bundle,
};
use crate::device::validate_thing_name;
use crate::layout::RuntimeLayout;
use crate::templates::parse_scalar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationVerdict {
    /// Nothing provisioned yet.
    Missing,
    /// A complete configuration referencing a valid certificate bundle.
    Valid {
        thing_name: String,
        bundle: CertificateBundle,
    },
    /// Artifacts exist but are incomplete or unreadable.
    Corrupt(String),
}

/// Inspect the runtime root for a previous successful run.
pub fn probe_installation(layout: &RuntimeLayout) -> InstallationVerdict {
    let config_path = layout.config_file();

    if config_path.symlink_metadata().is_err() {
        return probe_bundle_without_config(&layout.certs_dir(), &config_path);
    }

    let content = match fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            return InstallationVerdict::Corrupt(format!("{}: {e}", config_path.display()));
        }
    };
    match verify_config(&content) {
        Ok((thing_name, bundle)) => match probe_bundle(&bundle) {
            BundleVerdict::Valid => InstallationVerdict::Valid { thing_name, bundle },
            BundleVerdict::Missing => InstallationVerdict::Corrupt(format!(
                "{} references certificates that do not exist",
                config_path.display()
            )),
            BundleVerdict::Corrupt(reason) => InstallationVerdict::Corrupt(reason),
        },
        Err(reason) => InstallationVerdict::Corrupt(format!("{}: {reason}", config_path.display())),
    }
}

/// A run that stopped after writing its bundle but before `config.yaml`
/// leaves one complete bundle behind. That counts as not yet provisioned so
/// the next run reuses the bundle and writes the configuration.
fn probe_bundle_without_config(certs_dir: &Path, config_path: &Path) -> InstallationVerdict {
    if !dir_has_artifacts(certs_dir) {
        return InstallationVerdict::Missing;
    }

    if let [thing_name] = bundle_thing_names(certs_dir).as_slice() {
        match probe_bundle(&CertificateBundle::for_thing(certs_dir, thing_name)) {
            BundleVerdict::Valid => {
                debug!(%thing_name, "Found certificate bundle without configuration");
                return InstallationVerdict::Missing;
            }
            BundleVerdict::Corrupt(reason) => return InstallationVerdict::Corrupt(reason),
            BundleVerdict::Missing => {}
        }
    }
    InstallationVerdict::Corrupt(format!(
        "{} holds certificates but {} is missing",
        certs_dir.display(),
        config_path.display()
    ))
}

/// Thing names of the certificates and keys in `certs_dir`.
fn bundle_thing_names(certs_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(certs_dir) else {
        return Vec::new();
    };
    let names: BTreeSet<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let stem = name
                .strip_suffix(CERT_SUFFIX)
                .or_else(|| name.strip_suffix(KEY_SUFFIX))?;
            validate_thing_name(stem).ok()?;
            Some(stem.to_string())
        })
        .collect();
    names.into_iter().collect()
}

fn verify_config(content: &str) -> Result<(String, CertificateBundle), String> {
    if content.trim().is_empty() {
        return Err("file is empty".into());
    }
    if !content.lines().any(|l| l.trim_end() == "services:") {
        return Err("no services section".into());
    }
    let system = section(content, "system");
    if system.is_empty() {
        return Err("no system section".into());
    }

    let field = |key: &str| {
        system
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| format!("system.{key} is missing"))
    };
    let thing_name = field("thingName")?;
    validate_thing_name(&thing_name)?;
    let bundle = CertificateBundle {
        certificate: PathBuf::from(field("certificateFilePath")?),
        private_key: PathBuf::from(field("privateKeyPath")?),
        root_ca: PathBuf::from(field("rootCaPath")?),
    };
    Ok((thing_name, bundle))
}

/// Scalar `key: value` pairs directly under a top-level `name:` mapping.
fn section(content: &str, name: &str) -> HashMap<String, String> {
    let header = format!("{name}:");
    let mut entries = HashMap::new();
    let mut inside = false;

    for line in content.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indented = line.starts_with(' ');
        if !indented {
            inside = line.trim_end() == header;
            continue;
        }
        if !inside || line.starts_with("    ") {
            continue;
        }
        if let Some((key, value)) = line.trim().split_once(':') {
            entries.insert(key.trim().to_string(), parse_scalar(value));
        }
    }
    entries
}

/// Anything besides leftovers of an interrupted atomic write.
fn dir_has_artifacts(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|entries| {
        entries.filter_map(Result::ok).any(|entry| {
            !entry
                .file_name()
                .to_string_lossy()
                .starts_with(".edgeprov-")
        })
    })
}
