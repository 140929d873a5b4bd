//! Filesystem layout of a provisioned runtime root.

use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = "config";
pub const CERTS_DIR: &str = "certs";
pub const CONFIG_FILE: &str = "config.yaml";
pub const LOCK_FILE: &str = ".edgeprov.lock";
/// Working directories the runtime expects beside `config/` and `certs/`.
pub const RUNTIME_DIRS: [&str; 5] = ["logs", "work", "packages", "deployments", "ggc-root"];

/// Paths under the runtime root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    root: PathBuf,
}

impl RuntimeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.root.join(CERTS_DIR)
    }

    /// The runtime configuration document.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Directories created alongside the configuration document.
    pub fn runtime_dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        std::iter::once(self.config_dir())
            .chain(RUNTIME_DIRS.iter().map(|name| self.root.join(name)))
    }
}
