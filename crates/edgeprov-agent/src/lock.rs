//! Exclusive run lock under the runtime root.
//!
//! Two runs against the same runtime root would race on the certificate
//! bundle and the configuration document, so the second one fails fast.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("another provisioning run holds {0}")]
    Held(PathBuf),
}

/// Held for the lifetime of the value; released on drop.
#[derive(Debug)]
pub struct RunLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without blocking. The lock file is never removed.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let open_error = |e: std::io::Error| LockError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(open_error)?;
        }

        let mut options = OpenOptions::new();
        options.create(true).truncate(false).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path).map_err(open_error)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                tracing::debug!(path = %path.display(), "Run lock acquired");
                Ok(Self {
                    _lock: lock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(LockError::Held(path.to_path_buf())),
            Err((_, errno)) => Err(LockError::Open {
                path: path.to_path_buf(),
                reason: errno.desc().to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
