//! Atomic file replacement.
//!
//! Every durable artifact the agent produces (status document, runtime
//! configuration, certificate bundle) goes through [`write_atomic`]: the
//! content is rendered into a temporary file in the destination directory,
//! flushed to disk and renamed over the target. Readers observe either the
//! previous file or the new one, never a torn write.

use std::io::Write;
use std::path::Path;

/// Permission bits for files that must stay private to the owning user.
pub const OWNER_ONLY_MODE: u32 = 0o600;
/// Permission bits for files that other local processes are expected to read.
pub const WORLD_READABLE_MODE: u32 = 0o644;

/// Atomically replace `path` with `contents`.
///
/// The temporary file is created with `mode` already applied (subject to the
/// process umask), so the content never exists on disk with wider
/// permissions than requested.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = tempfile::Builder::new();
    builder.prefix(".edgeprov-").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(path = %path.display(), bytes = contents.len(), "File replaced atomically");
    Ok(())
}

/// Permission bits (`mode & 0o777`) of an existing file.
#[cfg(unix)]
pub fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o777)
}

/// True when no group or other permission bit is set.
pub const fn is_owner_only(mode: u32) -> bool {
    mode & 0o077 == 0
}
