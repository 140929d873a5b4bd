//! Hardware identifier detection.

use std::path::Path;

/// MAC address of the primary wired interface.
pub const PRIMARY_MAC_PATH: &str = "/sys/class/net/eth0/address";

/// Detect this device's identifier: the primary MAC without separators,
/// falling back to the hostname.
pub fn detect_device_identifier() -> Option<String> {
    mac_from_file(Path::new(PRIMARY_MAC_PATH)).or_else(hostname)
}

/// Lowercase and strip `:` / `-` separators so `AA:BB:...` and `aabb...` compare equal.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn mac_from_file(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mac = normalize_identifier(&raw);
    if mac.is_empty() || mac.chars().all(|c| c == '0') {
        tracing::debug!(path = %path.display(), "No usable MAC address");
        return None;
    }
    Some(mac)
}

fn hostname() -> Option<String> {
    let name = nix::unistd::gethostname().ok()?.into_string().ok()?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}
