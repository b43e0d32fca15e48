use crate::types::{RuntimeFingerprint, Slug};
use std::path::Path;

/// Number of hex characters kept from the blake3 digest.
pub const FINGERPRINT_LEN: usize = 12;

/// Compute the fingerprint of a runtime from its launcher path.
///
/// The caller is responsible for resolving symlinks first; two launchers that
/// resolve to the same file must produce the same fingerprint.
pub fn fingerprint_launcher(resolved_launcher: &Path) -> RuntimeFingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"launcher:");
    hasher.update(resolved_launcher.to_string_lossy().as_bytes());
    let hex = hasher.finalize().to_hex();
    RuntimeFingerprint::from_hex(hex[..FINGERPRINT_LEN].to_owned())
}

/// Directory name of the environment keyed by `(slug, fingerprint)`.
pub fn env_dir_name(slug: &Slug, fingerprint: &RuntimeFingerprint) -> String {
    format!("{slug}-{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint_launcher(Path::new("/opt/proton/experimental/proton"));
        let b = fingerprint_launcher(Path::new("/opt/proton/experimental/proton"));
        assert_eq!(a, b);
        assert_eq!(a.len(), FINGERPRINT_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_launchers_produce_different_fingerprints() {
        let a = fingerprint_launcher(Path::new("/opt/proton/experimental/proton"));
        let b = fingerprint_launcher(Path::new("/opt/proton/9.0/proton"));
        assert_ne!(a, b);
    }

    #[test]
    fn env_dir_name_joins_slug_and_fingerprint() {
        let slug = Slug::parse("portal").unwrap();
        let fp = RuntimeFingerprint::from("abcdef012345");
        assert_eq!(env_dir_name(&slug, &fp), "portal-abcdef012345");
    }
}
