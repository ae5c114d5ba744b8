//! Supported protocol versions.
//!
//! The hub and forwarder contracts evolve together under a semantic protocol
//! version. The service node is compiled against a fixed set of versions and
//! refuses to start when configured with any other.

use semver::Version;

/// Protocol versions this build can operate against.
pub const SUPPORTED_PROTOCOL_VERSIONS: [(u64, u64, u64); 2] = [(0, 1, 0), (0, 2, 0)];

/// Returns the latest supported protocol version.
pub fn latest_protocol_version() -> Version {
    supported_protocol_versions()
        .into_iter()
        .max()
        .expect("the supported set is non-empty")
}

/// Returns all supported protocol versions, sorted ascending.
pub fn supported_protocol_versions() -> Vec<Version> {
    let mut versions: Vec<Version> = SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .map(|(major, minor, patch)| Version::new(*major, *minor, *patch))
        .collect();
    versions.sort();
    versions
}

/// Checks whether `version` is a supported protocol version.
pub fn is_supported_protocol_version(version: &Version) -> bool {
    supported_protocol_versions().contains(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_is_supported() {
        assert!(is_supported_protocol_version(&latest_protocol_version()));
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(!is_supported_protocol_version(&Version::new(9, 9, 9)));
    }

    #[test]
    fn versions_are_sorted() {
        let versions = supported_protocol_versions();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }
}
