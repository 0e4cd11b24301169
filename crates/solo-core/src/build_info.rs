//! Build-time metadata embedded by the build script.
//!
//! The version text answered for `--version`, both locally and to forwarded
//! requests, comes from here.

/// The git commit hash at build time (short form, `-dirty` when the tree had changes).
pub const GIT_HASH: &str = env!("SOLO_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("SOLO_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("SOLO_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name used in help output and the `%{appname}` placeholder.
pub const APP_NAME: &str = "solo";

/// Return a formatted version string including git hash and profile.
///
/// Example: `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_starts_with_version() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(GIT_HASH));
    }

    #[test]
    fn test_timestamp_is_numeric() {
        assert!(BUILD_TIMESTAMP.parse::<u64>().is_ok());
    }

    #[test]
    fn test_build_profile() {
        assert!(
            ["debug", "release"].contains(&BUILD_PROFILE),
            "unexpected profile {BUILD_PROFILE}"
        );
    }
}
