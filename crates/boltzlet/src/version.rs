//! Version information for boltzlet.

/// Boltzlet version from Cargo.toml
pub const BOLTZLET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub boltzlet: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            boltzlet: BOLTZLET_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
