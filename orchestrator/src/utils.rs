//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Derive the region from a zone name by stripping the trailing zone letter
/// (`us-central1-a` -> `us-central1`). Returns the input unchanged when it
/// does not end in a single-letter suffix.
pub fn region_from_zone(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, suffix))
            if suffix.len() == 1 && suffix.chars().all(|c| c.is_ascii_lowercase()) =>
        {
            region.to_string()
        }
        _ => zone.to_string(),
    }
}

/// Mask an API key for display and persistence, keeping only the edges.
pub fn mask_api_key(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
