//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes:
//!
//! ```json
//! { "version": "3.4.0.3", "compression_quality": 0.25 }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::LibraryVersion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Version stamped on every chunk written.
    pub version:                 LibraryVersion,
    /// Trust nothing but the backing stream when reading chunk bodies.
    pub ignore_block_regions:    bool,
    /// 0 silences warnings, 1 reports data loss, 2 adds notices.
    pub warning_level:           u8,
    /// Drop notices even when `warning_level` allows them.
    pub ignore_secure_warnings:  bool,
    /// Convert pixel data a backend cannot store instead of failing.
    pub fix_incompatible_rasters: bool,
    /// 0.0..=1.0; below 0.5 alpha images may compress to DXT1.
    pub compression_quality:     f32,
    /// Upper bound for generated mip chains, base level included.
    pub max_mipmaps:             u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version:                  LibraryVersion::default(),
            ignore_block_regions:     false,
            warning_level:            1,
            ignore_secure_warnings:   true,
            fix_incompatible_rasters: true,
            compression_quality:      1.0,
            max_mipmaps:              32,
        }
    }
}

impl EngineConfig {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_json(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let cfg = EngineConfig::from_json(br#"{ "version": "3.4.0.3", "warning_level": 0 }"#).unwrap();
        assert_eq!(cfg.version, LibraryVersion::new(3, 4, 0, 3));
        assert_eq!(cfg.warning_level, 0);
        assert_eq!(cfg.max_mipmaps, 32);
        assert!(cfg.fix_incompatible_rasters);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = EngineConfig { compression_quality: 0.25, ..EngineConfig::default() };
        let back = EngineConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
        assert!(EngineConfig::from_json(br#"{ "version": "2.0" }"#).is_err());
    }
}
