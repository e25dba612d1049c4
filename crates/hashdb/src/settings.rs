//! Settings (§4.8 / §6): the on-disk configuration document, read with
//! version gating and written atomically with a `.old` backup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CURRENT_SETTINGS_VERSION: u32 = 3;
pub const MIN_SUPPORTED_SETTINGS_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub settings_version: u32,
    pub sector_size: u32,
    pub block_size: u32,
    pub max_id_offset_pairs: u32,
    pub hash_prefix_bits: u32,
    pub hash_suffix_bytes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settings_version: CURRENT_SETTINGS_VERSION,
            sector_size: 512,
            block_size: 512,
            max_id_offset_pairs: 100_000,
            hash_prefix_bits: 28,
            hash_suffix_bytes: 3,
        }
    }
}

/// Reads `settings.json` from `dir`, rejecting a `settings_version` older
/// than `MIN_SUPPORTED_SETTINGS_VERSION` without mutating anything.
pub fn read_settings(dir: &Path) -> Result<Settings> {
    let path = dir.join("settings.json");
    let bytes = std::fs::read(&path)?;
    let settings: Settings = serde_json::from_slice(&bytes)?;
    if settings.settings_version < MIN_SUPPORTED_SETTINGS_VERSION {
        return Err(Error::IncompatibleSettingsVersion {
            found: settings.settings_version,
            expected: MIN_SUPPORTED_SETTINGS_VERSION,
        });
    }
    Ok(settings)
}

/// Writes `settings.json`, moving any existing file to
/// `_old_settings.json` first so readers either observe the previous
/// settings or the new settings (I6), never a torn write.
pub fn write_settings(dir: &Path, settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("settings.json");
    let backup_path = dir.join("_old_settings.json");
    if path.exists() {
        std::fs::rename(&path, &backup_path)?;
    }
    let tmp_path = dir.join(".settings.json.tmp");
    std::fs::write(&tmp_path, serde_json::to_vec(settings)?)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}
