//! A content-addressed block-hash database for digital-forensics triage:
//! ingests fixed-size block hashes extracted from known source files and
//! answers, for a candidate block hash encountered during a scan, which
//! known sources contain it.
//!
//! The storage engine is five independent libmdbx environments (one per
//! store, see `stores`) plus a flat-file Bloom filter (`bloom`), composed
//! behind two session facades: `import_manager::ImportManager` for
//! writers and `scan_manager::ScanManager` for readers. `Hashdb` is the
//! top-level entry point that creates/opens a hashdb directory and hands
//! out sessions.

pub mod bloom;
pub mod changes;
pub mod error;
pub mod import_manager;
pub mod log;
pub mod scan_manager;
pub mod scan_stream;
pub mod settings;
pub mod stores;
pub mod timestamp;
pub mod varint;

use std::path::{Path, PathBuf};

pub use changes::Changes;
pub use error::{Error, Result};
pub use import_manager::ImportManager;
pub use scan_manager::ScanManager;
pub use settings::Settings;

use bloom::BloomFilter;
use log::AuditLog;

/// A hashdb directory: `settings.json`, `_old_settings.json`, the five
/// store subdirectories, `bloom_filter`, and `log.xml` (§6).
pub struct Hashdb {
    dir: PathBuf,
    settings: Settings,
}

impl Hashdb {
    /// Creates a new hashdb directory with the given settings. Fails if
    /// the directory already contains a `settings.json`.
    pub fn create(dir: &Path, settings: Settings, command_string: &str) -> Result<Self> {
        if dir.join("settings.json").exists() {
            return Err(Error::AlreadyExists(dir.display().to_string()));
        }
        settings::write_settings(dir, &settings)?;
        let audit_log = AuditLog::open(dir)?;
        audit_log.log_open(command_string)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
        })
    }

    /// Opens an existing hashdb directory, validating its settings
    /// record (§7: configuration errors report without mutation).
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::NotAHashdbDirectory(dir.display().to_string()));
        }
        let settings = settings::read_settings(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens a single writer session. At most one may be open against
    /// this directory at a time (§5); the caller is responsible for not
    /// opening a second one concurrently.
    pub fn import_manager(&self) -> Result<ImportManager> {
        ImportManager::open(&self.dir, &self.settings, "import")
    }

    pub fn scan_manager(&self) -> Result<ScanManager> {
        ScanManager::open(&self.dir, &self.settings)
    }

    /// Rebuilds the Bloom filter from scratch over every block hash
    /// currently in the hash-data store, per §4.6's `M_hash_size`/
    /// `k_hash_functions` constraints.
    pub fn rebuild_bloom(
        &self,
        bloom_used: bool,
        m_hash_size: u32,
        k_hash_functions: u32,
        command_string: &str,
    ) -> Result<()> {
        let mut filter = BloomFilter::new(m_hash_size, k_hash_functions, bloom_used)?;
        if bloom_used {
            let scan = self.scan_manager()?;
            let mut cursor = scan.hash_begin()?;
            while let Some(hash) = cursor {
                filter.add(&hash);
                cursor = scan.hash_next(&hash)?;
            }
        }
        filter.save(&self.dir.join("bloom_filter"))?;
        let audit_log = AuditLog::open(&self.dir)?;
        audit_log.log_settings_rewrite(command_string)?;
        Ok(())
    }
}

/// `create_hashdb(dir, settings, command_string)` from §6's library
/// surface: a thin free function wrapping `Hashdb::create` for callers
/// that don't want to hold the handle.
pub fn create_hashdb(dir: &Path, settings: Settings, command_string: &str) -> Result<()> {
    Hashdb::create(dir, settings, command_string)?;
    Ok(())
}

/// `read_settings(dir)` from §6's library surface.
pub fn read_settings(dir: &Path) -> Result<Settings> {
    settings::read_settings(dir)
}
