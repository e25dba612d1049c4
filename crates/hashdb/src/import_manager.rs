//! Import facade (§6 library surface): the public writer-session entry
//! point composing all five stores plus the Bloom filter behind the
//! fixed lock order from §5 (hash-data → prefilter → source-id →
//! source-data → source-name).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::bloom::BloomFilter;
use crate::changes::Changes;
use crate::error::Result;
use crate::log::AuditLog;
use crate::settings::Settings;
use crate::stores::hash_data::HashDataStore;
use crate::stores::prefilter::{PrefilterParams, PrefilterStore};
use crate::stores::source_data::{SourceData, SourceDataStore};
use crate::stores::source_id::SourceIdStore;
use crate::stores::source_name::SourceNameStore;

pub struct ImportManager {
    hash_data: HashDataStore,
    prefilter: PrefilterStore,
    source_id: SourceIdStore,
    source_data: SourceDataStore,
    source_name: SourceNameStore,
    bloom: Mutex<Option<BloomFilter>>,
    bloom_path: PathBuf,
    audit_log: AuditLog,
    command: String,
    changes: Mutex<Changes>,
    finished: AtomicBool,
}

impl ImportManager {
    pub(crate) fn open(dir: &Path, settings: &Settings, command: &str) -> Result<Self> {
        let bloom_path = dir.join("bloom_filter");
        let bloom = if bloom_path.exists() {
            Some(BloomFilter::load(&bloom_path)?)
        } else {
            None
        };
        let audit_log = AuditLog::open_checking_previous_session(dir)?;
        audit_log.log_open(command)?;
        Ok(Self {
            hash_data: HashDataStore::open(&dir.join("hash_data_store"))?,
            prefilter: PrefilterStore::open(
                &dir.join("hash_store"),
                PrefilterParams {
                    prefix_bits: settings.hash_prefix_bits,
                    suffix_bytes: settings.hash_suffix_bytes,
                },
            )?,
            source_id: SourceIdStore::open(&dir.join("source_id_store"))?,
            source_data: SourceDataStore::open(&dir.join("source_data_store"))?,
            source_name: SourceNameStore::open(&dir.join("source_name_store"))?,
            bloom: Mutex::new(bloom),
            bloom_path,
            audit_log,
            command: command.to_string(),
            changes: Mutex::new(Changes::new()),
            finished: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            tracing::warn!("ImportManager call after close(); ignored");
            return false;
        }
        true
    }

    pub fn insert_source_id(&self, file_hash: &[u8]) -> Result<(bool, u64)> {
        if !self.check_open() {
            return Ok((false, 0));
        }
        let mut changes = self.changes.lock().unwrap();
        self.source_id.insert(file_hash, &mut changes)
    }

    pub fn insert_source_name(
        &self,
        source_id: u64,
        repository_name: &str,
        filename: &str,
    ) -> Result<()> {
        if !self.check_open() {
            return Ok(());
        }
        let mut changes = self.changes.lock().unwrap();
        self.source_name
            .insert(source_id, repository_name, filename, &mut changes)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_source_data(
        &self,
        source_id: u64,
        file_hash: &[u8],
        filesize: u64,
        file_type: &str,
        zero_count: u64,
        nonprobative_count: u64,
    ) -> Result<()> {
        if !self.check_open() {
            return Ok(());
        }
        let data = SourceData {
            file_hash: file_hash.to_vec(),
            filesize,
            file_type: file_type.to_string(),
            zero_count,
            nonprobative_count,
        };
        let mut changes = self.changes.lock().unwrap();
        self.source_data.insert(source_id, &data, &mut changes)
    }

    /// `file_offset` is accepted for interface fidelity with the
    /// original collaborator contract (§6) but is not itself retained:
    /// the data model in §3/§4.1 stores per-source `sub_count`, not the
    /// individual offsets it counts.
    pub fn insert_hash(
        &self,
        block_hash: &[u8],
        source_id: u64,
        _file_offset: u64,
        k_entropy: u64,
        block_label: &[u8],
    ) -> Result<u64> {
        if !self.check_open() {
            return Ok(0);
        }
        let mut changes = self.changes.lock().unwrap();
        let new_total = self
            .hash_data
            .insert(block_hash, k_entropy, block_label, source_id, &mut changes)?;
        if !block_hash.is_empty() {
            self.prefilter.insert(block_hash, new_total, &mut changes)?;
            if let Some(bloom) = self.bloom.lock().unwrap().as_mut() {
                bloom.add(block_hash);
            }
        }
        Ok(new_total)
    }

    /// Same state machine as `insert_hash`, but `sub_count` is supplied
    /// rather than incremented; used to rebuild one hashdb from another.
    pub fn merge_hash(
        &self,
        block_hash: &[u8],
        source_id: u64,
        sub_count: u32,
        k_entropy: u64,
        block_label: &[u8],
    ) -> Result<u64> {
        if !self.check_open() {
            return Ok(0);
        }
        let mut changes = self.changes.lock().unwrap();
        let new_total = self.hash_data.merge(
            block_hash,
            k_entropy,
            block_label,
            source_id,
            sub_count,
            &mut changes,
        )?;
        if !block_hash.is_empty() {
            self.prefilter.insert(block_hash, new_total, &mut changes)?;
            if let Some(bloom) = self.bloom.lock().unwrap().as_mut() {
                bloom.add(block_hash);
            }
        }
        Ok(new_total)
    }

    /// Ends the writer session: persists the Bloom filter (if any
    /// hashes were added to it), emits the accumulated changes report to
    /// `log.xml`, and returns a copy of the report. Idempotent; a
    /// second call is a no-op that returns an empty report.
    pub fn close(&self) -> Result<Changes> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(Changes::new());
        }
        if let Some(bloom) = self.bloom.lock().unwrap().as_ref() {
            bloom.save(&self.bloom_path)?;
        }
        let changes = self.changes.lock().unwrap().clone();
        self.audit_log.log_close(&self.command, &changes)?;
        Ok(changes)
    }
}

impl Drop for ImportManager {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            tracing::warn!("ImportManager dropped without calling close()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_manager() -> (tempfile::TempDir, ImportManager) {
        let dir = tempdir().unwrap();
        let manager = ImportManager::open(dir.path(), &Settings::default(), "test").unwrap();
        (dir, manager)
    }

    #[test]
    fn round_trip_through_source_and_hash_inserts() {
        let (_dir, manager) = open_manager();
        let (is_new, sid) = manager.insert_source_id(b"file-a").unwrap();
        assert!(is_new);
        manager
            .insert_source_data(sid, b"file-a", 4096, "exe", 0, 0)
            .unwrap();
        manager.insert_source_name(sid, "repo", "a.bin").unwrap();

        let h = vec![1u8; 16];
        let total = manager.insert_hash(&h, sid, 0, 10, b"lbl").unwrap();
        assert_eq!(total, 1);

        let changes = manager.close().unwrap();
        assert_eq!(changes.source_id_inserted, 1);
        assert_eq!(changes.source_data_inserted, 1);
        assert_eq!(changes.source_name_inserted, 1);
        assert_eq!(changes.hash_data_inserted, 1);
    }

    #[test]
    fn calls_after_close_are_ignored_with_a_warning() {
        let (_dir, manager) = open_manager();
        manager.close().unwrap();
        let (is_new, sid) = manager.insert_source_id(b"late").unwrap();
        assert!(!is_new);
        assert_eq!(sid, 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (_dir, manager) = open_manager();
        let first = manager.close().unwrap();
        let second = manager.close().unwrap();
        assert_eq!(first.hash_data_inserted, 0);
        assert_eq!(second, Changes::new());
    }
}
