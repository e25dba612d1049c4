//! Source-id store (§4.3): assigns a dense, monotonic, never-recycled
//! 64-bit id to each distinct `file_hash`.
//!
//! The "largest id issued" sentinel (source id 0 is reserved, per §3) is
//! kept in a one-row table (`SourceIdMeta`) separate from the forward
//! `file_hash -> source_id` mapping, mirroring the teacher's convention
//! of a small enum-keyed singleton table (`ChainData`/`SnapState`) for
//! scalar bookkeeping fields that live alongside a bulk table.

use std::path::Path;
use std::sync::Mutex;

use libmdbx::orm::Database;
use libmdbx::{table, table_info, DatabaseOptions, Mode, PageSize, ReadWriteOptions};

use crate::changes::Changes;
use crate::error::{Error, Result};

table!(
    /// file_hash -> source_id
    ( SourceIdForward ) Vec<u8> => u64
);

table!(
    /// Singleton row (key is always 0) holding the largest source_id
    /// issued so far.
    ( SourceIdMeta ) u8 => u64
);

const LARGEST_ID_KEY: u8 = 0;
const DB_PAGE_SIZE: usize = 4096;
const MAX_MAP_SIZE: isize = 1024_isize.pow(3) * 100; // 100 GB, ids are tiny

pub struct SourceIdStore {
    db: Database,
    writer: Mutex<()>,
}

impl SourceIdStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let tables = [table_info!(SourceIdForward), table_info!(SourceIdMeta)]
            .into_iter()
            .collect();
        let options = DatabaseOptions {
            page_size: Some(PageSize::Set(DB_PAGE_SIZE)),
            mode: Mode::ReadWrite(ReadWriteOptions {
                max_size: Some(MAX_MAP_SIZE),
                ..Default::default()
            }),
            ..Default::default()
        };
        let db = Database::create_with_options(Some(dir), options, &tables).map_err(Error::from)?;
        Ok(Self {
            db,
            writer: Mutex::new(()),
        })
    }

    /// `insert(file_hash) -> (is_new, source_id)`. The sentinel bump and
    /// the new mapping are written in the same transaction, so a crash
    /// mid-assignment never leaves ids non-dense (§4.3 invariant, I5).
    pub fn insert(&self, file_hash: &[u8], changes: &mut Changes) -> Result<(bool, u64)> {
        let _guard = self.writer.lock().unwrap();
        let txn = self.db.begin_readwrite()?;
        let key = file_hash.to_vec();
        if let Some(existing) = txn.get::<SourceIdForward>(key.clone())? {
            changes.source_id_already_present += 1;
            return Ok((false, existing));
        }
        let largest = txn.get::<SourceIdMeta>(LARGEST_ID_KEY)?.unwrap_or(0);
        let new_id = largest + 1;
        txn.upsert::<SourceIdForward>(key, new_id)?;
        txn.upsert::<SourceIdMeta>(LARGEST_ID_KEY, new_id)?;
        txn.commit()?;
        changes.source_id_inserted += 1;
        Ok((true, new_id))
    }

    pub fn find(&self, file_hash: &[u8]) -> Result<Option<u64>> {
        let txn = self.db.begin_read()?;
        Ok(txn.get::<SourceIdForward>(file_hash.to_vec())?)
    }

    pub fn first_source(&self) -> Result<Option<Vec<u8>>> {
        self.next_source(&[])
    }

    pub fn next_source(&self, prev: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<SourceIdForward>()?;
        let start = if prev.is_empty() { None } else { Some(prev.to_vec()) };
        let mut iter = cursor.walk(start);
        if prev.is_empty() {
            return Ok(iter.next().transpose()?.map(|(k, _)| k));
        }
        for item in iter.by_ref() {
            let (k, _) = item?;
            if k.as_slice() > prev {
                return Ok(Some(k));
            }
        }
        Ok(None)
    }

    pub fn largest_id(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.get::<SourceIdMeta>(LARGEST_ID_KEY)?.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ids_start_at_one_and_are_dense() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::open(dir.path()).unwrap();
        let mut changes = Changes::new();

        let (is_new, id) = store.insert(b"file-a", &mut changes).unwrap();
        assert!(is_new);
        assert_eq!(id, 1);

        let (is_new, id) = store.insert(b"file-b", &mut changes).unwrap();
        assert!(is_new);
        assert_eq!(id, 2);
        assert_eq!(store.largest_id().unwrap(), 2);
    }

    #[test]
    fn inserting_the_same_file_hash_twice_returns_the_same_id() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::open(dir.path()).unwrap();
        let mut changes = Changes::new();

        let (_, id1) = store.insert(b"file-a", &mut changes).unwrap();
        let (is_new, id2) = store.insert(b"file-a", &mut changes).unwrap();
        assert!(!is_new);
        assert_eq!(id1, id2);
        assert_eq!(changes.source_id_already_present, 1);
    }

    #[test]
    fn round_trips_via_find() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::open(dir.path()).unwrap();
        let mut changes = Changes::new();
        let (_, id) = store.insert(b"file-a", &mut changes).unwrap();
        assert_eq!(store.find(b"file-a").unwrap(), Some(id));
        assert_eq!(store.find(b"missing").unwrap(), None);
    }

    #[test]
    fn ids_are_never_recycled_across_distinct_hashes() {
        let dir = tempdir().unwrap();
        let store = SourceIdStore::open(dir.path()).unwrap();
        let mut changes = Changes::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..20 {
            let (_, id) = store.insert(format!("file-{i}").as_bytes(), &mut changes).unwrap();
            assert!(seen.insert(id), "id {id} was reused");
        }
    }
}
