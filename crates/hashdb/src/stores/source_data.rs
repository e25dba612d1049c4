//! Source-data store (§4.4): per-`source_id` metadata, stored as a
//! length-prefixed tuple.

use std::path::Path;
use std::sync::Mutex;

use libmdbx::orm::Database;
use libmdbx::{table, table_info, DatabaseOptions, Mode, PageSize, ReadWriteOptions};

use crate::changes::Changes;
use crate::error::{Error, Result};

table!(
    /// source_id -> encoded SourceData
    ( SourceDataRows ) u64 => Vec<u8>
);

const DB_PAGE_SIZE: usize = 4096;
const MAX_MAP_SIZE: isize = 1024_isize.pow(3) * 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceData {
    pub file_hash: Vec<u8>,
    pub filesize: u64,
    pub file_type: String,
    pub zero_count: u64,
    pub nonprobative_count: u64,
}

fn encode(data: &SourceData) -> Vec<u8> {
    let mut buf = Vec::new();
    crate::varint::encode_u64(data.file_hash.len() as u64, &mut buf);
    buf.extend_from_slice(&data.file_hash);
    crate::varint::encode_u64(data.filesize, &mut buf);
    let type_bytes = data.file_type.as_bytes();
    crate::varint::encode_u64(type_bytes.len() as u64, &mut buf);
    buf.extend_from_slice(type_bytes);
    crate::varint::encode_u64(data.zero_count, &mut buf);
    crate::varint::encode_u64(data.nonprobative_count, &mut buf);
    buf
}

fn decode(bytes: &[u8]) -> Option<SourceData> {
    let mut offset = 0;
    let (fh_len, n) = crate::varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let file_hash = bytes.get(offset..offset + fh_len as usize)?.to_vec();
    offset += fh_len as usize;
    let (filesize, n) = crate::varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let (type_len, n) = crate::varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let type_bytes = bytes.get(offset..offset + type_len as usize)?;
    let file_type = String::from_utf8_lossy(type_bytes).into_owned();
    offset += type_len as usize;
    let (zero_count, n) = crate::varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let (nonprobative_count, _) = crate::varint::decode_u64(&bytes[offset..])?;
    Some(SourceData {
        file_hash,
        filesize,
        file_type,
        zero_count,
        nonprobative_count,
    })
}

pub struct SourceDataStore {
    db: Database,
    writer: Mutex<()>,
}

impl SourceDataStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let tables = [table_info!(SourceDataRows)].into_iter().collect();
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

    /// Writes a new record, rewrites a differing one (counted as
    /// "changed"), or is a no-op (counted as "same").
    pub fn insert(&self, source_id: u64, data: &SourceData, changes: &mut Changes) -> Result<()> {
        let _guard = self.writer.lock().unwrap();
        let txn = self.db.begin_readwrite()?;
        let encoded = encode(data);
        match txn.get::<SourceDataRows>(source_id)? {
            None => {
                txn.upsert::<SourceDataRows>(source_id, encoded)?;
                changes.source_data_inserted += 1;
            }
            Some(existing) if existing == encoded => {
                changes.source_data_same += 1;
            }
            Some(_) => {
                txn.upsert::<SourceDataRows>(source_id, encoded)?;
                changes.source_data_changed += 1;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn find(&self, source_id: u64) -> Result<Option<SourceData>> {
        let txn = self.db.begin_read()?;
        Ok(txn
            .get::<SourceDataRows>(source_id)?
            .and_then(|bytes| decode(&bytes)))
    }

    /// Number of sources with metadata on record, reported by
    /// `ScanManager::sizes` (§10.2).
    pub fn size(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<SourceDataRows>()?;
        Ok(cursor.walk(None).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> SourceData {
        SourceData {
            file_hash: vec![1, 2, 3, 4],
            filesize: 4096,
            file_type: "exe".to_string(),
            zero_count: 2,
            nonprobative_count: 5,
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let data = sample();
        let bytes = encode(&data);
        assert_eq!(decode(&bytes).unwrap(), data);
    }

    #[test]
    fn insert_classifies_inserted_changed_and_same() {
        let dir = tempdir().unwrap();
        let store = SourceDataStore::open(dir.path()).unwrap();
        let mut changes = Changes::new();
        let mut data = sample();

        store.insert(1, &data, &mut changes).unwrap();
        assert_eq!(changes.source_data_inserted, 1);

        store.insert(1, &data, &mut changes).unwrap();
        assert_eq!(changes.source_data_same, 1);

        data.filesize = 8192;
        store.insert(1, &data, &mut changes).unwrap();
        assert_eq!(changes.source_data_changed, 1);

        let found = store.find(1).unwrap().unwrap();
        assert_eq!(found.filesize, 8192);
    }

    #[test]
    fn find_on_missing_source_is_absent() {
        let dir = tempdir().unwrap();
        let store = SourceDataStore::open(dir.path()).unwrap();
        assert_eq!(store.find(42).unwrap(), None);
    }
}
