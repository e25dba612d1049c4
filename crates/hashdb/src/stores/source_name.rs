//! Source-name store (§4.5): each `source_id` may be reachable under
//! several `(repository_name, filename)` pairs (the same file found at
//! different paths, or imported from different repositories). Stored as
//! a dupsort table so duplicate pairs are naturally deduplicated by
//! libmdbx itself.

use std::path::Path;
use std::sync::Mutex;

use libmdbx::orm::Database;
use libmdbx::{dupsort, table_info, DatabaseOptions, Mode, PageSize, ReadWriteOptions};

use crate::changes::Changes;
use crate::error::{Error, Result};

dupsort!(
    /// source_id -> encoded (repository_name, filename) pairs.
    ( SourceNames ) u64 => Vec<u8>
);

const DB_PAGE_SIZE: usize = 4096;
const MAX_MAP_SIZE: isize = 1024_isize.pow(3) * 100;

fn encode_pair(repository_name: &str, filename: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    let repo_bytes = repository_name.as_bytes();
    crate::varint::encode_u64(repo_bytes.len() as u64, &mut buf);
    buf.extend_from_slice(repo_bytes);
    buf.extend_from_slice(filename.as_bytes());
    buf
}

fn decode_pair(bytes: &[u8]) -> Option<(String, String)> {
    let (repo_len, n) = crate::varint::decode_u64(bytes)?;
    let repo_bytes = bytes.get(n..n + repo_len as usize)?;
    let filename_bytes = bytes.get(n + repo_len as usize..)?;
    Some((
        String::from_utf8_lossy(repo_bytes).into_owned(),
        String::from_utf8_lossy(filename_bytes).into_owned(),
    ))
}

pub struct SourceNameStore {
    db: Database,
    writer: Mutex<()>,
}

impl SourceNameStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let tables = [table_info!(SourceNames)].into_iter().collect();
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

    /// Adds a `(repository_name, filename)` pair for `source_id` if it
    /// isn't already present. libmdbx's dupsort storage rejects an exact
    /// duplicate value under a key silently, so presence is checked first
    /// to get an accurate changes count.
    pub fn insert(
        &self,
        source_id: u64,
        repository_name: &str,
        filename: &str,
        changes: &mut Changes,
    ) -> Result<()> {
        let _guard = self.writer.lock().unwrap();
        let encoded = encode_pair(repository_name, filename);
        let txn = self.db.begin_readwrite()?;
        let mut cursor = txn.cursor::<SourceNames>()?;
        let already_present = cursor
            .walk_key(source_id, Some(encoded.clone()))
            .next()
            .transpose()?
            .map(|(_, v)| v == encoded)
            .unwrap_or(false);
        if already_present {
            changes.source_name_already_present += 1;
            return Ok(());
        }
        drop(cursor);
        txn.upsert::<SourceNames>(source_id, encoded)?;
        txn.commit()?;
        changes.source_name_inserted += 1;
        Ok(())
    }

    pub fn find(&self, source_id: u64) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<SourceNames>()?;
        let mut out = Vec::new();
        for item in cursor.walk_key(source_id, None) {
            let (_, bytes) = item?;
            if let Some(pair) = decode_pair(&bytes) {
                out.push(pair);
            }
        }
        Ok(out)
    }

    /// Total `(repository_name, filename)` pairs across every source,
    /// reported by `ScanManager::sizes` (§10.2).
    pub fn size(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<SourceNames>()?;
        Ok(cursor.walk(None).count() as u64)
    }
}
