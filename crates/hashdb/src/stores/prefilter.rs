//! Hash prefilter store (§4.2): approximate per-hash counts keyed by a
//! masked prefix of `block_hash`, with a linear-scanned suffix array to
//! discriminate prefix collisions.

use std::path::Path;
use std::sync::Mutex;

use libmdbx::orm::Database;
use libmdbx::{table, table_info, DatabaseOptions, Mode, PageSize, ReadWriteOptions};

use crate::changes::Changes;
use crate::error::{Error, Result};

table!(
    /// prefix(block_hash) -> concatenated (suffix, log_count) entries.
    ( PrefilterEntries ) Vec<u8> => Vec<u8>
);

const DB_PAGE_SIZE: usize = 4096;
const MAX_MAP_SIZE: isize = 1024_isize.pow(4);

/// Masks for the unused trailing bits of the last prefix byte, indexed by
/// `prefix_bits % 8`.
const TRAILING_MASKS: [u8; 8] = [0xff, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefilterParams {
    pub prefix_bits: u32,
    pub suffix_bytes: u32,
}

impl PrefilterParams {
    pub fn prefix_len_bytes(&self) -> usize {
        ((self.prefix_bits as usize) + 7) / 8
    }
}

fn prefix_key(block_hash: &[u8], params: PrefilterParams) -> Vec<u8> {
    let len = params.prefix_len_bytes().min(block_hash.len());
    let mut key = block_hash[..len].to_vec();
    if let Some(last) = key.last_mut() {
        let bit_in_byte = (params.prefix_bits % 8) as usize;
        *last &= TRAILING_MASKS[bit_in_byte];
    }
    key
}

fn suffix_of<'a>(block_hash: &'a [u8], params: PrefilterParams) -> &'a [u8] {
    let n = params.suffix_bytes as usize;
    if block_hash.len() >= n {
        &block_hash[block_hash.len() - n..]
    } else {
        block_hash
    }
}

/// Logarithmic count encoding: `(exponent << 4) | mantissa`, representing
/// approximately `(mantissa + 4) * 5^exponent - 10`. The encoder biases
/// the target by +6, then repeatedly divides by 5 until the remainder is
/// `<= 15`, taking the exponent as the number of divisions and the
/// mantissa as the reduced remainder, per §4.2.
pub fn encode_log_count(count: u64) -> u8 {
    let count = count.min(0xFFFF_FFFF);
    let mut temp = count + 6;
    let mut exponent: u32 = 0;
    while temp > 15 {
        exponent += 1;
        temp /= 5;
    }
    let mantissa = temp as u32;
    ((exponent.min(15) as u8) << 4) | (mantissa as u8)
}

pub fn decode_log_count(byte: u8) -> u64 {
    let exponent = (byte >> 4) as u32;
    let mantissa = (byte & 0x0f) as u64;
    let power = 5u64.checked_pow(exponent).unwrap_or(u64::MAX);
    ((mantissa + 4).saturating_mul(power)).saturating_sub(10)
}

pub struct PrefilterStore {
    db: Database,
    params: PrefilterParams,
    writer: Mutex<()>,
}

impl PrefilterStore {
    pub fn open(dir: &Path, params: PrefilterParams) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let tables = [table_info!(PrefilterEntries)].into_iter().collect();
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
            params,
            writer: Mutex::new(()),
        })
    }

    pub fn insert(&self, block_hash: &[u8], count: u64, changes: &mut Changes) -> Result<()> {
        let _guard = self.writer.lock().unwrap();
        let key = prefix_key(block_hash, self.params);
        let suffix = suffix_of(block_hash, self.params);
        let entry_len = self.params.suffix_bytes as usize + 1;

        let txn = self.db.begin_readwrite()?;
        let mut blob = txn.get::<PrefilterEntries>(key.clone())?.unwrap_or_default();
        let encoded = encode_log_count(count);

        let mut found = false;
        for chunk in blob.chunks_mut(entry_len) {
            if chunk.len() == entry_len && &chunk[..entry_len - 1] == suffix {
                if chunk[entry_len - 1] != encoded {
                    chunk[entry_len - 1] = encoded;
                    changes.hash_count_changed += 1;
                } else {
                    changes.hash_not_changed += 1;
                }
                found = true;
                break;
            }
        }
        if !found {
            let was_new_prefix = blob.is_empty();
            blob.extend_from_slice(suffix);
            blob.push(encoded);
            if was_new_prefix {
                changes.hash_prefix_inserted += 1;
            }
            changes.hash_suffix_inserted += 1;
        }
        txn.upsert::<PrefilterEntries>(key, blob)?;
        txn.commit()?;
        Ok(())
    }

    /// Number of distinct prefix keys currently stored, reported by
    /// `ScanManager::sizes` (§10.2).
    pub fn size(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<PrefilterEntries>()?;
        Ok(cursor.walk(None).count() as u64)
    }

    pub fn find(&self, block_hash: &[u8]) -> Result<u64> {
        let key = prefix_key(block_hash, self.params);
        let suffix = suffix_of(block_hash, self.params);
        let entry_len = self.params.suffix_bytes as usize + 1;

        let txn = self.db.begin_read()?;
        let Some(blob) = txn.get::<PrefilterEntries>(key)? else {
            return Ok(0);
        };
        for chunk in blob.chunks(entry_len) {
            if chunk.len() == entry_len && &chunk[..entry_len - 1] == suffix {
                return Ok(decode_log_count(chunk[entry_len - 1]));
            }
        }
        Ok(0)
    }
}
