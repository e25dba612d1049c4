//! Hash-data store (§4.1): the authoritative mapping from `block_hash` to
//! `(k_entropy, block_label, total_count, postings)`.
//!
//! Physically this is one libmdbx environment (`hash_data_store/`) holding
//! two tables: `HashHeaders` (one value per key — either a full Type-1
//! record or a Type-2 header) and `HashPostings` (a dupsort table holding
//! the Type-3 followers once a key has more than one source). See
//! `stores::record` for the wire encoding and the rationale for splitting
//! header and followers into separate tables.

use std::path::Path;
use std::sync::Mutex;

use libmdbx::orm::Database;
use libmdbx::{dupsort, table, table_info, DatabaseOptions, Mode, PageSize, ReadWriteOptions};

use crate::changes::Changes;
use crate::error::{Error, Result};
use crate::stores::record::{self, HashAttributes, Posting, Type2Header, MAX_LABEL_LEN};

table!(
    /// One entry per distinct block_hash: either a Type-1 full record or
    /// a Type-2 header (mutually exclusive over the key's lifetime).
    ( HashHeaders ) Vec<u8> => Vec<u8>
);

dupsort!(
    /// Type-3 followers, one duplicate value per distinct source once a
    /// key has transitioned to Type 2.
    ( HashPostings ) Vec<u8> => Vec<u8>
);

const DB_PAGE_SIZE: usize = 4096;
const MAX_MAP_SIZE: isize = 1024_isize.pow(4) * 2; // 2 TB, matches the teacher's libmdbx sizing

fn init_db(path: &Path) -> Result<Database> {
    let tables = [table_info!(HashHeaders), table_info!(HashPostings)]
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
    Database::create_with_options(Some(path), options, &tables).map_err(Error::from)
}

/// The result of `find`: a block's shared attributes plus its full
/// posting list, ordered by `source_id` ascending (§4.1 ordering
/// tie-break).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashDataEntry {
    pub k_entropy: u64,
    pub block_label: Vec<u8>,
    pub total_count: u64,
    pub postings: Vec<Posting>,
}

pub struct HashDataStore {
    db: Database,
    /// Serializes writer sessions against this store, per §5's fixed lock
    /// ordering (hash-data is acquired first of the five stores).
    writer: Mutex<()>,
}

impl HashDataStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            db: init_db(dir)?,
            writer: Mutex::new(()),
        })
    }

    /// `insert(block_hash, k_entropy, block_label, source_id) ->
    /// new_total_count`. See §4.1 for the full state machine.
    pub fn insert(
        &self,
        block_hash: &[u8],
        k_entropy: u64,
        block_label: &[u8],
        source_id: u64,
        changes: &mut Changes,
    ) -> Result<u64> {
        self.insert_or_merge(block_hash, k_entropy, block_label, source_id, None, changes)
    }

    /// `merge(block_hash, k_entropy, block_label, source_id, sub_count) ->
    /// new_total_count`. Same state machine as `insert` but sets the
    /// per-source `sub_count` to the supplied value instead of
    /// incrementing it by one.
    pub fn merge(
        &self,
        block_hash: &[u8],
        k_entropy: u64,
        block_label: &[u8],
        source_id: u64,
        sub_count: u32,
        changes: &mut Changes,
    ) -> Result<u64> {
        self.insert_or_merge(
            block_hash,
            k_entropy,
            block_label,
            source_id,
            Some(sub_count),
            changes,
        )
    }

    fn insert_or_merge(
        &self,
        block_hash: &[u8],
        k_entropy: u64,
        block_label: &[u8],
        source_id: u64,
        merge_sub_count: Option<u32>,
        changes: &mut Changes,
    ) -> Result<u64> {
        if block_hash.is_empty() {
            tracing::warn!("rejected insert/merge with empty block_hash");
            changes.hash_data_empty_hash_rejected += 1;
            return Ok(0);
        }
        if block_label.len() > MAX_LABEL_LEN {
            changes.hash_data_label_truncated += 1;
        }
        let (attrs, _) = HashAttributes::new(k_entropy, block_label);
        let is_merge = merge_sub_count.is_some();

        let _guard = self.writer.lock().unwrap();
        let txn = self.db.begin_readwrite()?;
        let key = block_hash.to_vec();

        let existing_header = txn.get::<HashHeaders>(key.clone())?;
        let total_count = match existing_header {
            None => {
                // Absent: write a fresh Type-1 record. A single-source
                // record's sub_count is subject to the same 0xFFFF cap as
                // a Type-3 follower (§8 S5) even though the byte encoding
                // is variable-length rather than a fixed 16-bit field.
                let requested = merge_sub_count.unwrap_or(1);
                if requested > record::SUB_COUNT_MAX {
                    changes.hash_data_sub_count_clipped += 1;
                }
                let sub_count = requested.min(record::SUB_COUNT_MAX);
                let bytes = record::encode_type1(source_id, sub_count, &attrs);
                txn.upsert::<HashHeaders>(key, bytes)?;
                if is_merge {
                    changes.hash_data_merged += 1;
                } else {
                    changes.hash_data_inserted += 1;
                }
                sub_count as u64
            }
            Some(header_bytes) => {
                if let Some(mut type1) = record::decode_type1(&header_bytes) {
                    if type1.source_id == source_id {
                        // Type 1 present, same source_id.
                        if type1.attrs != attrs {
                            changes.hash_data_mismatched_data_detected += 1;
                        }
                        let new_sub_count = match merge_sub_count {
                            Some(supplied) => {
                                if supplied == type1.sub_count {
                                    changes.hash_data_merged_same += 1;
                                } else if supplied != type1.sub_count {
                                    changes.hash_data_mismatched_sub_count_detected += 1;
                                }
                                // Monotone-nondecreasing per the Open
                                // Question resolution: never shrink.
                                let combined = type1.sub_count.max(supplied);
                                if combined > record::SUB_COUNT_MAX {
                                    changes.hash_data_sub_count_clipped += 1;
                                }
                                combined.min(record::SUB_COUNT_MAX)
                            }
                            None => {
                                let incremented = type1.sub_count.saturating_add(1);
                                if incremented > record::SUB_COUNT_MAX {
                                    changes.hash_data_sub_count_clipped += 1;
                                }
                                incremented.min(record::SUB_COUNT_MAX)
                            }
                        };
                        type1.sub_count = new_sub_count;
                        let bytes = record::encode_type1(source_id, new_sub_count, &type1.attrs);
                        txn.upsert::<HashHeaders>(key, bytes)?;
                        new_sub_count as u64
                    } else {
                        // Type 1 present, different source_id: split into
                        // Type 2 header + two Type-3 followers.
                        let requested = merge_sub_count.unwrap_or(1);
                        if requested > record::SUB_COUNT_MAX {
                            changes.hash_data_sub_count_clipped += 1;
                        }
                        let new_sub_count = requested.min(record::SUB_COUNT_MAX);
                        let total = (type1.sub_count as u64) + (new_sub_count as u64);
                        let total = total.min(record::TOTAL_COUNT_MAX);
                        if total == record::TOTAL_COUNT_MAX {
                            changes.hash_data_total_count_clipped += 1;
                        }
                        let header_bytes = record::encode_type2_header(total, &type1.attrs);
                        txn.upsert::<HashHeaders>(key.clone(), header_bytes)?;
                        let old_follower =
                            record::encode_type3(type1.source_id, type1.sub_count);
                        let new_follower = record::encode_type3(source_id, new_sub_count);
                        txn.upsert::<HashPostings>(key.clone(), old_follower.to_vec())?;
                        txn.upsert::<HashPostings>(key, new_follower.to_vec())?;
                        if is_merge {
                            changes.hash_data_merged += 1;
                        } else {
                            changes.hash_data_inserted += 1;
                        }
                        total
                    }
                } else if let Some(mut header) = record::decode_type2_header(&header_bytes) {
                    // Type 2 present: look for an existing Type-3 follower
                    // for this source_id among the dupsort values.
                    if header.attrs != attrs {
                        changes.hash_data_mismatched_data_detected += 1;
                    }
                    let mut cursor = txn.cursor::<HashPostings>()?;
                    let mut existing_follower: Option<Posting> = None;
                    for item in cursor.walk_key(key.clone(), None) {
                        let (_k, value) = item?;
                        if let Some(posting) = record::decode_type3(&value) {
                            if posting.source_id == source_id {
                                existing_follower = Some(posting);
                                break;
                            }
                        }
                    }
                    drop(cursor);

                    let (old_sub_count, new_sub_count) = match existing_follower {
                        Some(posting) => {
                            let computed = match merge_sub_count {
                                Some(supplied) => {
                                    if supplied == posting.sub_count {
                                        changes.hash_data_merged_same += 1;
                                    } else {
                                        changes.hash_data_mismatched_sub_count_detected += 1;
                                    }
                                    let combined = posting.sub_count.max(supplied);
                                    if combined > record::SUB_COUNT_MAX {
                                        changes.hash_data_sub_count_clipped += 1;
                                    }
                                    combined.min(record::SUB_COUNT_MAX)
                                }
                                None => {
                                    let incremented = posting.sub_count.saturating_add(1);
                                    if incremented > record::SUB_COUNT_MAX {
                                        changes.hash_data_sub_count_clipped += 1;
                                    }
                                    incremented.min(record::SUB_COUNT_MAX)
                                }
                            };
                            (Some(posting.sub_count), computed)
                        }
                        None => {
                            let requested = merge_sub_count.unwrap_or(1);
                            if requested > record::SUB_COUNT_MAX {
                                changes.hash_data_sub_count_clipped += 1;
                            }
                            (None, requested.min(record::SUB_COUNT_MAX))
                        }
                    };

                    if let Some(old) = old_sub_count {
                        let old_bytes = record::encode_type3(source_id, old);
                        txn.delete::<HashPostings>(key.clone(), Some(old_bytes.to_vec()))?;
                    }
                    let new_bytes = record::encode_type3(source_id, new_sub_count);
                    txn.upsert::<HashPostings>(key.clone(), new_bytes.to_vec())?;

                    let delta = new_sub_count as i64 - old_sub_count.unwrap_or(0) as i64;
                    let new_total = ((header.total_count as i64) + delta).max(0) as u64;
                    let new_total = new_total.min(record::TOTAL_COUNT_MAX);
                    if new_total == record::TOTAL_COUNT_MAX && header.total_count != new_total {
                        changes.hash_data_total_count_clipped += 1;
                    }
                    header.total_count = new_total;
                    let header_bytes = record::encode_type2_header(new_total, &header.attrs);
                    txn.upsert::<HashHeaders>(key, header_bytes)?;

                    if is_merge && old_sub_count.is_none() {
                        changes.hash_data_merged += 1;
                    } else if !is_merge && old_sub_count.is_none() {
                        changes.hash_data_inserted += 1;
                    }
                    new_total
                } else {
                    return Err(Error::CorruptRecord {
                        store: "hash_data_store",
                        reason: "header record is neither Type 1 nor Type 2".to_string(),
                    });
                }
            }
        };
        txn.commit()?;
        Ok(total_count)
    }

    pub fn find(&self, block_hash: &[u8]) -> Result<Option<HashDataEntry>> {
        let txn = self.db.begin_read()?;
        let key = block_hash.to_vec();
        let Some(header_bytes) = txn.get::<HashHeaders>(key.clone())? else {
            return Ok(None);
        };
        if let Some(type1) = record::decode_type1(&header_bytes) {
            return Ok(Some(HashDataEntry {
                k_entropy: type1.attrs.k_entropy,
                block_label: type1.attrs.block_label,
                total_count: type1.sub_count as u64,
                postings: vec![Posting {
                    source_id: type1.source_id,
                    sub_count: type1.sub_count,
                }],
            }));
        }
        let header = self.decode_header_or_corrupt(&header_bytes)?;
        let mut postings = Vec::new();
        let cursor = txn.cursor::<HashPostings>()?;
        for item in cursor.walk_key(key, None) {
            let (_k, value) = item?;
            if let Some(posting) = record::decode_type3(&value) {
                postings.push(posting);
            }
        }
        postings.sort_by_key(|p| p.source_id);
        Ok(Some(HashDataEntry {
            k_entropy: header.attrs.k_entropy,
            block_label: header.attrs.block_label,
            total_count: header.total_count,
            postings,
        }))
    }

    /// Cheap variant of `find` that never walks the Type-3 followers.
    pub fn find_count(&self, block_hash: &[u8]) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let Some(header_bytes) = txn.get::<HashHeaders>(block_hash.to_vec())? else {
            return Ok(0);
        };
        if let Some(type1) = record::decode_type1(&header_bytes) {
            return Ok(type1.sub_count as u64);
        }
        Ok(self.decode_header_or_corrupt(&header_bytes)?.total_count)
    }

    fn decode_header_or_corrupt(&self, bytes: &[u8]) -> Result<Type2Header> {
        record::decode_type2_header(bytes).ok_or_else(|| Error::CorruptRecord {
            store: "hash_data_store",
            reason: "header record is neither Type 1 nor Type 2".to_string(),
        })
    }

    pub fn first_hash(&self) -> Result<Option<Vec<u8>>> {
        self.next_hash(&[])
    }

    /// Forward iteration over distinct block hashes in substrate order.
    /// `next_hash(&[]) == first_hash()`.
    pub fn next_hash(&self, prev: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<HashHeaders>()?;
        let start = if prev.is_empty() { None } else { Some(prev.to_vec()) };
        let mut iter = cursor.walk(start);
        if prev.is_empty() {
            return Ok(iter.next().transpose()?.map(|(k, _)| k));
        }
        // Skip the entry matching `prev` itself, return the next distinct key.
        for item in iter.by_ref() {
            let (k, _) = item?;
            if k.as_slice() > prev {
                return Ok(Some(k));
            }
        }
        Ok(None)
    }

    pub fn size(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let cursor = txn.cursor::<HashHeaders>()?;
        Ok(cursor.walk(None).count() as u64)
    }
}
