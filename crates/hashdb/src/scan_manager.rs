//! Scan facade (§6 library surface): the public read-only entry point.
//! `find_hash` layers the Bloom filter, then the prefilter store, then
//! the authoritative hash-data store, so a negative short-circuits as
//! cheaply as possible while never producing a false negative (I4).

use std::path::Path;

use serde::Serialize;

use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::settings::Settings;
use crate::stores::hash_data::HashDataStore;
use crate::stores::prefilter::{PrefilterParams, PrefilterStore};
use crate::stores::record::Posting;
use crate::stores::source_data::{SourceData, SourceDataStore};
use crate::stores::source_id::SourceIdStore;
use crate::stores::source_name::SourceNameStore;

pub struct ScanManager {
    hash_data: HashDataStore,
    prefilter: PrefilterStore,
    source_id: SourceIdStore,
    source_data: SourceDataStore,
    source_name: SourceNameStore,
    bloom: Option<BloomFilter>,
}

/// One substrate's entry count, as reported by `sizes()` (§10.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSize {
    pub store_name: &'static str,
    pub entry_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSizes {
    pub hash_data: StoreSize,
    pub hash_prefilter: StoreSize,
    pub source_id: StoreSize,
    pub source_data: StoreSize,
    pub source_name: StoreSize,
}

/// One row of `ScanManager::duplicates` (§10.1): a source known to
/// contain a given block hash, alongside its names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry {
    pub source_id: u64,
    pub file_hash: Vec<u8>,
    pub names: Vec<(String, String)>,
}

impl ScanManager {
    pub(crate) fn open(dir: &Path, settings: &Settings) -> Result<Self> {
        let bloom_path = dir.join("bloom_filter");
        let bloom = if bloom_path.exists() {
            Some(BloomFilter::load(&bloom_path)?)
        } else {
            None
        };
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
            bloom,
        })
    }

    /// `true` means "possibly present" (the conservative default, and
    /// always the answer when the Bloom filter is disabled/absent).
    fn bloom_possible(&self, block_hash: &[u8]) -> bool {
        self.bloom.as_ref().map(|b| b.test(block_hash)).unwrap_or(true)
    }

    pub fn find_hash(
        &self,
        block_hash: &[u8],
    ) -> Result<Option<(u64, Vec<u8>, u64, Vec<Posting>)>> {
        if !self.bloom_possible(block_hash) {
            return Ok(None);
        }
        if self.prefilter.find(block_hash)? == 0 {
            return Ok(None);
        }
        let Some(entry) = self.hash_data.find(block_hash)? else {
            return Ok(None);
        };
        Ok(Some((
            entry.k_entropy,
            entry.block_label,
            entry.total_count,
            entry.postings,
        )))
    }

    pub fn find_approximate_hash_count(&self, block_hash: &[u8]) -> Result<u64> {
        self.prefilter.find(block_hash)
    }

    pub fn find_source_data(&self, source_id: u64) -> Result<Option<SourceData>> {
        self.source_data.find(source_id)
    }

    pub fn find_source_names(&self, source_id: u64) -> Result<Vec<(String, String)>> {
        self.source_name.find(source_id)
    }

    pub fn find_source_id(&self, file_hash: &[u8]) -> Result<Option<u64>> {
        self.source_id.find(file_hash)
    }

    pub fn hash_begin(&self) -> Result<Option<Vec<u8>>> {
        self.hash_data.first_hash()
    }

    pub fn hash_next(&self, prev: &[u8]) -> Result<Option<Vec<u8>>> {
        self.hash_data.next_hash(prev)
    }

    pub fn source_begin(&self) -> Result<Option<Vec<u8>>> {
        self.source_id.first_source()
    }

    pub fn source_next(&self, prev: &[u8]) -> Result<Option<Vec<u8>>> {
        self.source_id.next_source(prev)
    }

    pub fn sizes(&self) -> Result<StoreSizes> {
        Ok(StoreSizes {
            hash_data: StoreSize {
                store_name: "hash_data_store",
                entry_count: self.hash_data.size()?,
            },
            hash_prefilter: StoreSize {
                store_name: "hash_store",
                entry_count: self.prefilter.size()?,
            },
            source_id: StoreSize {
                store_name: "source_id_store",
                entry_count: self.source_id.largest_id()?,
            },
            source_data: StoreSize {
                store_name: "source_data_store",
                entry_count: self.source_data.size()?,
            },
            source_name: StoreSize {
                store_name: "source_name_store",
                entry_count: self.source_name.size()?,
            },
        })
    }

    pub fn size(&self) -> Result<u64> {
        self.hash_data.size()
    }

    /// Scan JSON (§6): a three-element array
    /// `[{"source_list_id":…}, {"sources":[…]}, {"id_offset_pairs":[…]}]`.
    /// Returns `None` when `block_hash` is absent, mirroring `find_hash`.
    ///
    /// The data model in §3/§4.1 retains per-source `sub_count`, not
    /// individual file offsets, so `id_offset_pairs` is populated with
    /// `(source_id, sub_count)` pairs rather than true offsets — the
    /// closest analog this storage design can produce, preserving the
    /// documented array shape.
    pub fn find_expanded_hash(&self, block_hash: &[u8]) -> Result<Option<String>> {
        let Some((k_entropy, block_label, _total_count, postings)) = self.find_hash(block_hash)?
        else {
            return Ok(None);
        };
        let _ = (k_entropy, block_label);

        let mut crc = crc32fast::Hasher::new();
        for posting in &postings {
            crc.update(&posting.source_id.to_le_bytes());
        }
        let source_list_id = crc.finalize();

        let mut sources = Vec::with_capacity(postings.len());
        for posting in &postings {
            let data = self.source_data.find(posting.source_id)?;
            let names = self.source_name.find(posting.source_id)?;
            sources.push(ScanJsonSource {
                source_id: posting.source_id,
                file_hash_hex: data.as_ref().map(|d| hex::encode(&d.file_hash)).unwrap_or_default(),
                filesize: data.as_ref().map(|d| d.filesize).unwrap_or(0),
                file_type: data.as_ref().map(|d| d.file_type.clone()).unwrap_or_default(),
                low_entropy_count: data.as_ref().map(|d| d.zero_count).unwrap_or(0),
                names: names
                    .into_iter()
                    .map(|(repository_name, filename)| ScanJsonName {
                        repository_name,
                        filename,
                    })
                    .collect(),
            });
        }

        let mut id_offset_pairs = Vec::with_capacity(postings.len() * 2);
        for posting in &postings {
            id_offset_pairs.push(posting.source_id);
            id_offset_pairs.push(posting.sub_count as u64);
        }

        let envelope = (
            ScanJsonSourceListId { source_list_id },
            ScanJsonSources { sources },
            ScanJsonIdOffsetPairs { id_offset_pairs },
        );
        Ok(Some(serde_json::to_string(&envelope)?))
    }

    /// Cross-source duplicate report (§10.1): every source containing
    /// `block_hash`, ordered by source id, with names resolved.
    pub fn duplicates(&self, block_hash: &[u8]) -> Result<Vec<DuplicateEntry>> {
        let Some((_k_entropy, _label, _total, postings)) = self.find_hash(block_hash)? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::with_capacity(postings.len());
        for posting in postings {
            let file_hash = self
                .source_data
                .find(posting.source_id)?
                .map(|d| d.file_hash)
                .unwrap_or_default();
            let names = self.source_name.find(posting.source_id)?;
            entries.push(DuplicateEntry {
                source_id: posting.source_id,
                file_hash,
                names,
            });
        }
        entries.sort_by_key(|e| e.source_id);
        Ok(entries)
    }
}

#[derive(Serialize)]
struct ScanJsonSourceListId {
    source_list_id: u32,
}

#[derive(Serialize)]
struct ScanJsonSources {
    sources: Vec<ScanJsonSource>,
}

#[derive(Serialize)]
struct ScanJsonSource {
    source_id: u64,
    file_hash_hex: String,
    filesize: u64,
    file_type: String,
    low_entropy_count: u64,
    names: Vec<ScanJsonName>,
}

#[derive(Serialize)]
struct ScanJsonName {
    repository_name: String,
    filename: String,
}

#[derive(Serialize)]
struct ScanJsonIdOffsetPairs {
    id_offset_pairs: Vec<u64>,
}
