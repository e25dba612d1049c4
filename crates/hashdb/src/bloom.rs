//! Bloom prefilter (§4.6): a fast, no-false-negative negative answer for
//! `find_hash`, backed by a raw bit array file rather than a substrate
//! table — the filter is read-mostly and rebuilt wholesale, so it gets
//! its own flat file instead of a memory-mapped KV environment.

use std::io::{Read, Write};
use std::path::Path;

use sha3::{Digest as _, Keccak256};

use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"hashdbbf";
const HEADER_LEN: usize = 8 + 4 + 4 + 1; // magic + m_bits + k_functions + enabled

/// `M_hash_size` (bits) and `k_hash_functions` constraints from §4.6.
fn validate(m_bits: u32, k_functions: u32) -> Result<()> {
    let max_m = 8 * std::mem::size_of::<usize>() as u32 - 1;
    if !(3..=max_m).contains(&m_bits) || !(1..=5).contains(&k_functions) {
        return Err(Error::InvalidBloomParameters {
            m: m_bits,
            k: k_functions,
        });
    }
    Ok(())
}

/// A double-hashing (Kirsch-Mitzenmacher) Bloom filter over a raw,
/// file-backed bit array.
pub struct BloomFilter {
    m_bits: u32,
    k_functions: u32,
    bits: Vec<u8>,
    /// When `false`, every query answers "possible" without touching the
    /// bit array, per §4.6.
    enabled: bool,
}

impl BloomFilter {
    pub fn new(m_bits: u32, k_functions: u32, enabled: bool) -> Result<Self> {
        validate(m_bits, k_functions)?;
        let byte_len = (1usize << m_bits).div_ceil(8);
        Ok(Self {
            m_bits,
            k_functions,
            bits: vec![0u8; byte_len],
            enabled,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)?;
        if &header[0..8] != MAGIC {
            return Err(Error::CorruptRecord {
                store: "bloom_filter",
                reason: "missing magic header".to_string(),
            });
        }
        let m_bits = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let k_functions = u32::from_le_bytes(header[12..16].try_into().unwrap());
        validate(m_bits, k_functions)?;
        let enabled = header[16] != 0;
        let mut bits = Vec::new();
        file.read_to_end(&mut bits)?;
        Ok(Self {
            m_bits,
            k_functions,
            bits,
            enabled,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(MAGIC)?;
        file.write_all(&self.m_bits.to_le_bytes())?;
        file.write_all(&self.k_functions.to_le_bytes())?;
        file.write_all(&[self.enabled as u8])?;
        file.write_all(&self.bits)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Hashes shorter than 16 bytes are zero-padded so queries over
    /// different hash algorithms share one filter address space.
    fn padded(block_hash: &[u8]) -> Vec<u8> {
        if block_hash.len() >= 16 {
            block_hash.to_vec()
        } else {
            let mut padded = vec![0u8; 16];
            padded[..block_hash.len()].copy_from_slice(block_hash);
            padded
        }
    }

    /// Kirsch-Mitzenmacher double hashing: two independent 64-bit hashes
    /// derived from one Keccak-256 digest combine as `h1 + i*h2` to
    /// synthesize `k_functions` bit positions without `k` separate hash
    /// computations.
    fn bit_positions(&self, block_hash: &[u8]) -> Vec<u64> {
        let padded = Self::padded(block_hash);
        let digest = Keccak256::new_with_prefix(&padded).finalize();
        let h1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
        let h2 = u64::from_le_bytes(digest[8..16].try_into().unwrap());
        let m = 1u64 << self.m_bits;
        (0..self.k_functions as u64)
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
            .collect()
    }

    pub fn add(&mut self, block_hash: &[u8]) {
        if !self.enabled {
            return;
        }
        for pos in self.bit_positions(block_hash) {
            let byte = (pos / 8) as usize;
            let bit = (pos % 8) as u8;
            self.bits[byte] |= 1 << bit;
        }
    }

    /// `true` means "possibly present"; `false` is authoritative absence.
    /// Always `true` when the filter is disabled, per §4.6.
    pub fn test(&self, block_hash: &[u8]) -> bool {
        if !self.enabled {
            return true;
        }
        self.bit_positions(block_hash).iter().all(|&pos| {
            let byte = (pos / 8) as usize;
            let bit = (pos % 8) as u8;
            self.bits[byte] & (1 << bit) != 0
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(BloomFilter::new(2, 3, true).is_err());
        assert!(BloomFilter::new(20, 0, true).is_err());
        assert!(BloomFilter::new(20, 6, true).is_err());
    }

    #[test]
    fn inserted_hash_always_tests_positive() {
        let mut filter = BloomFilter::new(20, 3, true).unwrap();
        let h = vec![0xAB; 16];
        filter.add(&h);
        assert!(filter.test(&h));
    }

    #[test]
    fn disabled_filter_always_answers_possible() {
        let filter = BloomFilter::new(20, 3, false).unwrap();
        assert!(filter.test(&vec![1, 2, 3]));
    }

    #[test]
    fn short_hashes_are_zero_padded_before_hashing() {
        let mut filter = BloomFilter::new(20, 3, true).unwrap();
        filter.add(&[1, 2, 3]);
        let mut padded = vec![1, 2, 3];
        padded.extend(std::iter::repeat(0u8).take(13));
        assert!(filter.test(&padded));
    }

    #[test]
    fn save_then_load_round_trips_membership() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bloom_filter");
        let mut filter = BloomFilter::new(20, 3, true).unwrap();
        let h = vec![0x11; 16];
        filter.add(&h);
        filter.save(&path).unwrap();

        let loaded = BloomFilter::load(&path).unwrap();
        assert!(loaded.test(&h));
    }

    #[test]
    fn save_then_load_preserves_the_disabled_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bloom_filter");
        BloomFilter::new(20, 3, false).unwrap().save(&path).unwrap();

        let loaded = BloomFilter::load(&path).unwrap();
        assert!(!loaded.is_enabled());
        assert!(loaded.test(&vec![1, 2, 3]));
    }

    #[test]
    fn false_positive_rate_is_roughly_within_bound() {
        let mut filter = BloomFilter::new(28, 3, true).unwrap();
        let inserted: Vec<Vec<u8>> = (0..2000u32).map(|i| i.to_le_bytes().repeat(4)).collect();
        for h in &inserted {
            filter.add(h);
        }
        let false_positives = (0..2000u32)
            .map(|i| (i + 10_000_000).to_le_bytes().repeat(4))
            .filter(|h| filter.test(h))
            .count();
        // With m=2^28 bits and k=3 over 2000 inserts, the expected false
        // positive rate is minuscule; allow generous slack for test
        // stability rather than asserting a tight statistical bound.
        assert!(false_positives < 50, "false positives: {false_positives}");
    }
}
