//! Wire encoding for the three hash-data record shapes described in §4.1.
//!
//! Type 1 and Type 2 share a key in the `HashHeaders` table (mutually
//! exclusive over the lifetime of one `block_hash`: a key starts as Type 1
//! and is rewritten to Type 2 the moment a second source appears, it never
//! goes back). Type 3 followers live in the separate `HashPostings`
//! dupsort table, one value per distinct source, keyed by the same
//! `block_hash`. This two-table split is the same shape the original NPS
//! source uses (`map_manager` for the single-valued header, a
//! `multimap_manager` for the per-source followers) rather than packing
//! header and followers into one dupsort column; it sidesteps having to
//! invent a byte-level discriminator between a Type-2 header and a Type-3
//! follower inside a single sorted duplicate list.

use crate::varint;

pub const MAX_LABEL_LEN: usize = 10;
pub const SUB_COUNT_MAX: u32 = 0xFFFF;
pub const TOTAL_COUNT_MAX: u64 = 0xFFFF_FFFF;

/// Per-block attributes: describe the block itself, not any one sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAttributes {
    pub k_entropy: u64,
    pub block_label: Vec<u8>,
}

impl HashAttributes {
    /// Truncates `block_label` to `MAX_LABEL_LEN` bytes, returning whether
    /// truncation occurred (counted by the caller as a changes-report
    /// event).
    pub fn new(k_entropy: u64, block_label: &[u8]) -> (Self, bool) {
        let truncated = block_label.len() > MAX_LABEL_LEN;
        let label = if truncated {
            block_label[..MAX_LABEL_LEN].to_vec()
        } else {
            block_label.to_vec()
        };
        (
            Self {
                k_entropy,
                block_label: label,
            },
            truncated,
        )
    }
}

/// A single `(source_id, sub_count)` posting, clipped at `u16::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub source_id: u64,
    pub sub_count: u32,
}

/// The decoded Type-1 record: a single source's posting plus the block's
/// shared attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type1Record {
    pub source_id: u64,
    pub sub_count: u32,
    pub attrs: HashAttributes,
}

/// The decoded Type-2 header: shared attributes plus the authoritative
/// aggregate, with followers held separately in `HashPostings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type2Header {
    pub attrs: HashAttributes,
    pub total_count: u64,
}

/// How many padding bytes a Type-1 record reserves so that, were it to
/// grow into a Type-2 header, bytes would not need to be relocated. Valid
/// only while `source_id < 2^21` (see spec §9 Open Questions); beyond that
/// the reservation undercounts and the header simply grows past it, which
/// is safe under our libmdbx-backed storage (upsert handles arbitrary
/// length changes) but is flagged rather than silently "fixed" per the
/// spec's own framing.
fn type1_padding_len(source_id: u64) -> usize {
    if source_id < 0x80 {
        2
    } else if source_id < 0x4000 {
        1
    } else {
        0
    }
}

pub fn encode_type1(source_id: u64, sub_count: u32, attrs: &HashAttributes) -> Vec<u8> {
    debug_assert!(source_id != 0, "source_id 0 is reserved");
    let mut buf = Vec::new();
    varint::encode_u64(source_id, &mut buf);
    varint::encode_u64(sub_count as u64, &mut buf);
    varint::encode_u64(attrs.k_entropy, &mut buf);
    buf.push(attrs.block_label.len() as u8);
    buf.extend_from_slice(&attrs.block_label);
    buf.extend(std::iter::repeat(0u8).take(type1_padding_len(source_id)));
    buf
}

pub fn decode_type1(bytes: &[u8]) -> Option<Type1Record> {
    if bytes.is_empty() || bytes[0] == 0x00 {
        return None;
    }
    let mut offset = 0;
    let (source_id, n) = varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let (sub_count, n) = varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let (k_entropy, n) = varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let label_len = *bytes.get(offset)? as usize;
    offset += 1;
    let block_label = bytes.get(offset..offset + label_len)?.to_vec();
    Some(Type1Record {
        source_id,
        sub_count: sub_count as u32,
        attrs: HashAttributes {
            k_entropy,
            block_label,
        },
    })
}

pub fn encode_type2_header(total_count: u64, attrs: &HashAttributes) -> Vec<u8> {
    let mut buf = vec![0x00u8];
    varint::encode_u64(attrs.k_entropy, &mut buf);
    buf.push(attrs.block_label.len() as u8);
    buf.extend_from_slice(&attrs.block_label);
    let clamped = total_count.min(TOTAL_COUNT_MAX) as u32;
    buf.extend_from_slice(&clamped.to_le_bytes());
    buf
}

pub fn decode_type2_header(bytes: &[u8]) -> Option<Type2Header> {
    if bytes.first() != Some(&0x00) {
        return None;
    }
    let mut offset = 1;
    let (k_entropy, n) = varint::decode_u64(&bytes[offset..])?;
    offset += n;
    let label_len = *bytes.get(offset)? as usize;
    offset += 1;
    let block_label = bytes.get(offset..offset + label_len)?.to_vec();
    offset += label_len;
    let total_count_bytes: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    let total_count = u32::from_le_bytes(total_count_bytes) as u64;
    Some(Type2Header {
        attrs: HashAttributes {
            k_entropy,
            block_label,
        },
        total_count,
    })
}

/// Fixed-width Type-3 follower: `source_id` (8 bytes LE) + `sub_count` (2
/// bytes LE). Stored as dupsort values under the block's key; order among
/// duplicates is whatever libmdbx's default memcmp comparator gives, and
/// `HashDataStore::find` re-sorts by `source_id` ascending on read, per
/// spec §4.1's ordering tie-break note.
pub fn encode_type3(source_id: u64, sub_count: u32) -> [u8; 10] {
    let mut buf = [0u8; 10];
    buf[0..8].copy_from_slice(&source_id.to_le_bytes());
    buf[8..10].copy_from_slice(&(sub_count.min(SUB_COUNT_MAX) as u16).to_le_bytes());
    buf
}

pub fn decode_type3(bytes: &[u8]) -> Option<Posting> {
    if bytes.len() != 10 {
        return None;
    }
    let source_id = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let sub_count = u16::from_le_bytes(bytes[8..10].try_into().ok()?) as u32;
    Some(Posting {
        source_id,
        sub_count,
    })
}
