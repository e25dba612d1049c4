//! End-to-end property and scenario tests (spec §8), driven entirely
//! through the public `Hashdb` / `ImportManager` / `ScanManager` facade
//! against a `tempfile::TempDir`-backed hashdb directory.

mod common;

use hashdb::stores::record::Posting;
use hashdb::{Hashdb, Settings};
use sha3::{Digest, Keccak256};
use tempfile::tempdir;

fn open_hashdb() -> (tempfile::TempDir, Hashdb) {
    let dir = tempdir().unwrap();
    let hashdb = Hashdb::create(dir.path(), Settings::default(), "property test").unwrap();
    (dir, hashdb)
}

fn digest16(seed: u64) -> Vec<u8> {
    Keccak256::new_with_prefix(seed.to_le_bytes())
        .finalize()[..16]
        .to_vec()
}

// P1: find_count equals the number of inserts for a hash, clipped at 2^32-1.
#[test]
fn p1_find_count_matches_insert_count() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid_a) = import.insert_source_id(b"file-a").unwrap();
    let (_, sid_b) = import.insert_source_id(b"file-b").unwrap();
    let h = digest16(1);

    let mut total = 0u64;
    for sid in [sid_a, sid_b, sid_a, sid_a, sid_b] {
        total = import.insert_hash(&h, sid, 0, 0, b"").unwrap();
    }
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    let (_, _, found_total, _) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!(found_total, 5);
    assert_eq!(found_total, total);
}

// P2: posting sub_count equals the number of inserts specifying (h, s).
#[test]
fn p2_posting_sub_count_matches_per_source_insert_count() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid_a) = import.insert_source_id(b"file-a").unwrap();
    let (_, sid_b) = import.insert_source_id(b"file-b").unwrap();
    let h = digest16(2);

    for _ in 0..3 {
        import.insert_hash(&h, sid_a, 0, 0, b"").unwrap();
    }
    import.insert_hash(&h, sid_b, 0, 0, b"").unwrap();
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    let (_, _, _, postings) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!(
        postings,
        vec![
            Posting { source_id: sid_a, sub_count: 3 },
            Posting { source_id: sid_b, sub_count: 1 },
        ]
    );
}

// P3: merge over an empty store sets postings/total directly; a second
// identical merge is idempotent and counted as merged_same.
#[test]
fn p3_merge_over_empty_store_then_merge_same_is_idempotent() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let h = digest16(3);

    let total = import.merge_hash(&h, sid, 7, 0, b"").unwrap();
    assert_eq!(total, 7);
    let second_total = import.merge_hash(&h, sid, 7, 0, b"").unwrap();
    assert_eq!(second_total, 7);

    let changes = import.close().unwrap();
    assert_eq!(changes.hash_data_merged_same, 1);

    let scan = hashdb.scan_manager().unwrap();
    let (_, _, total_count, postings) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!(total_count, 7);
    assert_eq!(postings, vec![Posting { source_id: sid, sub_count: 7 }]);
}

// P4: source id/data/name round-trip through the public facade.
#[test]
fn p4_source_id_and_data_round_trip() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let file_hash = b"some-file-digest".to_vec();
    let (is_new, sid) = import.insert_source_id(&file_hash).unwrap();
    assert!(is_new);
    import
        .insert_source_data(sid, &file_hash, 2048, "exe", 1, 2)
        .unwrap();
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    assert_eq!(scan.find_source_id(&file_hash).unwrap(), Some(sid));
    let data = scan.find_source_data(sid).unwrap().unwrap();
    assert_eq!(data.file_hash, file_hash);
    assert_eq!(data.filesize, 2048);
}

// P5: once a hash has been inserted, the Bloom filter (when rebuilt and
// enabled) always tests positive for it.
#[test]
fn p5_bloom_filter_is_monotone() {
    common::init_tracing();
    let (dir, hashdb) = open_hashdb();
    hashdb.rebuild_bloom(true, 20, 3, "enable bloom").unwrap();

    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let h = digest16(5);
    import.insert_hash(&h, sid, 0, 0, b"").unwrap();
    import.close().unwrap();

    let filter = hashdb::bloom::BloomFilter::load(&dir.path().join("bloom_filter")).unwrap();
    assert!(filter.test(&h));
}

// P6: once a hash has been inserted, the prefilter store answers > 0.
#[test]
fn p6_prefilter_is_monotone() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let h = digest16(6);
    import.insert_hash(&h, sid, 0, 0, b"").unwrap();
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    assert!(scan.find_approximate_hash_count(&h).unwrap() > 0);
}

// P7: first_hash/next_hash iteration visits every distinct inserted key
// exactly once.
#[test]
fn p7_hash_iteration_covers_every_distinct_key_once() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let mut hashes: Vec<Vec<u8>> = (0..10u64).map(digest16).collect();
    hashes.sort();
    for h in &hashes {
        import.insert_hash(h, sid, 0, 0, b"").unwrap();
        import.insert_hash(h, sid, 1, 0, b"").unwrap(); // duplicate offset, same key
    }
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    let mut visited = Vec::new();
    let mut cursor = scan.hash_begin().unwrap();
    while let Some(h) = cursor {
        visited.push(h.clone());
        cursor = scan.hash_next(&h).unwrap();
    }
    assert_eq!(visited, hashes);
}

// P8: sub_count clips at 0xFFFF and stays there on further inserts.
#[test]
fn p8_sub_count_clips_and_remains_clipped() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let h = digest16(8);

    import.merge_hash(&h, sid, 70_000, 0, b"").unwrap();
    let total_after_clip = import.insert_hash(&h, sid, 0, 0, b"").unwrap();
    assert_eq!(total_after_clip, 0xFFFF);
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    let (_, _, total, postings) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!(total, 0xFFFF);
    assert_eq!(postings, vec![Posting { source_id: sid, sub_count: 0xFFFF }]);
}

// S1: empty store scenario.
#[test]
fn s1_empty_store() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let scan = hashdb.scan_manager().unwrap();
    assert_eq!(scan.find_hash(&vec![0u8; 16]).unwrap(), None);
    assert_eq!(scan.hash_begin().unwrap(), None);
    assert_eq!(scan.size().unwrap(), 0);
}

// S2: Type-1 happy path, including first-writer-wins attribute semantics.
#[test]
fn s2_type1_happy_path() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let h = vec![0u8; 16];

    let total = import.insert_hash(&h, sid, 0, 1000, b"bl").unwrap();
    assert_eq!(total, 1);

    let total = import.insert_hash(&h, sid, 1, 2000, b"bl").unwrap();
    assert_eq!(total, 2);
    let changes = import.close().unwrap();
    assert_eq!(changes.hash_data_mismatched_data_detected, 1);

    let scan = hashdb.scan_manager().unwrap();
    let (k_entropy, label, total_count, postings) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!((k_entropy, label, total_count), (1000, b"bl".to_vec(), 2));
    assert_eq!(postings, vec![Posting { source_id: sid, sub_count: 2 }]);
}

// S3: Type-1 to Type-2 split on a second distinct source.
#[test]
fn s3_type1_splits_into_type2() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid1) = import.insert_source_id(b"file-a").unwrap();
    let (_, sid2) = import.insert_source_id(b"file-b").unwrap();
    let h = vec![1u8; 16];

    import.insert_hash(&h, sid1, 0, 0, b"").unwrap();
    import.insert_hash(&h, sid1, 1, 0, b"").unwrap();
    import.insert_hash(&h, sid2, 0, 0, b"").unwrap();
    import.close().unwrap();

    let scan = hashdb.scan_manager().unwrap();
    let (_, _, total, postings) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!(total, 3);
    assert_eq!(
        postings,
        vec![
            Posting { source_id: sid1, sub_count: 2 },
            Posting { source_id: sid2, sub_count: 1 },
        ]
    );
}

// S4: merge over an existing insert counts a mismatch and keeps the
// larger (monotone-nondecreasing) value.
#[test]
fn s4_merge_over_existing_insert_is_monotone() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid) = import.insert_source_id(b"file-a").unwrap();
    let h = vec![2u8; 16];

    import.insert_hash(&h, sid, 0, 0, b"").unwrap(); // sub_count = 1
    let total = import.merge_hash(&h, sid, 10, 0, b"").unwrap();
    let changes = import.close().unwrap();

    assert_eq!(changes.hash_data_mismatched_sub_count_detected, 1);
    assert_eq!(total, 10);
}

// S5: clipping at the u16/u32 boundaries, exactly per spec's worked example.
#[test]
fn s5_clipping_matches_worked_example() {
    common::init_tracing();
    let (_dir, hashdb) = open_hashdb();
    let import = hashdb.import_manager().unwrap();
    let (_, sid1) = import.insert_source_id(b"file-a").unwrap();
    let (_, sid2) = import.insert_source_id(b"file-b").unwrap();
    let h = vec![3u8; 16];

    import.merge_hash(&h, sid1, 65536, 0, b"").unwrap();
    let total = import.insert_hash(&h, sid2, 0, 0, b"").unwrap();
    import.close().unwrap();
    assert_eq!(total, 65536);

    let scan = hashdb.scan_manager().unwrap();
    let (_, _, total_count, postings) = scan.find_hash(&h).unwrap().unwrap();
    assert_eq!(total_count, 65536);
    assert_eq!(
        postings,
        vec![
            Posting { source_id: sid1, sub_count: 65535 },
            Posting { source_id: sid2, sub_count: 1 },
        ]
    );
}

// S6: Bloom false-positive rate lies within the theoretical bound (±3σ),
// checked statistically over disjoint inserted/queried hash sets.
#[test]
fn s6_bloom_false_positive_rate_within_bound() {
    common::init_tracing();
    let m_bits = 28u32;
    let k = 3u32;
    let n = 10_000u64;

    let mut filter = hashdb::bloom::BloomFilter::new(m_bits, k, true).unwrap();
    let inserted: Vec<Vec<u8>> = (0..n).map(digest16).collect();
    for h in &inserted {
        filter.add(h);
    }

    let queried: Vec<Vec<u8>> = (n..2 * n).map(digest16).collect();
    let false_positives = queried.iter().filter(|h| filter.test(h)).count() as f64;

    let m = (1u64 << m_bits) as f64;
    let expected_p = (1.0 - (-(k as f64) * n as f64 / m).exp()).powi(k as i32);
    let expected_count = expected_p * n as f64;
    let sigma = (n as f64 * expected_p * (1.0 - expected_p)).max(1e-9).sqrt();
    let bound = expected_count + 3.0 * sigma + 5.0; // +5 slack for tiny expected counts

    assert!(
        false_positives <= bound,
        "false positives {false_positives} exceeded bound {bound} (expected {expected_count})"
    );
}
