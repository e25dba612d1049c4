//! Scan-stream scheduler (§4.7): fans a stream of block-hash lookups
//! across a worker pool sized to the CPU count.
//!
//! The pool is a plain `std::thread::spawn` fleet over a shared,
//! mutex-guarded queue; workers poll rather than block on a condvar, per
//! §5's "portable, not signaled" shared-resource policy. Pool sizing
//! follows the same `std::thread::available_parallelism()` convention
//! the teacher uses to size its parallel execution concurrency.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::scan_manager::ScanManager;

struct SharedQueue {
    unscanned: Mutex<VecDeque<Vec<u8>>>,
    scanned: Mutex<VecDeque<Vec<u8>>>,
    submitted_unscanned: AtomicU64,
    submitted_scanned: AtomicU64,
    should_close: AtomicBool,
}

impl SharedQueue {
    fn is_busy(&self) -> bool {
        !self.unscanned.lock().unwrap().is_empty()
            || self.submitted_unscanned.load(Ordering::SeqCst)
                != self.submitted_scanned.load(Ordering::SeqCst)
    }
}

/// Fixed-width record layout supplied at construction: every input batch
/// is a concatenation of `hash_width + label_width`-byte records.
#[derive(Debug, Clone, Copy)]
pub struct RecordWidths {
    pub hash_width: usize,
    pub label_width: usize,
}

impl RecordWidths {
    fn record_width(&self) -> usize {
        self.hash_width + self.label_width
    }
}

pub struct ScanStream {
    queue: Arc<SharedQueue>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl ScanStream {
    pub fn new(scan_manager: Arc<ScanManager>, widths: RecordWidths) -> Self {
        let concurrency = std::thread::available_parallelism()
            .unwrap_or(NonZeroUsize::new(1).expect("1 is non-zero"))
            .get();
        let queue = Arc::new(SharedQueue {
            unscanned: Mutex::new(VecDeque::new()),
            scanned: Mutex::new(VecDeque::new()),
            submitted_unscanned: AtomicU64::new(0),
            submitted_scanned: AtomicU64::new(0),
            should_close: AtomicBool::new(false),
        });

        let workers = (0..concurrency)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let scan_manager = Arc::clone(&scan_manager);
                std::thread::spawn(move || worker_loop(queue, scan_manager, widths))
            })
            .collect();

        Self { queue, workers }
    }

    /// Enqueues an input batch. A batch whose size is not a multiple of
    /// the record width is a caller contract violation: the remainder is
    /// reported to stderr and the whole batch is dropped, per §4.7 (the
    /// check itself happens in the worker that picks up the batch).
    pub fn put(&self, batch: Vec<u8>) {
        self.queue.submitted_unscanned.fetch_add(1, Ordering::SeqCst);
        self.queue.unscanned.lock().unwrap().push_back(batch);
    }

    /// Non-blocking: returns an empty `Vec` when no result is ready yet.
    pub fn get(&self) -> Vec<u8> {
        self.queue
            .scanned
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }

    /// Idempotent. Workers exit once `should_close` is set and the queue
    /// is no longer busy.
    pub fn finish(mut self) {
        self.queue.should_close.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        if !self.queue.should_close.load(Ordering::SeqCst) {
            tracing::warn!("ScanStream dropped without calling finish()");
            self.queue.should_close.store(true, Ordering::SeqCst);
        }
    }
}

fn worker_loop(queue: Arc<SharedQueue>, scan_manager: Arc<ScanManager>, widths: RecordWidths) {
    loop {
        let batch = queue.unscanned.lock().unwrap().pop_front();
        match batch {
            Some(batch) => {
                let result = scan_batch(&scan_manager, &batch, widths);
                queue.scanned.lock().unwrap().push_back(result);
                queue.submitted_scanned.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                if queue.should_close.load(Ordering::SeqCst) && !queue.is_busy() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

fn scan_batch(scan_manager: &ScanManager, batch: &[u8], widths: RecordWidths) -> Vec<u8> {
    let record_width = widths.record_width();
    if record_width == 0 || batch.len() % record_width != 0 {
        eprintln!(
            "scan_stream: batch of {} bytes is not a multiple of record width {}; dropping",
            batch.len(),
            record_width
        );
        return Vec::new();
    }

    let mut out = Vec::new();
    for record in batch.chunks(record_width) {
        let hash = &record[..widths.hash_width];
        let label = &record[widths.hash_width..];
        let json = match scan_manager.find_expanded_hash(hash) {
            Ok(Some(json)) => json,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("scan_stream: lookup failed: {err}");
                continue;
            }
        };
        let json_bytes = json.as_bytes();
        let record_size = (8 + hash.len() + label.len() + json_bytes.len()) as u64;
        out.extend_from_slice(&record_size.to_le_bytes());
        out.extend_from_slice(hash);
        out.extend_from_slice(label);
        out.extend_from_slice(json_bytes);
    }
    out
}
