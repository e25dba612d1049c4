use serde::Serialize;

/// Counters emitted by a writer session on close.
///
/// Per the design notes, this replaces the original's global mutable
/// counters: every writing operation in this crate takes `&mut Changes`
/// rather than reaching for process-global state.
#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
pub struct Changes {
    pub hash_data_inserted: u64,
    pub hash_data_merged: u64,
    pub hash_data_merged_same: u64,
    pub hash_data_mismatched_data_detected: u64,
    pub hash_data_mismatched_sub_count_detected: u64,
    pub hash_data_label_truncated: u64,
    pub hash_data_sub_count_clipped: u64,
    pub hash_data_total_count_clipped: u64,
    pub hash_data_empty_hash_rejected: u64,

    pub hash_prefix_inserted: u64,
    pub hash_suffix_inserted: u64,
    pub hash_count_changed: u64,
    pub hash_not_changed: u64,

    pub source_id_inserted: u64,
    pub source_id_already_present: u64,

    pub source_data_inserted: u64,
    pub source_data_changed: u64,
    pub source_data_same: u64,

    pub source_name_inserted: u64,
    pub source_name_already_present: u64,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-printed JSON, ported from the original's `commands_helper`
    /// report formatter.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Merge another session's counters into this one. Used when a single
    /// writer session spans multiple logical batches and wants one
    /// aggregate report.
    pub fn merge(&mut self, other: &Changes) {
        self.hash_data_inserted += other.hash_data_inserted;
        self.hash_data_merged += other.hash_data_merged;
        self.hash_data_merged_same += other.hash_data_merged_same;
        self.hash_data_mismatched_data_detected += other.hash_data_mismatched_data_detected;
        self.hash_data_mismatched_sub_count_detected +=
            other.hash_data_mismatched_sub_count_detected;
        self.hash_data_label_truncated += other.hash_data_label_truncated;
        self.hash_data_sub_count_clipped += other.hash_data_sub_count_clipped;
        self.hash_data_total_count_clipped += other.hash_data_total_count_clipped;
        self.hash_data_empty_hash_rejected += other.hash_data_empty_hash_rejected;
        self.hash_prefix_inserted += other.hash_prefix_inserted;
        self.hash_suffix_inserted += other.hash_suffix_inserted;
        self.hash_count_changed += other.hash_count_changed;
        self.hash_not_changed += other.hash_not_changed;
        self.source_id_inserted += other.source_id_inserted;
        self.source_id_already_present += other.source_id_already_present;
        self.source_data_inserted += other.source_data_inserted;
        self.source_data_changed += other.source_data_changed;
        self.source_data_same += other.source_data_same;
        self.source_name_inserted += other.source_name_inserted;
        self.source_name_already_present += other.source_name_already_present;
    }
}
