use thiserror::Error;

/// Fatal / configuration-level failures.
///
/// Per the error taxonomy: usage errors (empty key, label overflow, calls
/// made after `finish`) are *not* represented here — they are logged via
/// `tracing::warn!` and degrade to a no-op plus a changes counter. This
/// enum only covers what the spec calls configuration errors and
/// invariant violations: conditions where the caller cannot reasonably
/// continue.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("substrate error: {0}")]
    Mdbx(#[from] libmdbx::Error),

    #[error("settings version {found} is older than the minimum supported version {expected}")]
    IncompatibleSettingsVersion { found: u32, expected: u32 },

    #[error("invalid bloom filter parameters: M_hash_size={m}, k_hash_functions={k}")]
    InvalidBloomParameters { m: u32, k: u32 },

    #[error("hashdb directory does not exist or is not a directory: {0}")]
    NotAHashdbDirectory(String),

    #[error("hashdb directory already exists: {0}")]
    AlreadyExists(String),

    #[error("missing sentinel record for {0}")]
    MissingSentinel(&'static str),

    #[error("corrupt record in {store}: {reason}")]
    CorruptRecord {
        store: &'static str,
        reason: String,
    },

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, Error>;
