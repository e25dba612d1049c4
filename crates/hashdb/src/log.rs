//! Structured audit log (§6: `log.xml`).
//!
//! Separate from the process's own `tracing`/`tracing-subscriber`
//! diagnostics: `log.xml` is an append-only record of writer-session
//! lifecycle events (open, close with changes report, settings rewrite,
//! fatal abort) meant for forensic audit of the hashdb directory itself,
//! not for operator-facing diagnostics. Each line is one JSON object
//! wrapped in a `<record>` element so existing line-oriented log tooling
//! keeps working while the payload stays machine-parseable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::changes::Changes;
use crate::error::Result;

#[derive(Debug, Serialize)]
#[serde(tag = "event")]
enum AuditRecord<'a> {
    #[serde(rename = "open")]
    Open { command: &'a str },
    #[serde(rename = "close")]
    Close {
        command: &'a str,
        changes: &'a Changes,
    },
    #[serde(rename = "settings_rewrite")]
    SettingsRewrite { command: &'a str },
    #[serde(rename = "fatal")]
    Fatal {
        message: &'a str,
        changes: &'a Changes,
    },
    #[serde(rename = "unclean_shutdown_detected")]
    UncleanShutdownDetected { command: &'a str },
}

/// Scans `log.xml` for an `open` record with no matching `close`/`fatal`
/// record after it, per §5: "a writer session that is dropped without
/// explicit close is a defect; the logger will note the missing close on
/// the next open." A line-count walk is sufficient here since writer
/// sessions within one process are serialized (§5) and `log.xml` is
/// append-only.
fn previous_session_unclosed(contents: &str) -> bool {
    let mut open_balance = 0i64;
    for line in contents.lines() {
        if line.contains("\"event\":\"open\"") {
            open_balance += 1;
        } else if line.contains("\"event\":\"close\"") || line.contains("\"event\":\"fatal\"") {
            open_balance -= 1;
        }
    }
    open_balance > 0
}

pub struct AuditLog {
    file: Mutex<std::fs::File>,
}

impl AuditLog {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("log.xml"))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn append(&self, record: &AuditRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = self.file.lock().unwrap();
        writeln!(file, "<record>{json}</record>")?;
        file.flush()?;
        Ok(())
    }

    /// Opens (creating if absent) the audit log at `dir`, checking
    /// whether the previous writer session against this directory left
    /// an `open` record with no matching `close`, and if so appending a
    /// diagnostic record plus a `tracing::warn!` before returning.
    pub fn open_checking_previous_session(dir: &Path) -> Result<Self> {
        let path = dir.join("log.xml");
        let previously_unclosed = path.exists() && {
            let contents = std::fs::read_to_string(&path)?;
            previous_session_unclosed(&contents)
        };
        let log = Self::open(dir)?;
        if previously_unclosed {
            tracing::warn!("hashdb: previous writer session was not closed cleanly");
            log.append(&AuditRecord::UncleanShutdownDetected {
                command: "detected on open",
            })?;
        }
        Ok(log)
    }

    pub fn log_open(&self, command: &str) -> Result<()> {
        self.append(&AuditRecord::Open { command })
    }

    pub fn log_close(&self, command: &str, changes: &Changes) -> Result<()> {
        self.append(&AuditRecord::Close { command, changes })
    }

    pub fn log_settings_rewrite(&self, command: &str) -> Result<()> {
        self.append(&AuditRecord::SettingsRewrite { command })
    }

    pub fn log_fatal(&self, message: &str, changes: &Changes) -> Result<()> {
        self.append(&AuditRecord::Fatal { message, changes })
    }
}
