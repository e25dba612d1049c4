use std::str::FromStr;

use tracing_subscriber::{filter::Directive, EnvFilter, FmtSubscriber};

/// Installs a `tracing` subscriber scoped to the test harness, mirroring the
/// teacher's benchmark/binary init pattern (`EnvFilter` + `FmtSubscriber`).
/// Safe to call from every test file; only the first call wins.
pub fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from_str(&log_level).unwrap_or(Directive::from(
            tracing::Level::WARN,
        )))
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
