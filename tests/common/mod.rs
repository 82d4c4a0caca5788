#![allow(dead_code)]

use std::time::Duration;
use tallydb::core::config::Config;
use tallydb::core::database::Database;

pub const WAIT: Duration = Duration::from_secs(10);

/// Route library events to the test harness. `RUST_LOG=tallydb=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tallydb=warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn open_db() -> Database {
    init_tracing();
    Database::open(Config::default().with_default_wait_timeout(WAIT)).unwrap()
}
