//! Telemetry initialization
//!
//! Installs the process-wide `tracing` subscriber. Filtering follows `RUST_LOG` and falls
//! back to [`DEFAULT_FILTER`].

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry, LogFormat, DEFAULT_FILTER};
