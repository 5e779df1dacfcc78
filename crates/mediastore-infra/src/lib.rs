//! Mediastore Infrastructure Library
//!
//! Shared infrastructure for Mediastore binaries. Currently this is telemetry
//! initialization: the storage crates only emit `tracing` events and never install a
//! subscriber themselves.

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat};
