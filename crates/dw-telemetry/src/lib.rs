//! Observability for driftwarden services.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`,
//!   filtered by `RUST_LOG` with a configured fallback level.
//! - **Metrics**: thread-safe labelled counters, gauges and histograms with
//!   Prometheus text and JSON export.

pub mod logging;
pub mod metrics;
