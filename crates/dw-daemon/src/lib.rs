//! Drift detection and bounded auto-remediation daemon.
//!
//! Each cycle probes every environment against the approved baselines,
//! persists the report, spends at most `max_auto_corrections` correction
//! attempts per environment per UTC day, escalates to the alert topic
//! when corrections fail or the budget is spent, and reports metrics.

pub mod alerts;
pub mod baseline_store;
pub mod correction;
pub mod daemon;
pub mod http;
pub mod probe;
pub mod reporter;
pub mod scheduler;
pub mod shutdown;
