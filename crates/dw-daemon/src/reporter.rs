use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dw_core::types::{AlertReason, CorrectionTally, DriftDomain, DriftReport, Environment};
use dw_integrations::publisher::Publisher;
use dw_telemetry::metrics::{names, MetricsCollector};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Process-lifetime counts, serialised as `{detected, corrected, failedCorrections}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsSnapshot {
    pub detected: u64,
    pub corrected: u64,
    pub failed_corrections: u64,
}

/// Atomic accumulator for [`TotalsSnapshot`], folded from each cycle's
/// explicit result.
#[derive(Debug, Default)]
pub struct DriftTotals {
    detected: AtomicU64,
    corrected: AtomicU64,
    failed_corrections: AtomicU64,
}

impl DriftTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one environment check. Returns the totals including it.
    pub fn fold(&self, drift_detected: bool, correction: Option<&CorrectionTally>) -> TotalsSnapshot {
        if drift_detected {
            self.detected.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(tally) = correction {
            self.corrected
                .fetch_add(u64::from(tally.succeeded), Ordering::Relaxed);
            self.failed_corrections
                .fetch_add(u64::from(tally.failed), Ordering::Relaxed);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            detected: self.detected.load(Ordering::Relaxed),
            corrected: self.corrected.load(Ordering::Relaxed),
            failed_corrections: self.failed_corrections.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// What happened to one environment after its report was built.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSignals {
    pub correction: Option<CorrectionTally>,
    pub alert: Option<AlertReason>,
    pub latency: Duration,
}

/// Publishes per-cycle drift signals and keeps the in-process collector
/// and lifetime totals current. Never fails.
pub struct MetricsReporter {
    publisher: Arc<dyn Publisher>,
    collector: Arc<MetricsCollector>,
    totals: DriftTotals,
    topic: String,
}

impl MetricsReporter {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        collector: Arc<MetricsCollector>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            collector,
            totals: DriftTotals::new(),
            topic: topic.into(),
        }
    }

    pub fn totals(&self) -> TotalsSnapshot {
        self.totals.snapshot()
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub async fn report(&self, env: &Environment, report: &DriftReport, signals: &CycleSignals) {
        let drift_detected = report.has_drift();
        let totals = self.totals.fold(drift_detected, signals.correction.as_ref());
        self.record_local(env, report, signals);

        let payload = json!({
            "environment": env.name,
            "timestamp": report.timestamp,
            "reportId": report.id,
            "drift_detected": u8::from(drift_detected),
            "failing": {
                "api": report.failing_count(DriftDomain::Api),
                "ui": report.failing_count(DriftDomain::Ui),
                "behavior": report.failing_count(DriftDomain::Behavior),
            },
            "passing": report.status.overall,
            "latency_ms": u64::try_from(signals.latency.as_millis()).unwrap_or(u64::MAX),
            "correction": signals.correction,
            "alert": signals.alert.map(|r| r.as_str()),
            "totals": totals,
        });

        if let Err(e) = self.publisher.publish(&self.topic, payload).await {
            error!(environment = %env, topic = %self.topic, error = %e, "metrics publish failed");
            self.collector
                .increment_counter(names::PUBLISH_FAILURES_TOTAL, &[("topic", self.topic.as_str())]);
        }
    }

    fn record_local(&self, env: &Environment, report: &DriftReport, signals: &CycleSignals) {
        let m = &self.collector;
        let name = env.name.as_str();
        let result = if report.has_drift() { "drift" } else { "pass" };
        m.increment_counter(names::DRIFT_CHECKS_TOTAL, &[("environment", name), ("result", result)]);

        for domain in DriftDomain::ALL {
            let failing = i64::try_from(report.failing_count(domain)).unwrap_or(i64::MAX);
            m.set_gauge(
                names::DRIFT_ITEMS_FAILING,
                &[("environment", name), ("domain", domain.as_str())],
                failing,
            );
        }

        if let Some(tally) = &signals.correction {
            if tally.succeeded > 0 {
                m.increment_counter_by(
                    names::DRIFT_CORRECTIONS_TOTAL,
                    &[("environment", name), ("outcome", "succeeded")],
                    u64::from(tally.succeeded),
                );
            }
            if tally.failed > 0 {
                m.increment_counter_by(
                    names::DRIFT_CORRECTIONS_TOTAL,
                    &[("environment", name), ("outcome", "failed")],
                    u64::from(tally.failed),
                );
            }
        }

        if let Some(reason) = signals.alert {
            m.increment_counter(
                names::DRIFT_ALERTS_TOTAL,
                &[("environment", name), ("reason", reason.as_str())],
            );
        }

        m.record_histogram(names::CHECK_DURATION_SECONDS, signals.latency.as_secs_f64());
    }
}
