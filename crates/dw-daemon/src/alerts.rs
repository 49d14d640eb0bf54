use std::sync::Arc;

use dw_core::store::RecordDb;
use dw_core::types::{AlertRecord, DriftReport, Environment};
use dw_integrations::publisher::Publisher;
use dw_telemetry::metrics::{names, MetricsCollector};
use tracing::{error, warn};

/// Best-effort escalation to the alert topic.
///
/// Publishing and persistence failures are logged; [`send_alert`]
/// never fails.
///
/// [`send_alert`]: AlertDispatcher::send_alert
pub struct AlertDispatcher {
    publisher: Arc<dyn Publisher>,
    store: Arc<RecordDb>,
    metrics: Arc<MetricsCollector>,
    topic: String,
}

impl AlertDispatcher {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        store: Arc<RecordDb>,
        metrics: Arc<MetricsCollector>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            store,
            metrics,
            topic: topic.into(),
        }
    }

    pub async fn send_alert(
        &self,
        env: &Environment,
        report: &DriftReport,
        max_corrections_reached: bool,
    ) -> AlertRecord {
        let record = AlertRecord::new(env.name.clone(), report.clone(), max_corrections_reached);
        warn!(
            environment = %env,
            max_corrections_reached,
            failing = report.failing_items().len(),
            "drift alert"
        );

        match serde_json::to_value(&record) {
            Ok(payload) => {
                if let Err(e) = self.publisher.publish(&self.topic, payload).await {
                    error!(environment = %env, topic = %self.topic, error = %e, "alert publish failed");
                    self.metrics
                        .increment_counter(names::PUBLISH_FAILURES_TOTAL, &[("topic", self.topic.as_str())]);
                }
            }
            Err(e) => error!(environment = %env, error = %e, "alert payload not serializable"),
        }

        if let Err(e) = self.store.insert_alert(&record).await {
            error!(environment = %env, error = %e, "failed to persist alert record");
        }
        record
    }
}
