use std::sync::Arc;

use async_trait::async_trait;
use dw_core::config::Config;
use dw_core::store::RecordDb;
use dw_core::types::{
    AlertReason, CorrectionRecord, CorrectionTally, CyclePhase, DomainResults, DriftDomain,
    DriftReport, Environment,
};
use dw_daemon::daemon::{Daemon, DaemonParts};
use dw_integrations::baseline_source::StaticBaselineSource;
use dw_integrations::environment::{
    CorrectionRequest, CorrectionResponse, EnvironmentClient, ScriptedEnvironmentClient,
};
use dw_integrations::publisher::MemoryPublisher;
use dw_integrations::secrets::StaticSecretProvider;
use dw_telemetry::metrics::{names, MetricsCollector};
use serde_json::{json, Value};

const TOKEN_ENV: &str = "DRIFT_CORRECTION_TOKEN";

struct Harness {
    daemon: Daemon,
    client: Arc<ScriptedEnvironmentClient>,
    alerts: Arc<MemoryPublisher>,
    metrics_sink: Arc<MemoryPublisher>,
    store: Arc<RecordDb>,
    metrics: Arc<MetricsCollector>,
}

fn config(envs: &[&str]) -> Config {
    let mut config = Config::default();
    config.environments = envs
        .iter()
        .map(|name| Environment::new(*name, format!("http://{name}.internal")))
        .collect();
    config
}

async fn harness_with(
    config: Config,
    baseline: Value,
    client: Arc<dyn EnvironmentClient>,
    scripted: Arc<ScriptedEnvironmentClient>,
) -> Harness {
    let alerts = Arc::new(MemoryPublisher::new());
    let metrics_sink = Arc::new(MemoryPublisher::new());
    let store = Arc::new(RecordDb::new_in_memory().await.unwrap());
    let metrics = Arc::new(MetricsCollector::with_defaults());

    let parts = DaemonParts {
        client,
        baseline_source: Arc::new(StaticBaselineSource::new().with("current", baseline)),
        secrets: Arc::new(StaticSecretProvider::new().with(TOKEN_ENV, "s3cret")),
        alert_publisher: alerts.clone(),
        metrics_publisher: metrics_sink.clone(),
        store: store.clone(),
        metrics: metrics.clone(),
    };
    let daemon = Daemon::from_parts(config, parts).await.expect("daemon wires up");

    Harness {
        daemon,
        client: scripted,
        alerts,
        metrics_sink,
        store,
        metrics,
    }
}

async fn harness(envs: &[&str], baseline: Value, client: ScriptedEnvironmentClient) -> Harness {
    let client = Arc::new(client);
    harness_with(config(envs), baseline, client.clone(), client).await
}

fn health_baseline() -> Value {
    json!({
        "api": { "health": { "status": "ok" } },
        "ui": {},
        "behavior": {}
    })
}

fn header_baseline() -> Value {
    json!({
        "api": {},
        "ui": { "header": { "selector": "#header", "structure": { "title": "string" } } },
        "behavior": {}
    })
}

fn drifting_staging() -> ScriptedEnvironmentClient {
    ScriptedEnvironmentClient::new().with_dom("staging", "#header", Ok(json!({})))
}

#[tokio::test]
async fn same_shape_different_value_is_not_drift() {
    let client = ScriptedEnvironmentClient::new()
        .with_api("dev", "health", Ok(json!({ "status": "degraded" })));
    let h = harness(&["dev"], health_baseline(), client).await;

    let summary = h.daemon.run_once().await;

    let outcome = summary.outcome("dev").expect("dev checked");
    assert!(outcome.overall);
    assert!(outcome.correction.is_none());
    assert!(outcome.alert.is_none());
    assert_eq!(
        outcome.phases,
        vec![CyclePhase::Idle, CyclePhase::Checking, CyclePhase::Reporting, CyclePhase::Idle]
    );

    assert!(h.client.correction_requests().is_empty());
    assert!(h.alerts.messages().is_empty());
    assert!(h.store.list_corrections("dev").await.unwrap().is_empty());

    let reports = h.store.list_drift_reports("dev", 10).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].api["health"].drift_score, 1.0);

    let published = h.metrics_sink.on_topic("metrics");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["environment"], "dev");
    assert_eq!(published[0]["drift_detected"], 0);
    assert_eq!(published[0]["totals"]["detected"], 0);
}

#[tokio::test]
async fn drift_is_corrected_within_budget_without_alert() {
    let h = harness(&["staging"], header_baseline(), drifting_staging()).await;

    let summary = h.daemon.run_once().await;

    let outcome = summary.outcome("staging").unwrap();
    assert!(!outcome.overall);
    assert_eq!(
        outcome.correction,
        Some(CorrectionTally { applied: 1, succeeded: 1, failed: 0 })
    );
    assert!(outcome.alert.is_none());
    assert_eq!(
        outcome.phases,
        vec![
            CyclePhase::Idle,
            CyclePhase::Checking,
            CyclePhase::Correcting,
            CyclePhase::Reporting,
            CyclePhase::Idle
        ]
    );

    let requests = h.client.correction_requests();
    assert_eq!(requests.len(), 1);
    let (env, request) = &requests[0];
    assert_eq!(env, "staging");
    assert_eq!(request.kind, DriftDomain::Ui);
    assert_eq!(request.target, "header");
    assert_eq!(request.token, "s3cret");
    assert_eq!(request.baseline["structure"]["title"], "string");

    let records = h.store.list_corrections("staging").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].corrections, CorrectionTally { applied: 1, succeeded: 1, failed: 0 });
    assert_eq!(records[0].report.id, outcome.report_id);

    assert!(h.alerts.messages().is_empty());
    assert!(h.store.list_alerts("staging").await.unwrap().is_empty());

    let totals = h.daemon.scheduler().reporter().totals();
    assert_eq!((totals.detected, totals.corrected, totals.failed_corrections), (1, 1, 0));
    assert_eq!(
        h.metrics.get_counter(
            names::DRIFT_CORRECTIONS_TOTAL,
            &[("environment", "staging"), ("outcome", "succeeded")]
        ),
        1
    );
    assert_eq!(
        h.metrics.get_gauge(
            names::DRIFT_ITEMS_FAILING,
            &[("environment", "staging"), ("domain", "ui")]
        ),
        1
    );
}

#[tokio::test]
async fn exhausted_budget_skips_correction_and_alerts() {
    let h = harness(&["staging"], header_baseline(), drifting_staging()).await;

    let earlier = DriftReport::new(
        "staging",
        DomainResults::new(),
        DomainResults::new(),
        DomainResults::new(),
    );
    for _ in 0..3 {
        let record = CorrectionRecord::new("staging", CorrectionTally::default(), earlier.clone());
        h.store.insert_correction(&record).await.unwrap();
    }

    let summary = h.daemon.run_once().await;

    let outcome = summary.outcome("staging").unwrap();
    assert!(outcome.correction.is_none());
    assert_eq!(outcome.alert, Some(AlertReason::BudgetExhausted));
    assert_eq!(
        outcome.phases,
        vec![
            CyclePhase::Idle,
            CyclePhase::Checking,
            CyclePhase::Alerting,
            CyclePhase::Reporting,
            CyclePhase::Idle
        ]
    );

    assert!(h.client.correction_requests().is_empty());
    assert_eq!(h.store.list_corrections("staging").await.unwrap().len(), 3);

    let sent = h.alerts.on_topic("drift-alerts");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["maxCorrectionsReached"], true);
    assert_eq!(sent[0]["driftReport"]["id"], json!(outcome.report_id));

    let stored = h.store.list_alerts("staging").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].max_corrections_reached);
}

#[tokio::test]
async fn zero_budget_always_alerts_without_correcting() {
    let mut config = config(&["staging"]);
    config.drift.max_auto_corrections = 0;
    let client = Arc::new(drifting_staging());
    let h = harness_with(config, header_baseline(), client.clone(), client).await;

    let summary = h.daemon.run_once().await;

    let outcome = summary.outcome("staging").unwrap();
    assert!(!outcome.overall);
    assert!(outcome.correction.is_none());
    assert_eq!(outcome.alert, Some(AlertReason::BudgetExhausted));
    assert!(h.client.correction_requests().is_empty());
    assert!(h.store.list_corrections("staging").await.unwrap().is_empty());

    let sent = h.alerts.on_topic("drift-alerts");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["maxCorrectionsReached"], true);
}

#[tokio::test]
async fn unpersisted_correction_record_fails_that_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");
    let store = Arc::new(RecordDb::new(&path).await.unwrap());
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_corrections BEFORE INSERT ON corrections
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let client = Arc::new(drifting_staging());
    let metrics = Arc::new(MetricsCollector::new());
    let parts = DaemonParts {
        client: client.clone(),
        baseline_source: Arc::new(StaticBaselineSource::new().with("current", header_baseline())),
        secrets: Arc::new(StaticSecretProvider::new().with(TOKEN_ENV, "s3cret")),
        alert_publisher: Arc::new(MemoryPublisher::new()),
        metrics_publisher: Arc::new(MemoryPublisher::new()),
        store: store.clone(),
        metrics: metrics.clone(),
    };
    let daemon = Daemon::from_parts(config(&["staging"]), parts).await.unwrap();

    let summary = daemon.run_once().await;

    assert!(summary.outcome("staging").is_none());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].0, "staging");
    assert!(summary.errors[0].1.contains("correction record"), "{:?}", summary.errors);
    assert_eq!(
        metrics.get_counter(names::DRIFT_CYCLE_ERRORS_TOTAL, &[("environment", "staging")]),
        1
    );
    // The remote correction ran even though it could not be recorded.
    assert_eq!(client.correction_requests().len(), 1);
    assert_eq!(store.list_drift_reports("staging", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn budget_is_counted_from_persisted_records_across_cycles() {
    let h = harness(&["staging"], header_baseline(), drifting_staging()).await;

    for _ in 0..3 {
        let summary = h.daemon.run_once().await;
        let outcome = summary.outcome("staging").unwrap();
        assert!(outcome.correction.is_some());
        assert!(outcome.alert.is_none());
    }

    let summary = h.daemon.run_once().await;
    assert_eq!(
        summary.outcome("staging").unwrap().alert,
        Some(AlertReason::BudgetExhausted)
    );
    assert_eq!(h.client.correction_requests().len(), 3);
    assert_eq!(h.store.list_corrections("staging").await.unwrap().len(), 3);
}

#[tokio::test]
async fn rejected_correction_raises_alert() {
    let client = drifting_staging().with_correction(
        "staging",
        DriftDomain::Ui,
        "header",
        Ok(CorrectionResponse::rejected("read-only filesystem")),
    );
    let h = harness(&["staging"], header_baseline(), client).await;

    let summary = h.daemon.run_once().await;

    let outcome = summary.outcome("staging").unwrap();
    assert_eq!(
        outcome.correction,
        Some(CorrectionTally { applied: 1, succeeded: 0, failed: 1 })
    );
    assert_eq!(outcome.alert, Some(AlertReason::CorrectionFailed));

    let sent = h.alerts.on_topic("drift-alerts");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["maxCorrectionsReached"], false);

    let totals = h.daemon.scheduler().reporter().totals();
    assert_eq!(totals.failed_corrections, 1);
    assert_eq!(
        h.metrics.get_counter(
            names::DRIFT_ALERTS_TOTAL,
            &[("environment", "staging"), ("reason", "correction_failed")]
        ),
        1
    );
}

#[tokio::test]
async fn alert_sink_outage_does_not_break_the_cycle() {
    let client = Arc::new(drifting_staging().with_correction(
        "staging",
        DriftDomain::Ui,
        "header",
        Err("gateway timeout".into()),
    ));
    let store = Arc::new(RecordDb::new_in_memory().await.unwrap());
    let metrics_sink = Arc::new(MemoryPublisher::new());
    let parts = DaemonParts {
        client: client.clone(),
        baseline_source: Arc::new(StaticBaselineSource::new().with("current", header_baseline())),
        secrets: Arc::new(StaticSecretProvider::new().with(TOKEN_ENV, "s3cret")),
        alert_publisher: Arc::new(MemoryPublisher::failing()),
        metrics_publisher: metrics_sink.clone(),
        store: store.clone(),
        metrics: Arc::new(MetricsCollector::new()),
    };
    let daemon = Daemon::from_parts(config(&["staging"]), parts).await.unwrap();

    let summary = daemon.run_once().await;

    assert!(summary.errors.is_empty());
    assert_eq!(
        summary.outcome("staging").unwrap().alert,
        Some(AlertReason::CorrectionFailed)
    );
    assert_eq!(store.list_alerts("staging").await.unwrap().len(), 1);
    assert_eq!(metrics_sink.on_topic("metrics").len(), 1);
}

/// Delegates to a scripted client but panics for one environment.
struct PanicsFor {
    environment: &'static str,
    inner: Arc<ScriptedEnvironmentClient>,
}

#[async_trait]
impl EnvironmentClient for PanicsFor {
    async fn fetch_api(&self, env: &Environment, endpoint: &str) -> dw_integrations::Result<Value> {
        if env.name == self.environment {
            panic!("probe exploded for {}", env.name);
        }
        self.inner.fetch_api(env, endpoint).await
    }

    async fn extract_dom(&self, env: &Environment, selector: &str) -> dw_integrations::Result<Value> {
        self.inner.extract_dom(env, selector).await
    }

    async fn run_behavior_test(
        &self,
        env: &Environment,
        test_case: &str,
        parameters: &Value,
    ) -> dw_integrations::Result<Value> {
        self.inner.run_behavior_test(env, test_case, parameters).await
    }

    async fn request_correction(
        &self,
        env: &Environment,
        request: &CorrectionRequest,
    ) -> dw_integrations::Result<CorrectionResponse> {
        self.inner.request_correction(env, request).await
    }
}

#[tokio::test]
async fn one_broken_environment_does_not_stop_the_others() {
    let scripted = Arc::new(
        ScriptedEnvironmentClient::new()
            .with_api("dev", "health", Ok(json!({ "status": "ok" })))
            .with_api("prod", "health", Ok(json!({ "status": "ok" }))),
    );
    let client = Arc::new(PanicsFor {
        environment: "broken",
        inner: scripted.clone(),
    });
    let h = harness_with(
        config(&["dev", "broken", "prod", "offline"]),
        health_baseline(),
        client,
        scripted,
    )
    .await;

    let summary = h.daemon.run_once().await;

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].0, "broken");
    assert!(summary.outcome("dev").unwrap().overall);
    assert!(summary.outcome("prod").unwrap().overall);

    // Unreachable targets are probe failures, not cycle failures.
    let offline = summary.outcome("offline").unwrap();
    assert!(!offline.overall);
    let reports = h.store.list_drift_reports("offline", 1).await.unwrap();
    assert!(reports[0].api["health"].error.is_some());

    assert_eq!(
        h.metrics.get_counter(names::DRIFT_CYCLE_ERRORS_TOTAL, &[("environment", "broken")]),
        1
    );

    // The next cycle still runs every environment.
    let again = h.daemon.run_once().await;
    assert_eq!(again.outcomes.len(), 3);
}

#[tokio::test]
async fn missing_baseline_is_fatal() {
    let client = Arc::new(ScriptedEnvironmentClient::new());
    let parts = DaemonParts {
        client,
        baseline_source: Arc::new(StaticBaselineSource::new()),
        secrets: Arc::new(StaticSecretProvider::new()),
        alert_publisher: Arc::new(MemoryPublisher::new()),
        metrics_publisher: Arc::new(MemoryPublisher::new()),
        store: Arc::new(RecordDb::new_in_memory().await.unwrap()),
        metrics: Arc::new(MetricsCollector::new()),
    };

    let err = Daemon::from_parts(config(&["dev"]), parts)
        .await
        .err()
        .expect("baseline load must fail");
    let chain = format!("{err:#}");
    assert!(chain.contains("failed to load baselines"), "{chain}");
    assert!(chain.contains("current"), "{chain}");
}

#[tokio::test]
async fn partial_baseline_is_fatal() {
    let client = Arc::new(ScriptedEnvironmentClient::new());
    let parts = DaemonParts {
        client,
        baseline_source: Arc::new(
            StaticBaselineSource::new().with("current", json!({ "api": {}, "ui": {} })),
        ),
        secrets: Arc::new(StaticSecretProvider::new()),
        alert_publisher: Arc::new(MemoryPublisher::new()),
        metrics_publisher: Arc::new(MemoryPublisher::new()),
        store: Arc::new(RecordDb::new_in_memory().await.unwrap()),
        metrics: Arc::new(MetricsCollector::new()),
    };
    assert!(Daemon::from_parts(config(&["dev"]), parts).await.is_err());
}
