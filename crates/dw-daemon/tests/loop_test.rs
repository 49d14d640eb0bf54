use std::sync::Arc;
use std::time::Duration;

use dw_core::baseline::BaselineSet;
use dw_core::store::RecordDb;
use dw_core::types::Environment;
use dw_daemon::alerts::AlertDispatcher;
use dw_daemon::correction::CorrectionEngine;
use dw_daemon::daemon::{Daemon, DaemonParts};
use dw_daemon::probe::ProbeRunner;
use dw_daemon::reporter::MetricsReporter;
use dw_daemon::scheduler::{CycleComponents, DriftScheduler, SchedulerSettings};
use dw_daemon::shutdown::ShutdownSignal;
use dw_integrations::baseline_source::StaticBaselineSource;
use dw_integrations::environment::ScriptedEnvironmentClient;
use dw_integrations::publisher::MemoryPublisher;
use dw_integrations::secrets::StaticSecretProvider;
use dw_telemetry::metrics::MetricsCollector;
use serde_json::{json, Value};

fn baseline_doc() -> Value {
    json!({
        "api": { "health": { "status": "ok" } },
        "ui": {},
        "behavior": {}
    })
}

fn scripted() -> Arc<ScriptedEnvironmentClient> {
    Arc::new(
        ScriptedEnvironmentClient::new()
            .with_api("dev", "health", Ok(json!({ "status": "ok" })))
            .with_api("qa", "health", Ok(json!({ "status": "ok" }))),
    )
}

async fn scheduler(interval: Duration, run_on_startup: bool) -> (Arc<DriftScheduler>, Arc<RecordDb>) {
    let client = scripted();
    let store = Arc::new(RecordDb::new_in_memory().await.unwrap());
    let metrics = Arc::new(MetricsCollector::new());
    let baselines = BaselineSet::from_document("current", baseline_doc()).unwrap();

    let components = CycleComponents {
        probes: ProbeRunner::new(client.clone(), 0.95),
        corrections: CorrectionEngine::new(
            client,
            Arc::new(StaticSecretProvider::new()),
            store.clone(),
            "TOKEN",
        ),
        alerts: AlertDispatcher::new(
            Arc::new(MemoryPublisher::new()),
            store.clone(),
            metrics.clone(),
            "drift-alerts",
        ),
        reporter: MetricsReporter::new(Arc::new(MemoryPublisher::new()), metrics, "metrics"),
        store: store.clone(),
    };
    let settings = SchedulerSettings {
        max_auto_corrections: 3,
        max_concurrent_environments: 1,
        interval,
        run_on_startup,
    };
    let envs = vec![
        Environment::new("dev", "http://dev"),
        Environment::new("qa", "http://qa"),
    ];
    let scheduler = DriftScheduler::new(envs, Arc::new(baselines), settings, components);
    (Arc::new(scheduler), store)
}

#[tokio::test]
async fn loop_runs_repeatedly_until_shutdown() {
    let (scheduler, store) = scheduler(Duration::from_millis(20), true).await;
    let shutdown = ShutdownSignal::new();

    let handle = tokio::spawn(scheduler.clone().run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown.trigger();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stops after shutdown")
        .unwrap();

    let dev = store.list_drift_reports("dev", 100).await.unwrap();
    let qa = store.list_drift_reports("qa", 100).await.unwrap();
    assert!(dev.len() >= 2, "expected several cycles, got {}", dev.len());
    assert!(qa.len() >= 2);

    // No further cycles once stopped.
    let settled = dev.len();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.list_drift_reports("dev", 100).await.unwrap().len(), settled);
}

#[tokio::test]
async fn delayed_start_waits_one_interval() {
    let (scheduler, store) = scheduler(Duration::from_secs(3600), false).await;
    let shutdown = ShutdownSignal::new();

    let handle = tokio::spawn(scheduler.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stops after shutdown")
        .unwrap();

    assert!(store.list_drift_reports("dev", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrency_of_one_still_checks_everyone() {
    let (scheduler, _) = scheduler(Duration::from_secs(60), true).await;
    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_and_health() {
    let mut config = dw_core::config::Config::default();
    config.environments = vec![Environment::new("dev", "http://dev")];
    let parts = DaemonParts {
        client: scripted(),
        baseline_source: Arc::new(StaticBaselineSource::new().with("current", baseline_doc())),
        secrets: Arc::new(StaticSecretProvider::new()),
        alert_publisher: Arc::new(MemoryPublisher::new()),
        metrics_publisher: Arc::new(MemoryPublisher::new()),
        store: Arc::new(RecordDb::new_in_memory().await.unwrap()),
        metrics: Arc::new(MetricsCollector::with_defaults()),
    };
    let daemon = Daemon::from_parts(config, parts).await.unwrap();
    daemon.run_once().await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(dw_daemon::http::serve(
        listener,
        daemon.scheduler().clone(),
        daemon.shutdown_handle(),
    ));

    let client = reqwest::Client::new();
    let text = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("drift_checks_total"), "{text}");
    assert!(text.contains("environment=\"dev\""), "{text}");

    let json_metrics: Value = client
        .get(format!("http://{addr}/metrics/json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(json_metrics.is_object());

    let health: Value = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["environments"], 1);
    assert_eq!(health["totals"]["detected"], 0);

    drop(client);
    daemon.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops on shutdown")
        .unwrap();
}
