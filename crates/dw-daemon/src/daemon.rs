use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dw_core::config::{expand_home, BaselineSourceKind, Config};
use dw_core::store::RecordDb;
use dw_integrations::baseline_source::{BaselineSource, FileBaselineSource, HttpBaselineSource};
use dw_integrations::environment::{EnvironmentClient, HttpEnvironmentClient};
use dw_integrations::publisher::{HttpPublisher, LogPublisher, Publisher};
use dw_integrations::secrets::{CachedSecretProvider, EnvSecretProvider, SecretProvider};
use dw_telemetry::metrics::MetricsCollector;
use tracing::info;

use crate::alerts::AlertDispatcher;
use crate::baseline_store::BaselineStore;
use crate::correction::CorrectionEngine;
use crate::probe::ProbeRunner;
use crate::reporter::MetricsReporter;
use crate::scheduler::{CycleComponents, CycleSummary, DriftScheduler, SchedulerSettings};
use crate::shutdown::ShutdownSignal;

/// External collaborators the daemon is wired to.
///
/// [`DaemonParts::from_config`] builds the production set; tests assemble
/// their own from in-process implementations.
pub struct DaemonParts {
    pub client: Arc<dyn EnvironmentClient>,
    pub baseline_source: Arc<dyn BaselineSource>,
    pub secrets: Arc<dyn SecretProvider>,
    pub alert_publisher: Arc<dyn Publisher>,
    pub metrics_publisher: Arc<dyn Publisher>,
    pub store: Arc<RecordDb>,
    pub metrics: Arc<MetricsCollector>,
}

impl DaemonParts {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.http.request_timeout();
        let ua = config.http.user_agent.as_str();

        let client = HttpEnvironmentClient::new(timeout, ua)
            .context("failed to build environment HTTP client")?;

        let baseline_source: Arc<dyn BaselineSource> = match config.baseline.source {
            BaselineSourceKind::File => {
                let path = config
                    .baseline
                    .path
                    .as_deref()
                    .context("baseline.path is required for the file source")?;
                Arc::new(FileBaselineSource::new(expand_home(path)))
            }
            BaselineSourceKind::Http => {
                let url = config
                    .baseline
                    .url
                    .as_deref()
                    .context("baseline.url is required for the http source")?;
                Arc::new(
                    HttpBaselineSource::new(url, timeout, ua)
                        .context("failed to build baseline HTTP client")?,
                )
            }
        };

        let ttl = Duration::from_secs(config.secrets.cache_ttl_secs);
        let secrets: Arc<dyn SecretProvider> = if ttl.is_zero() {
            Arc::new(EnvSecretProvider)
        } else {
            Arc::new(CachedSecretProvider::new(EnvSecretProvider, ttl))
        };

        let alert_publisher = publisher(config.sinks.alerts_url.as_deref(), timeout, ua)?;
        let metrics_publisher = publisher(config.sinks.metrics_url.as_deref(), timeout, ua)?;

        let store_path = expand_home(&config.store.path);
        let store = RecordDb::new(&store_path)
            .await
            .with_context(|| format!("failed to open record store at {}", store_path.display()))?;

        Ok(Self {
            client: Arc::new(client),
            baseline_source,
            secrets,
            alert_publisher,
            metrics_publisher,
            store: Arc::new(store),
            metrics: Arc::new(MetricsCollector::with_defaults()),
        })
    }
}

fn publisher(url: Option<&str>, timeout: Duration, ua: &str) -> Result<Arc<dyn Publisher>> {
    Ok(match url {
        Some(url) => Arc::new(
            HttpPublisher::new(url, timeout, ua).context("failed to build sink HTTP client")?,
        ),
        None => Arc::new(LogPublisher),
    })
}

/// The driftwarden daemon: baselines loaded, scheduler wired, ready to run.
pub struct Daemon {
    config: Config,
    scheduler: Arc<DriftScheduler>,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Build the production daemon from config.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate_for_daemon().context("invalid configuration")?;
        let parts = DaemonParts::from_config(&config).await?;
        Self::from_parts(config, parts).await
    }

    /// Wire the daemon from explicit collaborators. Fails when the baseline
    /// set cannot be loaded; nothing runs against a partial baseline.
    pub async fn from_parts(config: Config, parts: DaemonParts) -> Result<Self> {
        let baselines = BaselineStore::new(parts.baseline_source, config.baseline.key.clone())
            .load()
            .await
            .context("failed to load baselines")?;

        let components = CycleComponents {
            probes: ProbeRunner::new(parts.client.clone(), config.drift.baseline_threshold),
            corrections: CorrectionEngine::new(
                parts.client,
                parts.secrets,
                parts.store.clone(),
                config.secrets.correction_token_env.clone(),
            ),
            alerts: AlertDispatcher::new(
                parts.alert_publisher,
                parts.store.clone(),
                parts.metrics.clone(),
                config.sinks.alert_topic.clone(),
            ),
            reporter: MetricsReporter::new(
                parts.metrics_publisher,
                parts.metrics,
                config.sinks.metrics_topic.clone(),
            ),
            store: parts.store,
        };

        let scheduler = DriftScheduler::new(
            config.environments.clone(),
            Arc::new(baselines),
            SchedulerSettings::from(&config.drift),
            components,
        );

        Ok(Self {
            config,
            scheduler: Arc::new(scheduler),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<DriftScheduler> {
        &self.scheduler
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Run a single check cycle across every environment.
    pub async fn run_once(&self) -> CycleSummary {
        self.scheduler.run_cycle().await
    }

    /// Run the check loop, and the metrics endpoint when configured, until
    /// shutdown is triggered.
    pub async fn run(&self) -> Result<()> {
        let server = match self.config.daemon.metrics_addr.as_deref() {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?;
                Some(tokio::spawn(crate::http::serve(
                    listener,
                    self.scheduler.clone(),
                    self.shutdown.clone(),
                )))
            }
            None => None,
        };

        self.scheduler.clone().run(self.shutdown.clone()).await;

        if let Some(handle) = server {
            // Graceful shutdown was triggered alongside the loop.
            let _ = handle.await;
        }
        info!("daemon stopped");
        Ok(())
    }
}
