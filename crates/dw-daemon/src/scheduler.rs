use std::sync::Arc;
use std::time::{Duration, Instant};

use dw_core::baseline::BaselineSet;
use dw_core::config::DriftConfig;
use dw_core::store::{RecordDb, StoreError};
use dw_core::types::{AlertReason, CorrectionTally, CyclePhase, Environment};
use dw_telemetry::metrics::names;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::AlertDispatcher;
use crate::correction::CorrectionEngine;
use crate::probe::ProbeRunner;
use crate::reporter::{CycleSignals, MetricsReporter};
use crate::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// A check for one environment that could not run to completion.
///
/// Contained to that environment; the cycle and the loop continue.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to persist drift report: {0}")]
    PersistReport(#[source] StoreError),

    #[error("failed to read today's correction count: {0}")]
    Budget(#[source] StoreError),

    #[error("failed to persist correction record: {0}")]
    PersistCorrection(#[source] StoreError),

    #[error("concurrency gate closed")]
    GateClosed,

    #[error("environment task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of one environment's pass through the check state machine.
#[derive(Debug, Clone)]
pub struct EnvironmentOutcome {
    pub environment: String,
    pub report_id: Uuid,
    pub overall: bool,
    pub correction: Option<CorrectionTally>,
    pub alert: Option<AlertReason>,
    /// Every phase visited, starting and ending with [`CyclePhase::Idle`].
    pub phases: Vec<CyclePhase>,
    pub latency: Duration,
}

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub outcomes: Vec<EnvironmentOutcome>,
    /// `(environment, error)` for every environment whose check failed.
    pub errors: Vec<(String, String)>,
    pub duration: Duration,
}

impl CycleSummary {
    pub fn outcome(&self, environment: &str) -> Option<&EnvironmentOutcome> {
        self.outcomes.iter().find(|o| o.environment == environment)
    }

    pub fn drifting(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.overall).count()
    }
}

// ---------------------------------------------------------------------------
// Phase trail
// ---------------------------------------------------------------------------

struct PhaseTrail<'a> {
    environment: &'a str,
    current: CyclePhase,
    visited: Vec<CyclePhase>,
}

impl<'a> PhaseTrail<'a> {
    fn new(environment: &'a str) -> Self {
        Self {
            environment,
            current: CyclePhase::Idle,
            visited: vec![CyclePhase::Idle],
        }
    }

    fn advance(&mut self, next: CyclePhase) {
        debug_assert!(
            self.current.can_transition_to(&next),
            "invalid phase transition {:?} -> {:?}",
            self.current,
            next
        );
        debug!(environment = self.environment, from = ?self.current, to = ?next, "phase");
        self.current = next;
        self.visited.push(next);
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_auto_corrections: u32,
    pub max_concurrent_environments: usize,
    pub interval: Duration,
    pub run_on_startup: bool,
}

impl From<&DriftConfig> for SchedulerSettings {
    fn from(drift: &DriftConfig) -> Self {
        Self {
            max_auto_corrections: drift.max_auto_corrections,
            max_concurrent_environments: drift.max_concurrent_environments,
            interval: drift.check_interval(),
            run_on_startup: drift.run_on_startup,
        }
    }
}

/// The collaborators one environment check drives, in order.
pub struct CycleComponents {
    pub probes: ProbeRunner,
    pub corrections: CorrectionEngine,
    pub alerts: AlertDispatcher,
    pub reporter: MetricsReporter,
    pub store: Arc<RecordDb>,
}

/// Drives periodic drift checks across every configured environment.
///
/// Environments are checked concurrently, one task each, gated by a
/// semaphore. Within an environment the order is strict: probes, persisted
/// report, budget check, correction, alert, metrics.
pub struct DriftScheduler {
    environments: Vec<Environment>,
    baselines: Arc<BaselineSet>,
    settings: SchedulerSettings,
    components: CycleComponents,
    gate: Arc<Semaphore>,
}

impl DriftScheduler {
    pub fn new(
        environments: Vec<Environment>,
        baselines: Arc<BaselineSet>,
        settings: SchedulerSettings,
        components: CycleComponents,
    ) -> Self {
        let permits = settings.max_concurrent_environments.max(1);
        Self {
            environments,
            baselines,
            settings,
            components,
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn reporter(&self) -> &MetricsReporter {
        &self.components.reporter
    }

    /// Run one environment through the full check state machine.
    pub async fn check_environment(&self, env: &Environment) -> Result<EnvironmentOutcome, CycleError> {
        let started = Instant::now();
        let c = &self.components;
        let mut trail = PhaseTrail::new(&env.name);

        trail.advance(CyclePhase::Checking);
        let report = c.probes.run_all(env, &self.baselines).await;
        c.store
            .insert_drift_report(&report)
            .await
            .map_err(CycleError::PersistReport)?;

        let mut correction = None;
        let mut alert = None;

        if report.has_drift() {
            let used = c
                .corrections
                .corrections_today(env)
                .await
                .map_err(CycleError::Budget)?;
            let budget = u64::from(self.settings.max_auto_corrections);

            if used >= budget {
                info!(environment = %env, used, budget, "correction budget exhausted");
                trail.advance(CyclePhase::Alerting);
                c.alerts.send_alert(env, &report, true).await;
                alert = Some(AlertReason::BudgetExhausted);
            } else {
                trail.advance(CyclePhase::Correcting);
                let tally = c
                    .corrections
                    .apply_corrections(env, &report, &self.baselines)
                    .await
                    .map_err(CycleError::PersistCorrection)?;
                correction = Some(tally);
                if !tally.is_complete() {
                    trail.advance(CyclePhase::Alerting);
                    c.alerts.send_alert(env, &report, false).await;
                    alert = Some(AlertReason::CorrectionFailed);
                }
            }
        }

        trail.advance(CyclePhase::Reporting);
        let latency = started.elapsed();
        let signals = CycleSignals {
            correction,
            alert,
            latency,
        };
        c.reporter.report(env, &report, &signals).await;
        trail.advance(CyclePhase::Idle);

        info!(
            environment = %env,
            overall = report.status.overall,
            failing = report.failing_items().len(),
            latency_ms = latency.as_millis() as u64,
            "environment checked"
        );

        Ok(EnvironmentOutcome {
            environment: env.name.clone(),
            report_id: report.id,
            overall: report.status.overall,
            correction,
            alert,
            phases: trail.visited,
            latency,
        })
    }

    /// Check every environment once. Failures and panics are logged per
    /// environment and never abort the others.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleSummary {
        let started = Instant::now();
        let mut handles = Vec::with_capacity(self.environments.len());

        for env in self.environments.iter().cloned() {
            let this = Arc::clone(self);
            let gate = Arc::clone(&self.gate);
            let name = env.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = gate.acquire_owned().await.map_err(|_| CycleError::GateClosed)?;
                this.check_environment(&env).await
            });
            handles.push((name, handle));
        }

        let mut summary = CycleSummary::default();
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join) => Err(CycleError::from(join)),
            };
            match result {
                Ok(outcome) => summary.outcomes.push(outcome),
                Err(e) => {
                    error!(environment = %name, error = %e, "environment check failed");
                    self.components
                        .reporter
                        .collector()
                        .increment_counter(names::DRIFT_CYCLE_ERRORS_TOTAL, &[("environment", name.as_str())]);
                    summary.errors.push((name, e.to_string()));
                }
            }
        }

        summary.duration = started.elapsed();
        self.components
            .reporter
            .collector()
            .record_histogram(names::CYCLE_DURATION_SECONDS, summary.duration.as_secs_f64());
        info!(
            environments = self.environments.len(),
            drifting = summary.drifting(),
            errors = summary.errors.len(),
            duration_ms = summary.duration.as_millis() as u64,
            "check cycle complete"
        );
        summary
    }

    /// Run cycles every `interval` until `shutdown` fires. A cycle in
    /// progress finishes before the loop observes the signal.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.settings.run_on_startup {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        info!(
            environments = self.environments.len(),
            interval_secs = self.settings.interval.as_secs(),
            "drift check loop started"
        );

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(cycles, "shutdown signal received, stopping check loop");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    let summary = self.run_cycle().await;
                    if !summary.errors.is_empty() {
                        warn!(cycle = cycles, errors = summary.errors.len(), "cycle finished with errors");
                    }
                }
            }
        }
    }
}
