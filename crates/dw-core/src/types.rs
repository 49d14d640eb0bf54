use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// A named deployment target (`dev`, `staging`, `production`, ...).
///
/// Identity is the name. The base URL is the externally reachable address
/// every probe and correction call for this environment is joined onto.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub base_url: String,
}

impl Environment {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    /// Join `path` onto the base URL with exactly one slash between them.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// DriftDomain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDomain {
    Api,
    Ui,
    Behavior,
}

impl DriftDomain {
    pub const ALL: [DriftDomain; 3] = [DriftDomain::Api, DriftDomain::Ui, DriftDomain::Behavior];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftDomain::Api => "api",
            DriftDomain::Ui => "ui",
            DriftDomain::Behavior => "behavior",
        }
    }
}

impl fmt::Display for DriftDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DriftItemResult
// ---------------------------------------------------------------------------

/// Outcome of probing a single target within one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftItemResult {
    pub drift_score: f64,
    pub passing: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DriftItemResult {
    /// A successfully scored probe. Passing iff `score >= threshold`.
    pub fn scored(score: f64, threshold: f64) -> Self {
        Self {
            drift_score: score,
            passing: score >= threshold,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// A probe that could not be completed. Never passing, score zero.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            drift_score: 0.0,
            passing: false,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Per-domain mapping of target id to its probe result.
pub type DomainResults = BTreeMap<String, DriftItemResult>;

// ---------------------------------------------------------------------------
// DriftStatus / DriftReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftStatus {
    pub api_passing: bool,
    pub ui_passing: bool,
    pub behavior_passing: bool,
    pub overall: bool,
}

impl DriftStatus {
    /// A domain passes when every item in it passes; an empty domain passes.
    pub fn from_results(api: &DomainResults, ui: &DomainResults, behavior: &DomainResults) -> Self {
        let api_passing = all_passing(api);
        let ui_passing = all_passing(ui);
        let behavior_passing = all_passing(behavior);
        Self {
            api_passing,
            ui_passing,
            behavior_passing,
            overall: api_passing && ui_passing && behavior_passing,
        }
    }
}

fn all_passing(results: &DomainResults) -> bool {
    results.values().all(|r| r.passing)
}

/// Consolidated result of one check cycle for one environment.
///
/// Reports are persisted as new documents and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub id: Uuid,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub api: DomainResults,
    pub ui: DomainResults,
    pub behavior: DomainResults,
    pub status: DriftStatus,
}

impl DriftReport {
    pub fn new(
        environment: impl Into<String>,
        api: DomainResults,
        ui: DomainResults,
        behavior: DomainResults,
    ) -> Self {
        let status = DriftStatus::from_results(&api, &ui, &behavior);
        Self {
            id: Uuid::new_v4(),
            environment: environment.into(),
            timestamp: Utc::now(),
            api,
            ui,
            behavior,
            status,
        }
    }

    pub fn domain(&self, domain: DriftDomain) -> &DomainResults {
        match domain {
            DriftDomain::Api => &self.api,
            DriftDomain::Ui => &self.ui,
            DriftDomain::Behavior => &self.behavior,
        }
    }

    pub fn has_drift(&self) -> bool {
        !self.status.overall
    }

    /// Every `(domain, target, result)` whose result is not passing, in
    /// domain order then target order.
    pub fn failing_items(&self) -> Vec<(DriftDomain, &str, &DriftItemResult)> {
        DriftDomain::ALL
            .iter()
            .flat_map(|&domain| {
                self.domain(domain)
                    .iter()
                    .filter(|(_, r)| !r.passing)
                    .map(move |(id, r)| (domain, id.as_str(), r))
            })
            .collect()
    }

    pub fn failing_count(&self, domain: DriftDomain) -> usize {
        self.domain(domain).values().filter(|r| !r.passing).count()
    }
}

// ---------------------------------------------------------------------------
// Corrections
// ---------------------------------------------------------------------------

/// Counts for one correction attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionTally {
    pub applied: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl CorrectionTally {
    pub fn record_success(&mut self) {
        self.applied += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.applied += 1;
        self.failed += 1;
    }

    /// True when every applied correction succeeded.
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.applied
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub id: Uuid,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub corrections: CorrectionTally,
    pub report: DriftReport,
}

impl CorrectionRecord {
    pub fn new(environment: impl Into<String>, corrections: CorrectionTally, report: DriftReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment: environment.into(),
            timestamp: Utc::now(),
            corrections,
            report,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: Uuid,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub max_corrections_reached: bool,
    pub drift_report: DriftReport,
}

impl AlertRecord {
    pub fn new(environment: impl Into<String>, drift_report: DriftReport, max_corrections_reached: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment: environment.into(),
            timestamp: Utc::now(),
            max_corrections_reached,
            drift_report,
        }
    }
}

/// Why an alert was raised for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    /// The daily correction budget was already spent.
    BudgetExhausted,
    /// A correction attempt ran but not every item succeeded.
    CorrectionFailed,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::BudgetExhausted => "budget_exhausted",
            AlertReason::CorrectionFailed => "correction_failed",
        }
    }
}

// ---------------------------------------------------------------------------
// CyclePhase
// ---------------------------------------------------------------------------

/// Per-environment position in a check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Checking,
    Correcting,
    Alerting,
    Reporting,
}

impl CyclePhase {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &CyclePhase) -> bool {
        matches!(
            (self, target),
            (CyclePhase::Idle, CyclePhase::Checking)
                | (CyclePhase::Checking, CyclePhase::Correcting)
                | (CyclePhase::Checking, CyclePhase::Alerting)
                | (CyclePhase::Checking, CyclePhase::Reporting)
                | (CyclePhase::Correcting, CyclePhase::Alerting)
                | (CyclePhase::Correcting, CyclePhase::Reporting)
                | (CyclePhase::Alerting, CyclePhase::Reporting)
                | (CyclePhase::Reporting, CyclePhase::Idle)
        )
    }
}

/// Midnight UTC of the calendar day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
