use std::sync::Arc;

use chrono::Utc;
use dw_core::baseline::BaselineSet;
use dw_core::store::{RecordDb, StoreError};
use dw_core::types::{start_of_utc_day, CorrectionRecord, CorrectionTally, DriftReport, Environment};
use dw_integrations::environment::{CorrectionRequest, EnvironmentClient};
use dw_integrations::secrets::SecretProvider;
use serde_json::Value;
use tracing::{error, info, warn};

/// Requests remote self-correction for every failing item of a report.
///
/// The daily budget is checked by the caller before
/// [`apply_corrections`](Self::apply_corrections) runs; this type only
/// reports how many corrections were recorded today.
pub struct CorrectionEngine {
    client: Arc<dyn EnvironmentClient>,
    secrets: Arc<dyn SecretProvider>,
    store: Arc<RecordDb>,
    token_name: String,
}

impl CorrectionEngine {
    pub fn new(
        client: Arc<dyn EnvironmentClient>,
        secrets: Arc<dyn SecretProvider>,
        store: Arc<RecordDb>,
        token_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            secrets,
            store,
            token_name: token_name.into(),
        }
    }

    /// Correction records persisted for `env` since midnight UTC.
    pub async fn corrections_today(&self, env: &Environment) -> Result<u64, StoreError> {
        self.store
            .count_corrections_since(&env.name, start_of_utc_day(Utc::now()))
            .await
    }

    /// Attempt one correction per failing item and persist the outcome.
    ///
    /// Items are corrected independently: a rejected or failed call is
    /// counted and the batch continues. The token is fetched once per batch;
    /// when that fails every item counts as a failed correction. A
    /// [`CorrectionRecord`] is written for every call of this method.
    ///
    /// Returns the store error when that record cannot be written: the
    /// remote corrections already ran, but the attempt would be missing
    /// from the daily budget count.
    pub async fn apply_corrections(
        &self,
        env: &Environment,
        report: &DriftReport,
        baselines: &BaselineSet,
    ) -> Result<CorrectionTally, StoreError> {
        let failing = report.failing_items();
        let mut tally = CorrectionTally::default();

        match self.secrets.get_secret(&self.token_name).await {
            Ok(token) => {
                for (domain, target, _) in &failing {
                    let request = CorrectionRequest {
                        kind: *domain,
                        target: target.to_string(),
                        baseline: baselines.entry_json(*domain, target).unwrap_or(Value::Null),
                        token: token.clone(),
                    };
                    match self.client.request_correction(env, &request).await {
                        Ok(resp) if resp.success => {
                            tally.record_success();
                            info!(environment = %env, %domain, target_id = target, "correction applied");
                        }
                        Ok(resp) => {
                            tally.record_failure();
                            warn!(
                                environment = %env,
                                %domain,
                                target_id = target,
                                message = resp.message.as_deref().unwrap_or(""),
                                "correction rejected"
                            );
                        }
                        Err(e) => {
                            tally.record_failure();
                            warn!(environment = %env, %domain, target_id = target, error = %e, "correction failed");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    environment = %env,
                    items = failing.len(),
                    error = %e,
                    "correction token unavailable, batch failed"
                );
                for _ in &failing {
                    tally.record_failure();
                }
            }
        }

        info!(
            environment = %env,
            applied = tally.applied,
            succeeded = tally.succeeded,
            failed = tally.failed,
            "correction batch finished"
        );

        let record = CorrectionRecord::new(env.name.clone(), tally, report.clone());
        if let Err(e) = self.store.insert_correction(&record).await {
            error!(
                environment = %env,
                applied = tally.applied,
                error = %e,
                "failed to persist correction record, attempt not counted against budget"
            );
            return Err(e);
        }
        Ok(tally)
    }
}
