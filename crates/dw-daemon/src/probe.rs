use std::sync::Arc;

use dw_core::baseline::{BaselineSet, BehaviorBaseline, UiBaseline};
use dw_core::similarity;
use dw_core::types::{DomainResults, DriftDomain, DriftItemResult, DriftReport, Environment};
use dw_integrations::environment::EnvironmentClient;
use dw_integrations::RemoteError;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

/// Runs the API, UI and behavior probes for one environment.
///
/// Every probe resolves to a [`DriftItemResult`]: transport and decode
/// failures are recorded on the item and never reach sibling probes.
pub struct ProbeRunner {
    client: Arc<dyn EnvironmentClient>,
    threshold: f64,
}

impl ProbeRunner {
    pub fn new(client: Arc<dyn EnvironmentClient>, threshold: f64) -> Self {
        Self { client, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare `GET {env}/api/{target}` against the expected body.
    pub async fn probe_api(&self, env: &Environment, target: &str, baseline: &Value) -> DriftItemResult {
        let observed = self.client.fetch_api(env, target).await;
        self.finish(env, DriftDomain::Api, target, observed, baseline)
    }

    /// Compare the structure extracted with the baseline selector.
    pub async fn probe_ui(&self, env: &Environment, target: &str, baseline: &UiBaseline) -> DriftItemResult {
        let observed = self.client.extract_dom(env, &baseline.selector).await;
        self.finish(env, DriftDomain::Ui, target, observed, &baseline.structure)
    }

    /// Run the parameterised test case and compare with its expected results.
    pub async fn probe_behavior(
        &self,
        env: &Environment,
        target: &str,
        baseline: &BehaviorBaseline,
    ) -> DriftItemResult {
        let observed = self
            .client
            .run_behavior_test(env, &baseline.test_case, &baseline.parameters)
            .await;
        self.finish(env, DriftDomain::Behavior, target, observed, &baseline.expected_results)
    }

    fn finish(
        &self,
        env: &Environment,
        domain: DriftDomain,
        target: &str,
        observed: Result<Value, RemoteError>,
        expected: &Value,
    ) -> DriftItemResult {
        match observed {
            Ok(actual) => {
                let score = similarity::score(Some(&actual), Some(expected));
                let result = DriftItemResult::scored(score, self.threshold);
                debug!(
                    environment = %env,
                    %domain,
                    target_id = target,
                    drift_score = score,
                    passing = result.passing,
                    "probe scored"
                );
                result
            }
            Err(e) => {
                warn!(environment = %env, %domain, target_id = target, error = %e, "probe failed");
                DriftItemResult::failed(e.to_string())
            }
        }
    }

    /// Probe every configured target of one domain concurrently.
    pub async fn run_domain(
        &self,
        env: &Environment,
        baselines: &BaselineSet,
        domain: DriftDomain,
    ) -> DomainResults {
        let probes: Vec<BoxFuture<'_, (String, DriftItemResult)>> = match domain {
            DriftDomain::Api => baselines
                .api
                .iter()
                .map(|(id, b)| async move { (id.clone(), self.probe_api(env, id, b).await) }.boxed())
                .collect(),
            DriftDomain::Ui => baselines
                .ui
                .iter()
                .map(|(id, b)| async move { (id.clone(), self.probe_ui(env, id, b).await) }.boxed())
                .collect(),
            DriftDomain::Behavior => baselines
                .behavior
                .iter()
                .map(|(id, b)| {
                    async move { (id.clone(), self.probe_behavior(env, id, b).await) }.boxed()
                })
                .collect(),
        };
        join_all(probes).await.into_iter().collect()
    }

    /// Probe all three domains and consolidate them into a report.
    pub async fn run_all(&self, env: &Environment, baselines: &BaselineSet) -> DriftReport {
        let (api, ui, behavior) = tokio::join!(
            self.run_domain(env, baselines, DriftDomain::Api),
            self.run_domain(env, baselines, DriftDomain::Ui),
            self.run_domain(env, baselines, DriftDomain::Behavior),
        );
        DriftReport::new(env.name.clone(), api, ui, behavior)
    }
}
