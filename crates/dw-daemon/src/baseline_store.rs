use std::sync::Arc;

use dw_core::baseline::{BaselineLoadError, BaselineSet};
use dw_integrations::baseline_source::BaselineSource;
use tracing::info;

/// Loads the approved baseline set from its durable source.
///
/// The daemon calls [`load`](Self::load) once at startup and shares the
/// result read-only across every environment and cycle.
pub struct BaselineStore {
    source: Arc<dyn BaselineSource>,
    key: String,
}

impl BaselineStore {
    pub fn new(source: Arc<dyn BaselineSource>, key: impl Into<String>) -> Self {
        Self {
            source,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Single read of the document under `key`. Any failure is fatal to the
    /// caller: there is no partial or retried load.
    pub async fn load(&self) -> Result<BaselineSet, BaselineLoadError> {
        let document = self
            .source
            .fetch(&self.key)
            .await
            .map_err(|e| BaselineLoadError::Source(e.to_string()))?
            .ok_or_else(|| BaselineLoadError::Missing(self.key.clone()))?;

        let set = BaselineSet::from_document(&self.key, document)?;
        info!(
            key = %self.key,
            api = set.api.len(),
            ui = set.ui.len(),
            behavior = set.behavior.len(),
            "baselines loaded"
        );
        Ok(set)
    }
}
