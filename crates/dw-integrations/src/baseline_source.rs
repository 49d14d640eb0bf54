//! Durable storage of baseline documents.
//!
//! A source maps a key (normally `current`) to one raw JSON document.
//! `Ok(None)` means the key is absent; `Err` means the source could not be
//! read at all. Validation of the document happens in `dw_core::baseline`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::environment::read_json;
use crate::error::{RemoteError, Result};

#[async_trait]
pub trait BaselineSource: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Option<Value>>;
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// A JSON file whose root object maps keys to baseline documents. A missing
/// file behaves like an empty map.
#[derive(Debug, Clone)]
pub struct FileBaselineSource {
    path: PathBuf,
}

impl FileBaselineSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BaselineSource for FileBaselineSource {
    async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut root: Value = serde_json::from_str(&text)?;
        match root.as_object_mut() {
            Some(map) => Ok(map.remove(key)),
            None => Err(RemoteError::Decode(format!(
                "{}: root must be an object keyed by baseline name",
                self.path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Fetches `GET {url}/{key}-baseline`. A 404 means the key is absent.
#[derive(Debug, Clone)]
pub struct HttpBaselineSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpBaselineSource {
    pub fn new(url: impl Into<String>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(RemoteError::Http)?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn document_url(&self, key: &str) -> String {
        format!("{}/{key}-baseline", self.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BaselineSource for HttpBaselineSource {
    async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        let resp = self
            .client
            .get(self.document_url(key))
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(e, self.timeout))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(resp, self.timeout).await.map(Some)
    }
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StaticBaselineSource {
    documents: HashMap<String, Value>,
}

impl StaticBaselineSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, document: Value) -> Self {
        self.documents.insert(key.into(), document);
        self
    }
}

#[async_trait]
impl BaselineSource for StaticBaselineSource {
    async fn fetch(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.documents.get(key).cloned())
    }
}
