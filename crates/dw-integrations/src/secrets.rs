//! Correction token lookup.
//!
//! Config only names the secret (an env var name); the value is resolved at
//! call time and never written to config, logs or stored records.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RemoteError, Result};

#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Env
// ---------------------------------------------------------------------------

/// Reads secrets from process environment variables. Unset and empty values
/// are both reported as [`RemoteError::MissingSecret`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretProvider;

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<String> {
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(RemoteError::MissingSecret(name.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Fixed name → value map.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    values: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<String> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::MissingSecret(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Cached
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CachedSecret {
    value: String,
    fetched_at: Instant,
}

/// Wraps another provider and reuses a fetched value for `ttl`.
///
/// A zero TTL disables caching. Failures are never cached.
#[derive(Debug)]
pub struct CachedSecretProvider<P> {
    inner: P,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSecret>>,
}

impl<P: SecretProvider> CachedSecretProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every cached value.
    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl<P: SecretProvider> SecretProvider for CachedSecretProvider<P> {
    async fn get_secret(&self, name: &str) -> Result<String> {
        if self.ttl.is_zero() {
            return self.inner.get_secret(name).await;
        }

        if let Some(hit) = self.entries.read().await.get(name) {
            if hit.fetched_at.elapsed() < self.ttl {
                return Ok(hit.value.clone());
            }
        }

        let value = self.inner.get_secret(name).await?;
        self.entries.write().await.insert(
            name.to_string(),
            CachedSecret {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }
}
