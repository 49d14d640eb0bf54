use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dw_core::types::{DriftDomain, Environment};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{truncate_body, RemoteError, Result};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST {env}/system/correct`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    #[serde(rename = "type")]
    pub kind: DriftDomain,
    pub target: String,
    pub baseline: Value,
    pub token: String,
}

impl fmt::Debug for CorrectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectionRequest")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("baseline", &self.baseline)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl CorrectionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Live endpoints exposed by every monitored environment.
#[async_trait]
pub trait EnvironmentClient: Send + Sync {
    /// `GET {env}/api/{endpoint}` and return the JSON body.
    async fn fetch_api(&self, env: &Environment, endpoint: &str) -> Result<Value>;

    /// `POST {env}/dom-extract {selector}` and return the extracted structure.
    async fn extract_dom(&self, env: &Environment, selector: &str) -> Result<Value>;

    /// `POST {env}/behavior-test {testCase, parameters}` and return the result.
    async fn run_behavior_test(
        &self,
        env: &Environment,
        test_case: &str,
        parameters: &Value,
    ) -> Result<Value>;

    /// `POST {env}/system/correct` with one correction request.
    async fn request_correction(
        &self,
        env: &Environment,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResponse>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// reqwest-backed client. Every call is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct HttpEnvironmentClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpEnvironmentClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(RemoteError::Http)?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = request
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(e, self.timeout))?;
        read_json(resp, self.timeout).await
    }
}

/// Read a JSON body, turning non-2xx statuses into [`RemoteError::Status`].
pub(crate) async fn read_json<T: DeserializeOwned>(resp: Response, timeout: Duration) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body: truncate_body(body),
        });
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| RemoteError::from_reqwest(e, timeout))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl EnvironmentClient for HttpEnvironmentClient {
    async fn fetch_api(&self, env: &Environment, endpoint: &str) -> Result<Value> {
        let url = env.url(&format!("api/{}", endpoint.trim_start_matches('/')));
        self.send(self.client.get(url)).await
    }

    async fn extract_dom(&self, env: &Environment, selector: &str) -> Result<Value> {
        let url = env.url("dom-extract");
        self.send(self.client.post(url).json(&json!({ "selector": selector })))
            .await
    }

    async fn run_behavior_test(
        &self,
        env: &Environment,
        test_case: &str,
        parameters: &Value,
    ) -> Result<Value> {
        let url = env.url("behavior-test");
        let body = json!({ "testCase": test_case, "parameters": parameters });
        self.send(self.client.post(url).json(&body)).await
    }

    async fn request_correction(
        &self,
        env: &Environment,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResponse> {
        let url = env.url("system/correct");
        self.send(self.client.post(url).json(request)).await
    }
}

// ---------------------------------------------------------------------------
// Scripted implementation
// ---------------------------------------------------------------------------

type Scripted<T> = std::result::Result<T, String>;

#[derive(Debug, Default)]
struct Script {
    api: HashMap<(String, String), Scripted<Value>>,
    dom: HashMap<(String, String), Scripted<Value>>,
    behavior: HashMap<(String, String), Scripted<Value>>,
    corrections: HashMap<(String, DriftDomain, String), Scripted<CorrectionResponse>>,
    captured: Vec<(String, CorrectionRequest)>,
}

/// In-process environment with canned responses.
///
/// API responses are keyed by endpoint, UI responses by selector and
/// behavior responses by test case, all per environment name. Unscripted
/// probes fail with a 404; unscripted corrections succeed. Scripted errors
/// surface as a 500 status.
#[derive(Debug, Default)]
pub struct ScriptedEnvironmentClient {
    script: Mutex<Script>,
}

impl ScriptedEnvironmentClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_api(self, env: &str, endpoint: &str, response: Scripted<Value>) -> Self {
        self.script()
            .api
            .insert((env.to_string(), endpoint.to_string()), response);
        self
    }

    pub fn with_dom(self, env: &str, selector: &str, response: Scripted<Value>) -> Self {
        self.script()
            .dom
            .insert((env.to_string(), selector.to_string()), response);
        self
    }

    pub fn with_behavior(self, env: &str, test_case: &str, response: Scripted<Value>) -> Self {
        self.script()
            .behavior
            .insert((env.to_string(), test_case.to_string()), response);
        self
    }

    pub fn with_correction(
        self,
        env: &str,
        domain: DriftDomain,
        target: &str,
        response: Scripted<CorrectionResponse>,
    ) -> Self {
        self.script()
            .corrections
            .insert((env.to_string(), domain, target.to_string()), response);
        self
    }

    /// Correction requests received so far, with the environment name.
    pub fn correction_requests(&self) -> Vec<(String, CorrectionRequest)> {
        self.script().captured.clone()
    }

    fn lookup(
        map: &HashMap<(String, String), Scripted<Value>>,
        env: &Environment,
        key: &str,
    ) -> Result<Value> {
        match map.get(&(env.name.clone(), key.to_string())) {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(msg)) => Err(RemoteError::Status {
                status: 500,
                body: msg.clone(),
            }),
            None => Err(RemoteError::Status {
                status: 404,
                body: format!("no scripted response for `{key}`"),
            }),
        }
    }
}

#[async_trait]
impl EnvironmentClient for ScriptedEnvironmentClient {
    async fn fetch_api(&self, env: &Environment, endpoint: &str) -> Result<Value> {
        Self::lookup(&self.script().api, env, endpoint)
    }

    async fn extract_dom(&self, env: &Environment, selector: &str) -> Result<Value> {
        Self::lookup(&self.script().dom, env, selector)
    }

    async fn run_behavior_test(
        &self,
        env: &Environment,
        test_case: &str,
        _parameters: &Value,
    ) -> Result<Value> {
        Self::lookup(&self.script().behavior, env, test_case)
    }

    async fn request_correction(
        &self,
        env: &Environment,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResponse> {
        let mut script = self.script();
        script.captured.push((env.name.clone(), request.clone()));
        let key = (env.name.clone(), request.kind, request.target.clone());
        match script.corrections.get(&key) {
            Some(Ok(resp)) => Ok(resp.clone()),
            Some(Err(msg)) => Err(RemoteError::Status {
                status: 500,
                body: msg.clone(),
            }),
            None => Ok(CorrectionResponse::ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_request_wire_shape() {
        let req = CorrectionRequest {
            kind: DriftDomain::Ui,
            target: "header".into(),
            baseline: json!({"selector": "#h"}),
            token: "s3cret".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "ui");
        assert_eq!(v["target"], "header");
        assert_eq!(v["token"], "s3cret");
    }

    #[test]
    fn correction_request_debug_redacts_token() {
        let req = CorrectionRequest {
            kind: DriftDomain::Api,
            target: "health".into(),
            baseline: Value::Null,
            token: "s3cret".into(),
        };
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn correction_response_message_is_optional() {
        let r: CorrectionResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(r, CorrectionResponse::ok());
    }

    #[tokio::test]
    async fn scripted_client_defaults() {
        let env = Environment::new("dev", "http://dev");
        let client = ScriptedEnvironmentClient::new()
            .with_api("dev", "health", Ok(json!({"status": "ok"})))
            .with_api("dev", "broken", Err("boom".into()));

        assert_eq!(client.fetch_api(&env, "health").await.unwrap()["status"], "ok");
        assert!(matches!(
            client.fetch_api(&env, "broken").await,
            Err(RemoteError::Status { status: 500, .. })
        ));
        assert!(matches!(
            client.extract_dom(&env, "#missing").await,
            Err(RemoteError::Status { status: 404, .. })
        ));

        let req = CorrectionRequest {
            kind: DriftDomain::Api,
            target: "health".into(),
            baseline: json!({}),
            token: "t".into(),
        };
        assert!(client.request_correction(&env, &req).await.unwrap().success);
        assert_eq!(client.correction_requests().len(), 1);
    }
}
