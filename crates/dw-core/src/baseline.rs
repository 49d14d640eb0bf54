use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::DriftDomain;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure to obtain a complete baseline set. Always fatal at startup.
#[derive(Debug, Error)]
pub enum BaselineLoadError {
    /// The durable source has no document under the requested key.
    #[error("baseline document `{0}` not found")]
    Missing(String),

    /// The document exists but does not describe all three domains.
    #[error("malformed baseline document: {0}")]
    Malformed(String),

    /// The source itself could not be read.
    #[error("baseline source unavailable: {0}")]
    Source(String),
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Expected DOM structure for one UI component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiBaseline {
    pub selector: String,
    pub structure: Value,
}

/// Expected outcome of one parameterised behavior test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorBaseline {
    pub test_case: String,
    #[serde(default)]
    pub parameters: Value,
    pub expected_results: Value,
}

// ---------------------------------------------------------------------------
// BaselineSet
// ---------------------------------------------------------------------------

/// The approved reference shapes for every probed target.
///
/// API entries are the expected response body itself. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
    pub api: BTreeMap<String, Value>,
    pub ui: BTreeMap<String, UiBaseline>,
    pub behavior: BTreeMap<String, BehaviorBaseline>,
}

impl BaselineSet {
    /// Parse and validate a raw baseline document.
    ///
    /// All three domains must be present as objects; a document missing
    /// any of them is rejected rather than partially loaded.
    pub fn from_document(key: &str, document: Value) -> Result<Self, BaselineLoadError> {
        let map = match document {
            Value::Object(map) => map,
            Value::Null => return Err(BaselineLoadError::Missing(key.to_string())),
            _ => {
                return Err(BaselineLoadError::Malformed(
                    "document root must be an object".into(),
                ))
            }
        };

        for domain in DriftDomain::ALL {
            match map.get(domain.as_str()) {
                Some(Value::Object(_)) => {}
                Some(_) => {
                    return Err(BaselineLoadError::Malformed(format!(
                        "`{domain}` must be an object"
                    )))
                }
                None => {
                    return Err(BaselineLoadError::Malformed(format!(
                        "missing `{domain}` section"
                    )))
                }
            }
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| BaselineLoadError::Malformed(e.to_string()))
    }

    /// Target ids configured for a domain, in sorted order.
    pub fn targets(&self, domain: DriftDomain) -> Vec<&str> {
        match domain {
            DriftDomain::Api => self.api.keys().map(String::as_str).collect(),
            DriftDomain::Ui => self.ui.keys().map(String::as_str).collect(),
            DriftDomain::Behavior => self.behavior.keys().map(String::as_str).collect(),
        }
    }

    /// The baseline entry for one target as a JSON value, as sent with
    /// correction requests.
    pub fn entry_json(&self, domain: DriftDomain, target: &str) -> Option<Value> {
        match domain {
            DriftDomain::Api => self.api.get(target).cloned(),
            DriftDomain::Ui => self.ui.get(target).and_then(|e| serde_json::to_value(e).ok()),
            DriftDomain::Behavior => self
                .behavior
                .get(target)
                .and_then(|e| serde_json::to_value(e).ok()),
        }
    }

    pub fn target_count(&self) -> usize {
        self.api.len() + self.ui.len() + self.behavior.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "api": { "health": { "status": "ok" } },
            "ui": { "header": { "selector": "#header", "structure": { "title": "string" } } },
            "behavior": {
                "login": {
                    "testCase": "login_flow",
                    "parameters": { "user": "demo" },
                    "expectedResults": { "authenticated": true }
                }
            }
        })
    }

    #[test]
    fn parses_all_three_domains() {
        let set = BaselineSet::from_document("current", sample()).unwrap();
        assert_eq!(set.target_count(), 3);
        assert_eq!(set.api["health"], json!({"status": "ok"}));
        assert_eq!(set.ui["header"].selector, "#header");
        assert_eq!(set.behavior["login"].test_case, "login_flow");
        assert_eq!(set.targets(DriftDomain::Ui), vec!["header"]);
    }

    #[test]
    fn null_document_is_missing() {
        let err = BaselineSet::from_document("current", Value::Null).unwrap_err();
        assert!(matches!(err, BaselineLoadError::Missing(k) if k == "current"));
    }

    #[test]
    fn partial_document_is_rejected() {
        let mut doc = sample();
        doc.as_object_mut().unwrap().remove("behavior");
        let err = BaselineSet::from_document("current", doc).unwrap_err();
        assert!(err.to_string().contains("behavior"));
    }

    #[test]
    fn ui_entry_without_selector_is_malformed() {
        let doc = json!({
            "api": {},
            "ui": { "header": { "structure": {} } },
            "behavior": {}
        });
        assert!(matches!(
            BaselineSet::from_document("current", doc),
            Err(BaselineLoadError::Malformed(_))
        ));
    }

    #[test]
    fn entry_json_keeps_wire_field_names() {
        let set = BaselineSet::from_document("current", sample()).unwrap();
        let entry = set.entry_json(DriftDomain::Behavior, "login").unwrap();
        assert_eq!(entry["testCase"], "login_flow");
        assert_eq!(entry["expectedResults"]["authenticated"], true);
        assert!(set.entry_json(DriftDomain::Api, "nope").is_none());
    }
}
