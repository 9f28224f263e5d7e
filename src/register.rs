//! Register: extracts a value out of a response and writes it into the
//! global context under a caller-chosen key, so later requests' templates
//! and assertions can reference it.
//!
//! Grounded on the teacher's `extractor.rs` (JSON-path/regex/header
//! extraction, thiserror error enum).

use serde::{Deserialize, Serialize};
use serde_json_path::JsonPath;
use thiserror::Error;

use crate::context::{GlobalContext, ResponseContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRule {
    /// Key written into the global context.
    pub name: String,
    pub source: RegisterSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum RegisterSource {
    JsonPath { path: String },
    Header { name: String },
    Regex { pattern: String },
    Status,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("invalid JSONPath '{0}': {1}")]
    InvalidJsonPath(String, String),
    #[error("invalid regex '{0}': {1}")]
    InvalidRegex(String, regex::Error),
    #[error("JSONPath '{0}' matched no value")]
    NoMatch(String),
    #[error("regex '{0}' did not match response body")]
    RegexNoMatch(String),
    #[error("header '{0}' not present in response")]
    HeaderMissing(String),
}

/// Run every rule against `response`, writing successful extractions into
/// `ctx`. Returns the first error encountered, if any, after attempting all
/// rules (so a single bad rule doesn't hide failures in later ones from the
/// caller's logs — the worker still treats the first error as fatal for
/// this step).
pub fn apply_rules(
    rules: &[RegisterRule],
    response: &ResponseContext,
    ctx: &GlobalContext,
) -> Result<(), RegisterError> {
    let mut first_err = None;
    for rule in rules {
        match extract(rule, response) {
            Ok(value) => ctx.set(rule.name.clone(), value),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn extract(
    rule: &RegisterRule,
    response: &ResponseContext,
) -> Result<serde_json::Value, RegisterError> {
    match &rule.source {
        RegisterSource::Status => Ok(serde_json::Value::from(response.status)),
        RegisterSource::Header { name } => response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| serde_json::Value::String(v.clone()))
            .ok_or_else(|| RegisterError::HeaderMissing(name.clone())),
        RegisterSource::Regex { pattern } => {
            let re = regex::Regex::new(pattern)
                .map_err(|e| RegisterError::InvalidRegex(pattern.clone(), e))?;
            re.captures(&response.body)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| serde_json::Value::String(m.as_str().to_string()))
                .ok_or_else(|| RegisterError::RegexNoMatch(pattern.clone()))
        }
        RegisterSource::JsonPath { path } => {
            let body = response
                .body_json
                .clone()
                .unwrap_or(serde_json::Value::Null);
            let jp = JsonPath::parse(path)
                .map_err(|e| RegisterError::InvalidJsonPath(path.clone(), e.to_string()))?;
            jp.query(&body)
                .first()
                .cloned()
                .cloned()
                .ok_or_else(|| RegisterError::NoMatch(path.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_body(body: &str) -> ResponseContext {
        ResponseContext {
            status: 200,
            headers: [("X-Token".to_string(), "abc123".to_string())]
                .into_iter()
                .collect(),
            body: body.to_string(),
            body_json: serde_json::from_str(body).ok(),
            elapsed_ms: 10,
        }
    }

    #[test]
    fn extracts_status_code() {
        let response = response_with_body("{}");
        let rule = RegisterRule {
            name: "code".into(),
            source: RegisterSource::Status,
        };
        let ctx = GlobalContext::new();
        apply_rules(&[rule], &response, &ctx).unwrap();
        assert_eq!(ctx.get("code"), Some(serde_json::Value::from(200)));
    }

    #[test]
    fn extracts_header_case_insensitively() {
        let response = response_with_body("{}");
        let rule = RegisterRule {
            name: "token".into(),
            source: RegisterSource::Header {
                name: "x-token".into(),
            },
        };
        let ctx = GlobalContext::new();
        apply_rules(&[rule], &response, &ctx).unwrap();
        assert_eq!(
            ctx.get("token"),
            Some(serde_json::Value::String("abc123".into()))
        );
    }

    #[test]
    fn extracts_json_path_value() {
        let response = response_with_body(r#"{"data":{"id":"u-1"}}"#);
        let rule = RegisterRule {
            name: "user_id".into(),
            source: RegisterSource::JsonPath {
                path: "$.data.id".into(),
            },
        };
        let ctx = GlobalContext::new();
        apply_rules(&[rule], &response, &ctx).unwrap();
        assert_eq!(
            ctx.get("user_id"),
            Some(serde_json::Value::String("u-1".into()))
        );
    }

    #[test]
    fn extracts_regex_capture_group() {
        let response = response_with_body("session=abc-999;path=/");
        let rule = RegisterRule {
            name: "session".into(),
            source: RegisterSource::Regex {
                pattern: "session=([a-z0-9-]+)".into(),
            },
        };
        let ctx = GlobalContext::new();
        apply_rules(&[rule], &response, &ctx).unwrap();
        assert_eq!(
            ctx.get("session"),
            Some(serde_json::Value::String("abc-999".into()))
        );
    }

    #[test]
    fn missing_json_path_returns_no_match_error() {
        let response = response_with_body(r#"{"data":{}}"#);
        let rule = RegisterRule {
            name: "missing".into(),
            source: RegisterSource::JsonPath {
                path: "$.data.id".into(),
            },
        };
        let ctx = GlobalContext::new();
        let err = apply_rules(&[rule], &response, &ctx).unwrap_err();
        assert!(matches!(err, RegisterError::NoMatch(_)));
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn continues_applying_rules_after_one_fails() {
        let response = response_with_body("{}");
        let rules = vec![
            RegisterRule {
                name: "missing".into(),
                source: RegisterSource::Header {
                    name: "Nope".into(),
                },
            },
            RegisterRule {
                name: "code".into(),
                source: RegisterSource::Status,
            },
        ];
        let ctx = GlobalContext::new();
        let err = apply_rules(&rules, &response, &ctx).unwrap_err();
        assert!(matches!(err, RegisterError::HeaderMissing(_)));
        assert_eq!(ctx.get("code"), Some(serde_json::Value::from(200)));
    }
}
