//! Runtime context shared across a worker's requests: the response context of
//! the most recently executed request, and the process-wide global context
//! that `register` steps write into and templates/assertions read from.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

/// Everything a template, assertion, or register rule can see about the
/// response that was just received.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub body_json: Option<Value>,
    pub elapsed_ms: u64,
}

impl ResponseContext {
    /// Build the merged `_ctx` view used by condition/template resolution:
    /// `_ctx.response.status`, `_ctx.response.body`, `_ctx.response.body_json`,
    /// `_ctx.response.body_length`, `_ctx.response.header.<name>`, `_ctx.elapsed_ms`.
    pub fn as_value(&self) -> Value {
        let mut headers = serde_json::Map::new();
        for (k, v) in &self.headers {
            headers.insert(k.to_ascii_lowercase(), Value::String(v.clone()));
        }
        let mut response = serde_json::Map::new();
        response.insert("status".into(), Value::from(self.status));
        response.insert("header".into(), Value::Object(headers));
        response.insert("body".into(), Value::String(self.body.clone()));
        response.insert(
            "body_length".into(),
            Value::from(self.body.len() as u64),
        );
        response.insert(
            "body_json".into(),
            self.body_json.clone().unwrap_or(Value::Null),
        );

        let mut ctx = serde_json::Map::new();
        ctx.insert("response".into(), Value::Object(response));
        ctx.insert("elapsed_ms".into(), Value::from(self.elapsed_ms));
        Value::Object(ctx)
    }
}

/// Process-wide map of registered values, last-writer-wins, shared by all
/// workers. Plain `RwLock<HashMap>` rather than a lock-free map: the pack
/// carries no lock-free-map dependency, and reads happen inside no `.await`.
#[derive(Default)]
pub struct GlobalContext {
    values: RwLock<HashMap<String, Value>>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut guard = self.values.write().expect("global context lock poisoned");
        guard.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let guard = self.values.read().expect("global context lock poisoned");
        guard.get(key).cloned()
    }

    /// Snapshot the whole map as a `serde_json::Value` for condition/template
    /// evaluation, so a single read-lock covers a whole resolution pass.
    pub fn snapshot(&self) -> Value {
        let guard = self.values.read().expect("global context lock poisoned");
        Value::Object(guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
