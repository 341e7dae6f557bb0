//! Query: one unit of work sent to the remote service.
//!
//! The dispatcher treats the payload as opaque JSON. The only field it
//! reads is `echoData`, which the service echoes back and which callers
//! use to match outcomes to queries after completion-order reordering.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use url::Url;

/// Field carrying the caller's correlation token.
pub const ECHO_DATA: &str = "echoData";

/// Immutable, cheaply clonable query payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(Arc<Map<String, Value>>);

impl Query {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(Arc::new(fields))
    }

    /// Builds a query from any JSON value; returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::new(map)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The correlation token, if the caller supplied one.
    pub fn echo_data(&self) -> Option<&Value> {
        self.0.get(ECHO_DATA)
    }

    /// The `url` field as a string, used in log lines.
    pub fn url(&self) -> Option<&str> {
        self.0.get("url").and_then(Value::as_str)
    }

    /// JSON request body for the transport.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&*self.0)
    }
}

/// The query's `url` field is present but not a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected a string url, got {found}")]
pub struct InvalidQuery {
    found: &'static str,
}

impl Query {
    /// Query with its `url` made safe to send: characters the service does
    /// not accept in URLs (spaces, non-ASCII, `<>"{}|\^` and backtick) are
    /// percent-encoded and internationalized hosts are punycoded. Returns
    /// `self` unchanged when nothing needs escaping or there is no `url`.
    pub fn normalized(&self) -> Result<Query, InvalidQuery> {
        let url = match self.0.get("url") {
            None => return Ok(self.clone()),
            Some(Value::String(url)) => url,
            Some(other) => {
                return Err(InvalidQuery {
                    found: json_type(other),
                })
            }
        };
        if !needs_escaping(url) {
            return Ok(self.clone());
        }
        let Some(safe) = safe_url(url) else {
            return Ok(self.clone());
        };
        let mut fields = (*self.0).clone();
        fields.insert("url".to_string(), Value::String(safe));
        Ok(Query::new(fields))
    }
}

fn needs_escaping(url: &str) -> bool {
    url.bytes()
        .any(|b| !b.is_ascii_graphic() || b"\"<>\\^`{|}".contains(&b))
}

/// Re-serializes `url` through the WHATWG parser, which percent-encodes
/// unsafe path, query and fragment characters. `None` if it does not parse.
fn safe_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let mut safe = parsed.to_string();
    // The parser adds a root path to bare origins; keep the input's shape.
    if parsed.path() == "/" && !url.trim_end().ends_with('/') && !safe.contains(['?', '#']) {
        safe.pop();
    }
    Some(safe)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<Map<String, Value>> for Query {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_objects_become_queries() {
        assert!(Query::from_value(json!({"url": "https://a.example"})).is_some());
        assert!(Query::from_value(json!(["https://a.example"])).is_none());
        assert!(Query::from_value(json!("https://a.example")).is_none());
    }

    #[test]
    fn echo_data_is_passed_through_untouched() {
        let q = Query::from_value(json!({
            "url": "https://a.example",
            "echoData": {"row": 7, "tags": ["x"]},
        }))
        .unwrap();
        assert_eq!(q.echo_data(), Some(&json!({"row": 7, "tags": ["x"]})));
        assert_eq!(q.url(), Some("https://a.example"));
        let body: Value = serde_json::from_slice(&q.to_json_bytes().unwrap()).unwrap();
        assert_eq!(body["echoData"]["row"], 7);
    }

    #[test]
    fn safe_urls_are_left_alone() {
        let q = Query::from_value(json!({"url": "https://a.example/p?q=1", "echoData": 1})).unwrap();
        assert_eq!(q.normalized().unwrap(), q);
        let bare = Query::from_value(json!({"product": true})).unwrap();
        assert_eq!(bare.normalized().unwrap(), bare);
    }

    #[test]
    fn unsafe_characters_are_escaped() {
        let q = Query::from_value(json!({
            "url": "https://a.example/a b/ü?q=x y",
            "echoData": "orig",
        }))
        .unwrap();
        let n = q.normalized().unwrap();
        assert_eq!(n.url(), Some("https://a.example/a%20b/%C3%BC?q=x%20y"));
        assert_eq!(n.echo_data(), Some(&json!("orig")));
        // The caller's query is untouched.
        assert_eq!(q.url(), Some("https://a.example/a b/ü?q=x y"));
    }

    #[test]
    fn international_hosts_are_punycoded() {
        let q = Query::from_value(json!({"url": "https://bücher.example"})).unwrap();
        assert_eq!(q.normalized().unwrap().url(), Some("https://xn--bcher-kva.example"));
    }

    #[test]
    fn non_string_url_is_rejected() {
        let q = Query::from_value(json!({"url": 42})).unwrap();
        let err = q.normalized().unwrap_err();
        assert_eq!(err.to_string(), "expected a string url, got number");
    }
}
