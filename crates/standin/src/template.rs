//! Response body token substitution.
//!
//! Supported tokens:
//!
//! - `${request.path}` - the request path
//! - `${request.method}` - the HTTP method
//! - `${request.body}` - the raw request body
//! - `${request.query.<name>}` - query parameter value
//! - `${request.headers.<name>}` - header value (case-insensitive)
//! - `${request.pathParams.<name>}` - captured path template segment
//! - `${stores.<name>}` - process-wide data store entry
//!
//! Unresolvable tokens are left in place so a missing value is visible in
//! the rendered response rather than silently blanked.

use crate::config::DataStore;
use crate::dispatch::ObservedRequest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static TEMPLATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{(request|stores)\.([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_-]*)?)\}")
        .expect("template token regex is valid")
});

/// Substitute tokens in every string leaf of a body value.
pub fn render_value(
    body: &Value,
    observed: &ObservedRequest,
    path_params: &HashMap<String, String>,
    data: &DataStore,
) -> Value {
    match body {
        Value::String(s) => Value::String(render_str(s, observed, path_params, data)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, observed, path_params, data))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, observed, path_params, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute tokens in a single string.
pub fn render_str(
    template: &str,
    observed: &ObservedRequest,
    path_params: &HashMap<String, String>,
    data: &DataStore,
) -> String {
    TEMPLATE_REGEX
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let source = &caps[1];
            let token = &caps[2];
            let resolved = match source {
                "request" => resolve_request_token(token, observed, path_params),
                "stores" => data.render(token),
                _ => None,
            };
            resolved.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn resolve_request_token(
    token: &str,
    observed: &ObservedRequest,
    path_params: &HashMap<String, String>,
) -> Option<String> {
    match token {
        "path" => return Some(observed.path.clone()),
        "method" => return Some(observed.method.clone()),
        "body" => return Some(observed.body.clone().unwrap_or_default()),
        _ => {}
    }

    let (section, name) = token.split_once('.')?;
    match section {
        "query" => observed.query.get(name).cloned(),
        "headers" => observed.headers.get(&name.to_lowercase()).cloned(),
        "pathParams" => path_params.get(name).cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observed() -> ObservedRequest {
        ObservedRequest {
            method: "GET".to_string(),
            path: "/api/projects/42".to_string(),
            query: [("date".to_string(), "2020-06-24".to_string())]
                .into_iter()
                .collect(),
            headers: [("x-request-id".to_string(), "req-1".to_string())]
                .into_iter()
                .collect(),
            body: Some("raw-body".to_string()),
            json: None,
            graphql: None,
            received_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_request_tokens() {
        let observed = observed();
        let params: HashMap<String, String> =
            [("id".to_string(), "42".to_string())].into_iter().collect();
        let data = DataStore::new();

        let rendered = render_str(
            "${request.method} ${request.path} id=${request.pathParams.id} date=${request.query.date} rid=${request.headers.X-Request-Id} body=${request.body}",
            &observed,
            &params,
            &data,
        );
        assert_eq!(
            rendered,
            "GET /api/projects/42 id=42 date=2020-06-24 rid=req-1 body=raw-body"
        );
    }

    #[test]
    fn test_stores_tokens() {
        let observed = observed();
        let data = DataStore::new();
        data.set("token", "abc");
        let rendered = render_str("Bearer ${stores.token}", &observed, &HashMap::new(), &data);
        assert_eq!(rendered, "Bearer abc");
    }

    #[test]
    fn test_unresolved_tokens_are_left_in_place() {
        let observed = observed();
        let data = DataStore::new();
        let rendered = render_str(
            "${stores.missing} ${request.query.absent}",
            &observed,
            &HashMap::new(),
            &data,
        );
        assert_eq!(rendered, "${stores.missing} ${request.query.absent}");
    }

    #[test]
    fn test_render_value_walks_string_leaves() {
        let observed = observed();
        let data = DataStore::new();
        let body = json!({
            "echo": "${request.path}",
            "nested": { "date": "${request.query.date}" },
            "list": ["${request.method}", 7],
            "untouched": 42
        });
        let rendered = render_value(&body, &observed, &HashMap::new(), &data);
        assert_eq!(
            rendered,
            json!({
                "echo": "/api/projects/42",
                "nested": { "date": "2020-06-24" },
                "list": ["GET", 7],
                "untouched": 42
            })
        );
    }
}
