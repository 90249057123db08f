//! Per-request dispatch: snapshot the inbound request, select the winning
//! interaction, render its response, and keep diagnostic state for requests
//! that matched nothing.
//!
//! Dispatch never errors across the socket boundary. Caller-visible faults
//! from rule evaluation become 500-class responses; the server keeps serving.

use crate::config::{DataStore, Settings};
use crate::error::Result;
use crate::interaction::Interaction;
use crate::matcher::body::{match_path, matches_fields, matches_value};
use crate::matcher::graphql::{self, GraphQlOperation};
use crate::store::InteractionStore;
use crate::template;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Request, Response, StatusCode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Snapshot of an inbound request, built once the body is fully received.
#[derive(Debug, Clone)]
pub struct ObservedRequest {
    pub method: String,
    pub path: String,
    /// Query parameters, URL-decoded
    pub query: HashMap<String, String>,
    /// Headers with lowercased names
    pub headers: HashMap<String, String>,
    /// Raw body, if any
    pub body: Option<String>,
    /// Body parsed as JSON when it is valid JSON
    pub json: Option<Value>,
    /// GraphQL operation when the request carries one
    pub graphql: Option<GraphQlOperation>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Diagnostic record of a request that matched no interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub timestamp: String,
}

/// Parse a query string into URL-decoded key/value pairs.
///
/// A component whose percent-encoding does not decode to valid UTF-8 is kept
/// verbatim rather than discarded.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&').filter(|s| !s.is_empty()) {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(decode_component(key), decode_component(value));
            } else {
                params.insert(decode_component(pair), String::new());
            }
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!(component = %raw, error = %e, "undecodable query component kept verbatim");
            raw.to_string()
        }
    }
}

/// The request handler wired to every inbound connection.
///
/// Takes the store and data store by construction so tests can substitute
/// them without runtime patching.
pub struct Dispatcher {
    store: Arc<InteractionStore>,
    data: Arc<DataStore>,
    settings: Settings,
    unmatched: RwLock<Vec<UnmatchedRequest>>,
}

impl Dispatcher {
    pub fn new(store: Arc<InteractionStore>, data: Arc<DataStore>, settings: Settings) -> Self {
        Self {
            store,
            data,
            settings,
            unmatched: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<InteractionStore> {
        &self.store
    }

    /// Requests that matched no interaction, in arrival order.
    pub fn unmatched_requests(&self) -> Vec<UnmatchedRequest> {
        self.unmatched.read().clone()
    }

    /// Drop retained unmatched-request records. Used between test cases.
    pub fn clear_unmatched(&self) {
        self.unmatched.write().clear();
    }

    /// Handle one inbound request end to end.
    pub async fn dispatch(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let observed = Self::observe(req).await;

        let selected = match self.select(&observed) {
            Ok(selected) => selected,
            Err(e) => {
                error!(error = %e, method = %observed.method, path = %observed.path, "evaluation fault during dispatch");
                return json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": e.to_string() }),
                );
            }
        };

        match selected {
            Some((interaction, path_params)) => {
                self.respond(&interaction, &observed, &path_params).await
            }
            None => self.respond_unmatched(&observed),
        }
    }

    /// Build the observed-request snapshot, awaiting full body reception.
    async fn observe(req: Request<Incoming>) -> ObservedRequest {
        let method = req.method().to_string();
        let uri = req.uri().clone();
        let headers: HashMap<String, String> = req
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_lowercase(),
                    v.to_str().unwrap_or("").to_string(),
                )
            })
            .collect();

        let body = match req.into_body().collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                if bytes.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(&bytes).to_string())
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                None
            }
        };

        let query = parse_query_string(uri.query());
        let json = body.as_deref().and_then(|b| serde_json::from_str(b).ok());
        let graphql = graphql::extract_operation(&method, &query, json.as_ref());

        ObservedRequest {
            method,
            path: uri.path().to_string(),
            query,
            headers,
            body,
            json,
            graphql,
            received_at: chrono::Utc::now(),
        }
    }

    /// Run the matching pipeline: most-recently-added interaction first, so
    /// the last registration wins ties and test-local stubs override shared
    /// fixtures.
    fn select(
        &self,
        observed: &ObservedRequest,
    ) -> Result<Option<(Arc<Interaction>, HashMap<String, String>)>> {
        let snapshot = self.store.snapshot();
        for interaction in snapshot.iter().rev() {
            if let Some(path_params) = self.matches(interaction, observed)? {
                debug!(id = %interaction.id, path = %observed.path, "interaction matched");
                return Ok(Some((Arc::clone(interaction), path_params)));
            }
        }
        Ok(None)
    }

    /// Test every configured predicate of one interaction. Returns captured
    /// path parameters on a full match.
    fn matches(
        &self,
        interaction: &Interaction,
        observed: &ObservedRequest,
    ) -> Result<Option<HashMap<String, String>>> {
        let request = &interaction.request;

        if request.method != observed.method {
            return Ok(None);
        }

        let Some(path_params) = match_path(&request.path, &observed.path) else {
            return Ok(None);
        };

        if let Some(expected) = &request.graphql {
            let Some(operation) = &observed.graphql else {
                return Ok(None);
            };
            if !graphql::matches_graphql(expected, operation)? {
                return Ok(None);
            }
        }

        if let Some(expected) = &request.query_params {
            if !matches_fields(expected, &observed.query, interaction.strict, false)? {
                return Ok(None);
            }
        }

        if let Some(expected) = &request.headers {
            if !matches_fields(expected, &observed.headers, interaction.strict, true)? {
                return Ok(None);
            }
        }

        if let Some(expected) = &request.body {
            let observed_body = observed
                .json
                .clone()
                .or_else(|| observed.body.clone().map(Value::String));
            if !matches_value(expected, observed_body.as_ref(), interaction.strict)? {
                return Ok(None);
            }
        }

        Ok(Some(path_params))
    }

    /// Render the winning interaction's response.
    async fn respond(
        &self,
        interaction: &Interaction,
        observed: &ObservedRequest,
        path_params: &HashMap<String, String>,
    ) -> Response<Full<Bytes>> {
        let count = interaction.record_call();
        debug!(id = %interaction.id, exercised = count, "exercised interaction");

        if let Some(on_call) = &interaction.response.on_call {
            (on_call.0)(observed);
        }

        if let Some(delay) = &interaction.response.delay {
            tokio::time::sleep(Duration::from_millis(delay.duration_ms())).await;
        }

        let body = match &interaction.response.render {
            Some(render) => Some((render.0)(observed)),
            None => interaction
                .response
                .body
                .as_ref()
                .map(|b| template::render_value(b, observed, path_params, &self.data)),
        };

        let status = match StatusCode::from_u16(interaction.response.status) {
            Ok(status) => status,
            Err(_) => {
                error!(id = %interaction.id, status = interaction.response.status, "invalid response status");
                return json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": format!("invalid response status {}", interaction.response.status) }),
                );
            }
        };

        // Insert, not append: a response-spec header replaces a default
        // header sharing its name instead of being emitted alongside it.
        let mut headers = HeaderMap::new();
        for (name, value) in self
            .settings
            .default_headers
            .iter()
            .chain(interaction.response.headers.iter())
        {
            let parsed_name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(id = %interaction.id, header = %name, error = %e, "skipping invalid response header name");
                    continue;
                }
            };
            let parsed_value = match HeaderValue::from_str(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(id = %interaction.id, header = %name, error = %e, "skipping invalid response header value");
                    continue;
                }
            };
            headers.insert(parsed_name, parsed_value);
        }

        let bytes = match &body {
            None => Bytes::new(),
            Some(Value::String(s)) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                }
                Bytes::from(s.clone())
            }
            Some(value) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Bytes::from(value.to_string())
            }
        };

        let mut response = Response::new(Full::new(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Deterministic no-match response plus a retained diagnostic record.
    fn respond_unmatched(&self, observed: &ObservedRequest) -> Response<Full<Bytes>> {
        warn!(method = %observed.method, path = %observed.path, "no interaction matched");

        self.unmatched.write().push(UnmatchedRequest {
            method: observed.method.clone(),
            path: observed.path.clone(),
            query: observed.query.clone(),
            headers: observed.headers.clone(),
            body: observed.body.clone(),
            timestamp: observed.received_at.to_rfc3339(),
        });

        let status = StatusCode::from_u16(self.settings.not_found_status)
            .unwrap_or(StatusCode::NOT_FOUND);
        json_response(
            status,
            &json!({
                "error": "No interaction found",
                "method": observed.method,
                "path": observed.path,
            }),
        )
    }
}

/// Build a JSON response; infallible for valid status codes.
fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    match builder.body(Full::new(Bytes::from(body.to_string()))) {
        Ok(response) => response,
        Err(_) => {
            // Static parts only; cannot fail. Kept as a guard for hyper API
            // changes.
            let mut fallback = Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }
    }
}
