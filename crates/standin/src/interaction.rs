//! Interaction data model: the registered request expectation paired with the
//! canned response, plus the runtime call-state bookkeeping.

use crate::dispatch::ObservedRequest;
use crate::error::{Error, Result};
use crate::matcher::graphql::GraphQlSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

/// Expected request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// HTTP method; defaults to GET
    #[serde(default = "default_method")]
    pub method: String,
    /// Literal path or template with `{name}` / `:name` placeholder segments
    pub path: String,
    /// Query parameter expectations; `None` leaves the query unconstrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<Map<String, Value>>,
    /// Header expectations; `None` leaves headers unconstrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    /// Body expectation: literal value or nested matcher tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// GraphQL operation expectation
    #[serde(
        default,
        rename = "graphQL",
        skip_serializing_if = "Option::is_none"
    )]
    pub graphql: Option<GraphQlSpec>,
}

/// Response delay applied between match and write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Delay {
    /// Fixed delay in milliseconds
    Fixed(u64),
    /// Random delay within an inclusive range
    Random { min: u64, max: u64 },
}

impl Delay {
    /// Resolve the delay to a concrete duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        match self {
            Delay::Fixed(ms) => *ms,
            Delay::Random { min, max } => {
                use rand::Rng;
                if min >= max {
                    *min
                } else {
                    rand::thread_rng().gen_range(*min..=*max)
                }
            }
        }
    }
}

/// Caller-supplied body producer, invoked with the observed request when the
/// interaction wins a dispatch. Takes precedence over the static body.
#[derive(Clone)]
pub struct BodyFn(pub Arc<dyn Fn(&ObservedRequest) -> Value + Send + Sync>);

impl fmt::Debug for BodyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyFn(..)")
    }
}

/// Caller-supplied callback fired after a successful match.
#[derive(Clone)]
pub struct OnCallFn(pub Arc<dyn Fn(&ObservedRequest) + Send + Sync>);

impl fmt::Debug for OnCallFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnCallFn(..)")
    }
}

/// Canned response description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    /// Status code; defaults to 200
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Literal or templated body; absent means an empty body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
    /// Function-produced body; wins over `body` when present
    #[serde(skip)]
    pub render: Option<BodyFn>,
    /// One-shot callback to run on match
    #[serde(skip)]
    pub on_call: Option<OnCallFn>,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HashMap::new(),
            body: None,
            delay: None,
            render: None,
            on_call: None,
        }
    }
}

/// Expected number of times an interaction must be exercised.
///
/// `Exact(0)` means "any number of times, including zero".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CallExpectation {
    Exact(u64),
    AtLeast { min: u64 },
}

impl Default for CallExpectation {
    fn default() -> Self {
        CallExpectation::AtLeast { min: 1 }
    }
}

impl CallExpectation {
    pub fn satisfied_by(&self, exercised: u64) -> bool {
        match self {
            CallExpectation::Exact(0) => true,
            CallExpectation::Exact(n) => exercised == *n,
            CallExpectation::AtLeast { min } => exercised >= *min,
        }
    }
}

/// Raw interaction as accepted by the registration API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSpec {
    /// Identifier; generated at registration when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Request expectation; mandatory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSpec>,
    #[serde(default)]
    pub response: ResponseSpec,
    /// Strict matching policy: unexpected extra query/header/body keys cause
    /// a non-match. Applies per declared expectation section.
    #[serde(default)]
    pub strict: bool,
    /// Survives store sweeps between test cases
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_calls: Option<CallExpectation>,
}

impl InteractionSpec {
    /// Start a spec from a request expectation. Response defaults to an empty
    /// 200.
    pub fn new(request: RequestSpec) -> Self {
        Self {
            request: Some(request),
            ..Self::default()
        }
    }
}

/// A registered interaction with its runtime call-state.
#[derive(Debug)]
pub struct Interaction {
    pub id: String,
    pub request: RequestSpec,
    pub response: ResponseSpec,
    pub strict: bool,
    pub persistent: bool,
    pub expected_calls: CallExpectation,
    exercised: AtomicU64,
}

impl Interaction {
    /// Validate a raw spec and build the runtime interaction. Malformed specs
    /// fail here with a descriptive error and are never stored.
    pub fn from_spec(spec: InteractionSpec) -> Result<Self> {
        let Some(mut request) = spec.request else {
            return Err(Error::InvalidInteraction("`request` is required".to_string()));
        };
        if request.path.is_empty() {
            return Err(Error::InvalidInteraction(
                "`request.path` is required".to_string(),
            ));
        }
        if request.method.is_empty() {
            return Err(Error::InvalidInteraction(
                "`request.method` is required".to_string(),
            ));
        }
        request.method = request.method.to_uppercase();

        let id = spec
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        Ok(Self {
            id,
            request,
            response: spec.response,
            strict: spec.strict,
            persistent: spec.persistent,
            expected_calls: spec.expected_calls.unwrap_or_default(),
            exercised: AtomicU64::new(0),
        })
    }

    /// Number of times this interaction has won a dispatch.
    pub fn exercised_calls(&self) -> u64 {
        self.exercised.load(Ordering::SeqCst)
    }

    /// Record one exercised call; the counter only ever increases.
    pub(crate) fn record_call(&self) -> u64 {
        self.exercised.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the expected call count has been met.
    pub fn satisfied(&self) -> bool {
        self.expected_calls.satisfied_by(self.exercised_calls())
    }
}
