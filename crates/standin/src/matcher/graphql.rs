//! GraphQL operation matching.
//!
//! No execution happens here: an observed `{query, variables}` pair is
//! structurally compared to a stored expectation. Queries are normalized
//! (line comments stripped, whitespace runs collapsed) so formatting never
//! affects the outcome. The operation may arrive query-string encoded on GET
//! or as a JSON body on POST/PUT/PATCH; both forms compare identically.

use super::body::matches_value;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Expected GraphQL operation attached to a request spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlSpec {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

/// GraphQL operation observed on an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlOperation {
    pub query: String,
    pub variables: Option<Value>,
}

/// Normalize a query string: strip `#` line comments, collapse whitespace
/// runs to single spaces, trim the ends.
pub fn normalize_query(query: &str) -> String {
    let without_comments: String = query
        .lines()
        .map(|line| match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join(" ");

    without_comments.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compare an observed operation against the expectation.
///
/// Normalized query strings must be exactly equal. Variables are compared
/// with the body matcher in lenient mode; an expectation without variables
/// ignores whatever the request carried.
pub fn matches_graphql(expected: &GraphQlSpec, observed: &GraphQlOperation) -> Result<bool> {
    if normalize_query(&expected.query) != normalize_query(&observed.query) {
        return Ok(false);
    }
    match &expected.variables {
        Some(expected_variables) => {
            matches_value(expected_variables, observed.variables.as_ref(), false)
        }
        None => Ok(true),
    }
}

/// Extract a GraphQL operation from an inbound request, if one is present.
///
/// GET carries `query` / `variables` as query-string parameters; other
/// methods carry a JSON body with a string `query` field. Anything else is
/// not a GraphQL operation.
pub fn extract_operation(
    method: &str,
    query_params: &HashMap<String, String>,
    json_body: Option<&Value>,
) -> Option<GraphQlOperation> {
    if method.eq_ignore_ascii_case("GET") {
        let query = query_params.get("query")?.clone();
        let variables = query_params
            .get("variables")
            .and_then(|raw| serde_json::from_str(raw).ok());
        return Some(GraphQlOperation { query, variables });
    }

    let body = json_body?.as_object()?;
    let query = body.get("query")?.as_str()?.to_string();
    let variables = body.get("variables").filter(|v| !v.is_null()).cloned();
    Some(GraphQlOperation { query, variables })
}
