//! Recursive matching of expectation trees over JSON bodies, plus flat
//! key/value matching for headers and query parameters, and templated path
//! matching.
//!
//! A node in an expectation tree is either a rule (see [`MatchRule`]) or a
//! plain value implying exact equality. The `strict` flag controls whether
//! unexpected extra keys in the observed value cause a non-match; it never
//! applies inside `like`/`eachLike` templates.

use super::{coerce_string, MatchRule};
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Match an expectation tree against an observed JSON value.
///
/// `observed` is `None` when the request carried no value at the expected
/// position; every expectation other than an absent one fails against it.
pub fn matches_value(expected: &Value, observed: Option<&Value>, strict: bool) -> Result<bool> {
    if let Some(rule) = MatchRule::detect(expected) {
        let Some(observed) = observed else {
            return Ok(false);
        };
        return rule?.evaluate(observed);
    }

    let Some(observed) = observed else {
        return Ok(false);
    };

    match (expected, observed) {
        (Value::Object(expected_map), Value::Object(observed_map)) => {
            for (key, expected_value) in expected_map {
                if !matches_value(expected_value, observed_map.get(key), strict)? {
                    return Ok(false);
                }
            }
            if strict {
                for key in observed_map.keys() {
                    if !expected_map.contains_key(key) {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        (Value::Array(expected_items), Value::Array(observed_items)) => {
            if expected_items.len() != observed_items.len() {
                return Ok(false);
            }
            for (e, o) in expected_items.iter().zip(observed_items.iter()) {
                if !matches_value(e, Some(o), strict)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (expected, observed) => Ok(expected == observed),
    }
}

/// Match flat key/value expectations (headers, query parameters) against the
/// observed map.
///
/// Header names are case-insensitive; the caller passes
/// `case_insensitive_keys = true` and an observed map with lowercased keys.
/// Expectation values may be scalars (compared against the observed string
/// rendering) or rule nodes.
pub fn matches_fields(
    expected: &Map<String, Value>,
    observed: &HashMap<String, String>,
    strict: bool,
    case_insensitive_keys: bool,
) -> Result<bool> {
    let lookup = |name: &str| -> Option<&String> {
        if case_insensitive_keys {
            observed.get(&name.to_lowercase())
        } else {
            observed.get(name)
        }
    };

    for (name, expected_value) in expected {
        let Some(observed_value) = lookup(name) else {
            return Ok(false);
        };
        if let Some(rule) = MatchRule::detect(expected_value) {
            if !rule?.evaluate(&Value::String(observed_value.clone()))? {
                return Ok(false);
            }
        } else if &coerce_string(expected_value) != observed_value {
            return Ok(false);
        }
    }

    if strict {
        for name in observed.keys() {
            let mentioned = if case_insensitive_keys {
                expected.keys().any(|k| k.eq_ignore_ascii_case(name))
            } else {
                expected.contains_key(name)
            };
            if !mentioned {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Match a request path against a literal or templated path.
///
/// Placeholder segments are written `{name}` or `:name` and match any single
/// non-empty segment; they are not subject to the strict flag. On success the
/// captured parameters are returned for use by response templating.
pub fn match_path(template: &str, actual: &str) -> Option<HashMap<String, String>> {
    let template_segments: Vec<&str> = template.trim_matches('/').split('/').collect();
    let actual_segments: Vec<&str> = actual.trim_matches('/').split('/').collect();

    if template_segments.len() != actual_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (expected, observed) in template_segments.iter().zip(actual_segments.iter()) {
        if let Some(name) = placeholder_name(expected) {
            if observed.is_empty() {
                return None;
            }
            params.insert(name.to_string(), (*observed).to_string());
        } else if expected != observed {
            return None;
        }
    }
    Some(params)
}

fn placeholder_name(segment: &str) -> Option<&str> {
    if let Some(name) = segment.strip_prefix(':') {
        return (!name.is_empty()).then_some(name);
    }
    segment
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}
