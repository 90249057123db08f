//! Matching rules for request expectations.
//!
//! A rule is encoded inside a JSON expectation tree as an object carrying the
//! `"$match"` discriminator key, e.g. `{"$match": "like", "value": 10}`.
//! Tree traversal only treats an object as a rule when that key is present
//! and names a known kind, so user data shaped like a rule but lacking the
//! discriminator is matched literally.
//!
//! Rules compose: the template inside `like` or `eachLike` may itself contain
//! further rule nodes, and matching recurses depth-first.

pub mod body;
pub mod graphql;

use crate::error::{Error, Result};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Discriminator key identifying a rule node inside an expectation tree.
pub const RULE_TAG: &str = "$match";

fn default_min() -> usize {
    1
}

/// A single matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$match", rename_all = "camelCase")]
pub enum MatchRule {
    /// Deep structural equality. Object key sets must be identical, arrays
    /// must agree in length and per-index value.
    Exact { value: Value },

    /// Recursive shape match. Objects require every expected key to be
    /// present and match recursively; extra observed keys are always
    /// permitted. Scalars compare by JSON type only.
    Like { value: Value },

    /// The observed value, coerced to a string, must satisfy the pattern.
    /// The only honored flag letter is `i` (case-insensitive).
    Regex {
        pattern: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        flags: String,
    },

    /// The observed value, coerced to a string, must contain the substring.
    Includes { value: String },

    /// The observed value must be an array of at least `min` elements, each
    /// satisfying a shape match against the template.
    EachLike {
        value: Value,
        #[serde(default = "default_min")]
        min: usize,
    },
}

impl MatchRule {
    /// Recognize a rule node inside an expectation tree.
    ///
    /// Returns `None` for plain data. An object that carries the
    /// discriminator but fails to decode is a malformed rule, surfaced as an
    /// error so the dispatcher can report an evaluation fault.
    pub fn detect(value: &Value) -> Option<Result<MatchRule>> {
        let obj = value.as_object()?;
        obj.get(RULE_TAG)?;
        Some(
            serde_json::from_value(value.clone())
                .map_err(|e| Error::InvalidRule(e.to_string())),
        )
    }

    /// Evaluate this rule against an observed value.
    pub fn evaluate(&self, observed: &Value) -> Result<bool> {
        match self {
            MatchRule::Exact { value } => Ok(value == observed),
            MatchRule::Like { value } => like_matches(value, observed),
            MatchRule::Regex { pattern, flags } => {
                let regex = compile_regex(pattern, flags)?;
                Ok(regex.is_match(&coerce_string(observed)))
            }
            MatchRule::Includes { value } => Ok(coerce_string(observed).contains(value.as_str())),
            MatchRule::EachLike { value, min } => {
                let Some(items) = observed.as_array() else {
                    return Ok(false);
                };
                if items.len() < *min {
                    return Ok(false);
                }
                for item in items {
                    if !like_matches(value, item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

/// Shape matching. The template may contain nested rule nodes, which take
/// precedence over shape comparison at their position.
pub fn like_matches(template: &Value, observed: &Value) -> Result<bool> {
    if let Some(rule) = MatchRule::detect(template) {
        return rule?.evaluate(observed);
    }
    match (template, observed) {
        (Value::Object(expected), Value::Object(actual)) => {
            // Extra observed keys are always permitted here, independent of
            // the interaction-level strict flag.
            for (key, expected_value) in expected {
                let Some(actual_value) = actual.get(key) else {
                    return Ok(false);
                };
                if !like_matches(expected_value, actual_value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Array(expected), Value::Array(actual)) => {
            if expected.len() == 1 {
                // Single-element template: at least one observed element must
                // satisfy it (the eachLike idiom).
                for item in actual {
                    if like_matches(&expected[0], item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            } else {
                if expected.len() != actual.len() {
                    return Ok(false);
                }
                for (e, a) in expected.iter().zip(actual.iter()) {
                    if !like_matches(e, a)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
        // Scalars match on JSON type alone, not value.
        (Value::String(_), Value::String(_)) => Ok(true),
        (Value::Number(_), Value::Number(_)) => Ok(true),
        (Value::Bool(_), Value::Bool(_)) => Ok(true),
        (Value::Null, Value::Null) => Ok(true),
        _ => Ok(false),
    }
}

/// Compile a rule regex, honoring the `i` flag.
fn compile_regex(pattern: &str, flags: &str) -> Result<regex::Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .build()
        .map_err(Error::from)
}

/// Coerce an observed value to a string for regex and substring rules.
pub(crate) fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ===== Rule constructors =====
//
// Convenience helpers producing the tagged JSON form, for embedding in
// expectation trees from Rust code.

/// Shape match against the given template.
pub fn like(value: impl Into<Value>) -> Value {
    json!({ "$match": "like", "value": value.into() })
}

/// Deep structural equality against the given value.
pub fn exact(value: impl Into<Value>) -> Value {
    json!({ "$match": "exact", "value": value.into() })
}

/// Regex match over the observed value coerced to a string.
pub fn regex(pattern: impl Into<String>) -> Value {
    json!({ "$match": "regex", "pattern": pattern.into() })
}

/// Regex match with a flag string (`i` for case-insensitive).
pub fn regex_with_flags(pattern: impl Into<String>, flags: impl Into<String>) -> Value {
    json!({ "$match": "regex", "pattern": pattern.into(), "flags": flags.into() })
}

/// Substring containment over the observed value coerced to a string.
pub fn includes(substring: impl Into<String>) -> Value {
    json!({ "$match": "includes", "value": substring.into() })
}

/// Every element of the observed array must shape-match the template.
pub fn each_like(template: impl Into<Value>) -> Value {
    json!({ "$match": "eachLike", "value": template.into() })
}

/// `each_like` with an explicit minimum element count.
pub fn each_like_min(template: impl Into<Value>, min: usize) -> Value {
    json!({ "$match": "eachLike", "value": template.into(), "min": min })
}
