//! Process-scoped configuration and template data store.
//!
//! Defaults used by the lifecycle API (host, port, not-found status, shared
//! response headers) are explicit state with a `reset` operation for test
//! isolation, rather than ambient globals.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Default port the mock server listens on when `start` receives none.
pub const DEFAULT_PORT: u16 = 9393;

/// Default host the mock server binds to when `start` receives none.
pub const DEFAULT_HOST: &str = "127.0.0.1";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_not_found_status() -> u16 {
    404
}

/// Mock server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Host to bind when `start` is called without one
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind when `start` is called without one
    #[serde(default = "default_port")]
    pub port: u16,
    /// Status returned when no interaction matches
    #[serde(default = "default_not_found_status")]
    pub not_found_status: u16,
    /// Headers added to every rendered response (response spec wins on conflict)
    #[serde(default)]
    pub default_headers: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            not_found_status: default_not_found_status(),
            default_headers: HashMap::new(),
        }
    }
}

impl Settings {
    /// Restore the built-in defaults.
    pub fn reset(&mut self) {
        *self = Settings::default();
    }
}

/// Process-wide key/value state referenced by `${stores.<key>}` tokens in
/// response bodies. Shared between the controlling test process and the
/// serving path.
#[derive(Debug, Default)]
pub struct DataStore {
    values: RwLock<HashMap<String, Value>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Drop all stored values. Used between test cases.
    pub fn reset(&self) {
        self.values.write().clear();
    }

    /// Render a stored value for template substitution. Strings are inserted
    /// as-is; everything else uses its JSON rendering.
    pub(crate) fn render(&self, key: &str) -> Option<String> {
        self.values.read().get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 9393);
        assert_eq!(settings.not_found_status, 404);
        assert!(settings.default_headers.is_empty());
    }

    #[test]
    fn test_settings_reset() {
        let mut settings = Settings::default();
        settings.port = 3000;
        settings.host = "0.0.0.0".to_string();
        settings.reset();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: Settings = serde_json::from_value(json!({ "port": 3000 })).unwrap();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.host, "127.0.0.1");
    }

    #[test]
    fn test_data_store_set_get_reset() {
        let store = DataStore::new();
        store.set("token", "abc123");
        store.set("user", json!({ "id": 1 }));

        assert_eq!(store.get("token"), Some(json!("abc123")));
        assert_eq!(store.render("token"), Some("abc123".to_string()));
        assert_eq!(store.render("user"), Some(r#"{"id":1}"#.to_string()));
        assert_eq!(store.render("missing"), None);

        store.reset();
        assert_eq!(store.get("token"), None);
    }
}
