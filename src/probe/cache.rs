//! Caching layer for capability reports to avoid re-probing on every refresh.
//!
//! Freshness is judged from each report's `probed_at`, so entries restored
//! from disk age correctly.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::capabilities::{CapabilityDictError, ServerCapabilities};
use crate::transport::Endpoint;

/// Cache duration (5 minutes)
const CACHE_DURATION_SECS: i64 = 5 * 60;

/// Capability reports keyed by endpoint
#[derive(Debug, Clone)]
pub struct CapabilityCache {
    entries: HashMap<Endpoint, ServerCapabilities>,
    freshness: Duration,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            freshness: Duration::seconds(CACHE_DURATION_SECS),
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Get the cached report if still fresh.
    pub fn get(&self, endpoint: &Endpoint) -> Option<&ServerCapabilities> {
        self.entries
            .get(endpoint)
            .filter(|caps| Utc::now() - caps.probed_at < self.freshness)
    }

    /// Get the cached report regardless of freshness.
    pub fn get_stale(&self, endpoint: &Endpoint) -> Option<&ServerCapabilities> {
        self.entries.get(endpoint)
    }

    pub fn set(&mut self, endpoint: Endpoint, capabilities: ServerCapabilities) {
        self.entries.insert(endpoint, capabilities);
    }

    pub fn is_valid(&self, endpoint: &Endpoint) -> bool {
        self.get(endpoint).is_some()
    }

    pub fn invalidate(&mut self, endpoint: &Endpoint) {
        self.entries.remove(endpoint);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize every entry as `[{"endpoint": ..., "capabilities": ...}]`
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|(endpoint, caps)| {
                    json!({
                        "endpoint": {
                            "host": endpoint.host,
                            "port": endpoint.port,
                            "use_tls": endpoint.use_tls,
                        },
                        "capabilities": Value::Object(caps.to_dict()),
                    })
                })
                .collect(),
        )
    }

    /// Restore entries written by [`CapabilityCache::to_json`].
    ///
    /// Malformed entries are skipped with a warning; returns how many loaded.
    pub fn load_json(&mut self, value: &Value) -> usize {
        let Some(items) = value.as_array() else {
            log::warn!("CapabilityCache: expected an array, ignoring cache contents");
            return 0;
        };

        let mut loaded = 0;
        for item in items {
            match parse_entry(item) {
                Ok((endpoint, caps)) => {
                    self.entries.insert(endpoint, caps);
                    loaded += 1;
                }
                Err(e) => log::warn!("CapabilityCache: skipping entry: {}", e),
            }
        }
        loaded
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_entry(item: &Value) -> Result<(Endpoint, ServerCapabilities), String> {
    let endpoint: Endpoint = item
        .get("endpoint")
        .cloned()
        .ok_or_else(|| "missing endpoint".to_string())
        .and_then(|v| serde_json::from_value(v).map_err(|e| e.to_string()))?;

    let dict: &Map<String, Value> = item
        .get("capabilities")
        .and_then(Value::as_object)
        .ok_or_else(|| "missing capabilities".to_string())?;

    let caps = ServerCapabilities::from_dict(dict).map_err(|e: CapabilityDictError| e.to_string())?;
    Ok((endpoint, caps))
}
