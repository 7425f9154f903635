//! External tool federation: allowlisted `ext.`-prefixed tools relayed to
//! remote endpoints over a timeout-bounded HTTP client. Local schema
//! validation does not apply to federated calls.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// One allowlisted remote tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalTool {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub description: String,
}

struct AllowlistCache {
    loaded_at: Instant,
    tools: Vec<ExternalTool>,
}

/// Registry of federated tools backed by an allowlist file.
pub struct ExternalToolRegistry {
    allowlist_path: PathBuf,
    refresh: Duration,
    client: reqwest::blocking::Client,
    cache: Mutex<AllowlistCache>,
}

impl ExternalToolRegistry {
    /// Load the allowlist and build the HTTP client. Entries whose names do
    /// not start with `ext.` are dropped with a warning.
    pub fn open(allowlist_path: PathBuf, timeout: Duration, refresh: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("federation client: {}", e)))?;
        let tools = load_allowlist(&allowlist_path)?;
        Ok(Self {
            allowlist_path,
            refresh,
            client,
            cache: Mutex::new(AllowlistCache {
                loaded_at: Instant::now(),
                tools,
            }),
        })
    }

    fn with_fresh_cache<T>(&self, f: impl FnOnce(&[ExternalTool]) -> T) -> T {
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.loaded_at.elapsed() > self.refresh {
            match load_allowlist(&self.allowlist_path) {
                Ok(tools) => {
                    cache.tools = tools;
                    cache.loaded_at = Instant::now();
                }
                Err(e) => {
                    tracing::warn!(target: "membria::federation", error = %e, "allowlist refresh failed");
                }
            }
        }
        f(&cache.tools)
    }

    /// Tool definitions for `tools/list`, with a permissive input schema.
    pub fn list_tools(&self) -> Vec<Value> {
        self.with_fresh_cache(|tools| {
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": {"type": "object"},
                    })
                })
                .collect()
        })
    }

    /// Relay a call to the tool's endpoint.
    pub fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        let endpoint = self.with_fresh_cache(|tools| {
            tools
                .iter()
                .find(|tool| tool.name == name)
                .map(|tool| tool.endpoint.clone())
        });
        let Some(endpoint) = endpoint else {
            return Err(Error::UnknownTool(name.to_string()));
        };

        let response = self
            .client
            .post(&endpoint)
            .json(&json!({"name": name, "arguments": arguments}))
            .send()
            .map_err(|e| Error::QueryFailed(format!("federated call failed: {}", e)))?;
        response
            .json()
            .map_err(|e| Error::QueryFailed(format!("federated response invalid: {}", e)))
    }
}

fn load_allowlist(path: &PathBuf) -> Result<Vec<ExternalTool>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("allowlist {}: {}", path.display(), e)))?;
    let entries: Vec<ExternalTool> = serde_json::from_str(&raw)?;
    let (kept, dropped): (Vec<ExternalTool>, Vec<ExternalTool>) = entries
        .into_iter()
        .partition(|tool| tool.name.starts_with("ext."));
    for tool in dropped {
        tracing::warn!(target: "membria::federation", name = %tool.name, "allowlist entry without ext. prefix dropped");
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_allowlist(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_loads_and_filters_allowlist() {
        let (_dir, path) = write_allowlist(
            r#"[
                {"name": "ext.search", "endpoint": "http://127.0.0.1:9/search", "description": "remote search"},
                {"name": "not-prefixed", "endpoint": "http://127.0.0.1:9/x"}
            ]"#,
        );
        let registry = ExternalToolRegistry::open(
            path,
            Duration::from_secs(1),
            Duration::from_secs(300),
        )
        .unwrap();
        let tools = registry.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "ext.search");
    }

    #[test]
    fn test_unknown_tool() {
        let (_dir, path) = write_allowlist("[]");
        let registry = ExternalToolRegistry::open(
            path,
            Duration::from_secs(1),
            Duration::from_secs(300),
        )
        .unwrap();
        let err = registry.call_tool("ext.ghost", &json!({}));
        assert!(matches!(err, Err(Error::UnknownTool(_))));
    }

    #[test]
    fn test_unreachable_endpoint_is_query_failure() {
        let (_dir, path) = write_allowlist(
            r#"[{"name": "ext.dead", "endpoint": "http://127.0.0.1:1/dead"}]"#,
        );
        let registry = ExternalToolRegistry::open(
            path,
            Duration::from_millis(200),
            Duration::from_secs(300),
        )
        .unwrap();
        let err = registry.call_tool("ext.dead", &json!({}));
        assert!(matches!(err, Err(Error::QueryFailed(_))));
    }

    #[test]
    fn test_missing_allowlist_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExternalToolRegistry::open(
            dir.path().join("missing.json"),
            Duration::from_secs(1),
            Duration::from_secs(300),
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
