//! Process-wide configuration.
//!
//! Namespace identity, storage locations, and tunables are resolved once at
//! startup into a [`MembriaConfig`] and threaded into every component
//! constructor. No component reads the environment at call time.

use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;

use crate::error::{Error, Result};

/// The `(tenant_id, team_id, project_id)` triple tagged onto every entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub tenant_id: String,
    pub team_id: String,
    pub project_id: String,
}

impl Namespace {
    pub fn new(
        tenant_id: impl Into<String>,
        team_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            team_id: team_id.into(),
            project_id: project_id.into(),
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new("default", "default", "default")
    }
}

/// Configuration for the decision-memory engine.
#[derive(Debug, Clone)]
pub struct MembriaConfig {
    /// Namespace triple applied to every graph read and write
    pub namespace: Namespace,
    /// Path to the graph database file (`:memory:`-style paths not used;
    /// tests call [`MembriaConfig::in_memory_graph`])
    pub graph_db_path: PathBuf,
    /// Root data directory (calibration profiles, engram queue, logs)
    pub data_dir: PathBuf,
    /// Shared secret for webhook signature verification
    pub webhook_secret: Option<String>,
    /// Timeout applied to outbound HTTP calls
    pub provider_timeout: Duration,
    /// Whether the feature-flagged memory_* tools are served
    pub memory_tools_enabled: bool,
    /// Allowlist file for external tool federation; None disables federation
    pub discovery_allowlist: Option<PathBuf>,
    /// How often the federation allowlist is re-read
    pub discovery_refresh: Duration,
    /// Interval between TTL sweep runs
    pub ttl_sweep_interval: Duration,
    /// Soft cap on the pending-signal queue
    pub pending_soft_cap: usize,
    /// Hard cap on the pending-signal queue; writes beyond it are rejected
    pub pending_hard_cap: usize,
}

impl MembriaConfig {
    /// Build a config rooted at an explicit data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            namespace: Namespace::default(),
            graph_db_path: data_dir.join("graph.db"),
            data_dir,
            webhook_secret: None,
            provider_timeout: Duration::from_secs(15),
            memory_tools_enabled: false,
            discovery_allowlist: None,
            discovery_refresh: Duration::from_secs(300),
            ttl_sweep_interval: Duration::from_secs(300),
            pending_soft_cap: 1000,
            pending_hard_cap: 5000,
        }
    }

    /// Resolve configuration from environment variables, defaulting the data
    /// directory to `~/.membria`. Unrecognized variables are ignored.
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var("MEMBRIA_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".membria"))
                .ok_or_else(|| Error::Config("cannot resolve home directory".into()))?,
        };

        let mut config = Self::new(data_dir);

        if let Ok(path) = std::env::var("MEMBRIA_DB_PATH") {
            config.graph_db_path = PathBuf::from(path);
        }
        if let Ok(tenant) = std::env::var("MEMBRIA_TENANT_ID") {
            config.namespace.tenant_id = tenant;
        }
        if let Ok(team) = std::env::var("MEMBRIA_TEAM_ID") {
            config.namespace.team_id = team;
        }
        if let Ok(project) = std::env::var("MEMBRIA_PROJECT_ID") {
            config.namespace.project_id = project;
        }
        if let Ok(secret) = std::env::var("MEMBRIA_WEBHOOK_SECRET") {
            if !secret.is_empty() {
                config.webhook_secret = Some(secret);
            }
        }
        if let Ok(secs) = std::env::var("MEMBRIA_PROVIDER_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.provider_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(enabled) = std::env::var("MEMBRIA_MEMORY_TOOLS") {
            config.memory_tools_enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        if let Ok(path) = std::env::var("MEMBRIA_DISCOVERY_ALLOWLIST") {
            config.discovery_allowlist = Some(PathBuf::from(path));
        }
        if let Ok(secs) = std::env::var("MEMBRIA_DISCOVERY_REFRESH_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.discovery_refresh = Duration::from_secs(secs);
            }
        }

        Ok(config)
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_memory_tools(mut self, enabled: bool) -> Self {
        self.memory_tools_enabled = enabled;
        self
    }

    /// Directory holding calibration profile files.
    pub fn calibration_dir(&self) -> PathBuf {
        self.data_dir.join("calibration")
    }

    /// Directory holding engram files and the pending queue.
    pub fn engram_dir(&self) -> PathBuf {
        self.data_dir.join("engrams")
    }

    /// Directory holding structured log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MembriaConfig::new("/tmp/membria-test");
        assert_eq!(config.namespace, Namespace::default());
        assert_eq!(config.provider_timeout, Duration::from_secs(15));
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.graph_db_path, PathBuf::from("/tmp/membria-test/graph.db"));
    }

    #[test]
    fn test_builders() {
        let config = MembriaConfig::new("/tmp/x")
            .with_namespace(Namespace::new("acme", "core", "api"))
            .with_webhook_secret("s3cret")
            .with_memory_tools(true);
        assert_eq!(config.namespace.tenant_id, "acme");
        assert_eq!(config.webhook_secret.as_deref(), Some("s3cret"));
        assert!(config.memory_tools_enabled);
    }

    #[test]
    fn test_sub_directories() {
        let config = MembriaConfig::new("/data");
        assert_eq!(config.calibration_dir(), PathBuf::from("/data/calibration"));
        assert_eq!(config.engram_dir(), PathBuf::from("/data/engrams"));
        assert_eq!(config.log_dir(), PathBuf::from("/data/logs"));
    }
}
