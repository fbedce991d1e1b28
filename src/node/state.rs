//! Persisted local coordination state
//!
//! A missing or deleted state file is equivalent to a freshly built node:
//! every latch defaults to unset and every latched action is safe to re-run.

use crate::common::{FleetConfig, PortSettings, Result};
use crate::node::record::ClusterState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// State file name inside `state_dir`
pub const STATE_FILE: &str = "state.json";

/// Local progress markers guarding one-time or gated actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Latches {
    /// This node is a member of the cluster
    pub registered: bool,
    /// This node bootstrapped (or adopted) the published cluster data
    pub leader_configured: bool,
    /// TLS material is in place
    pub ssl_placed: bool,
    /// Rendered config is stale
    pub rerender_config: bool,
    /// Always-restart policy installed for the daemon
    pub service_restart_configured: bool,
    /// etcdctl TLS exports written
    pub client_env_exported: bool,
}

/// Everything the coordinator remembers between triggers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalState {
    pub latches: Latches,
    /// Cluster string adopted at bootstrap or registration
    pub cluster_string: Option<String>,
    pub cluster_state: ClusterState,
    /// Last leader address this node registered against
    pub leader_address: Option<String>,
    /// Immutable once generated
    pub cluster_token: Option<String>,
    /// Client port currently open
    pub open_port: Option<u16>,
    /// Port settings in effect at the end of the last dispatch
    pub seen: Option<PortSettings>,
    /// Published force-rejoin marker this node last acted on
    pub last_force_rejoin: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocalState {
    /// Settle the cluster token: configured value, else a fresh uuid.
    ///
    /// Returns the token in effect; an existing token is never replaced.
    pub fn ensure_token(&mut self, config: &FleetConfig) -> &str {
        self.cluster_token.get_or_insert_with(|| {
            config
                .cluster_token
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        })
    }
}

/// JSON state file with atomic replace
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; a missing file yields the default state.
    pub fn load(&self) -> Result<LocalState> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No state at {}, starting fresh", self.path.display());
                Ok(LocalState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, state: &mut LocalState) -> Result<()> {
        state.updated_at = Some(Utc::now());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_fresh_state() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path());
        let state = file.load().unwrap();
        assert_eq!(state, LocalState::default());
        assert!(!state.latches.registered);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("nested"));

        let mut state = LocalState::default();
        state.latches.registered = true;
        state.cluster_string = Some("node1=https://10.0.0.1:2380".into());
        state.open_port = Some(2379);
        file.save(&mut state).unwrap();

        let loaded = file.load().unwrap();
        assert!(loaded.latches.registered);
        assert_eq!(loaded.open_port, Some(2379));
        assert_eq!(loaded.cluster_string, state.cluster_string);
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_older_state_without_new_fields_loads() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path());
        std::fs::write(file.path(), r#"{"latches":{"registered":true}}"#).unwrap();

        let state = file.load().unwrap();
        assert!(state.latches.registered);
        assert!(!state.latches.client_env_exported);
        assert_eq!(state.cluster_state, ClusterState::Existing);
    }

    #[test]
    fn test_token_is_immutable() {
        let mut config = FleetConfig::for_node("etcd0", "10.0.0.1", "10.0.0.1");
        config.cluster_token = Some("first".into());
        let mut state = LocalState::default();
        assert_eq!(state.ensure_token(&config), "first");

        config.cluster_token = Some("second".into());
        assert_eq!(state.ensure_token(&config), "first");
    }

    #[test]
    fn test_token_generated_when_unset() {
        let config = FleetConfig::for_node("etcd0", "10.0.0.1", "10.0.0.1");
        let mut state = LocalState::default();
        let token = state.ensure_token(&config).to_string();
        assert!(!token.is_empty());
        assert_eq!(state.ensure_token(&config), token);
    }
}
