//! Node identity and connection record
//!
//! Derived fresh for every dispatch from the immutable [`FleetConfig`] and
//! the persisted [`LocalState`]; nothing here is cached across triggers.

use crate::common::{connection_string, FleetConfig, TlsConfig};
use crate::node::state::LocalState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Legacy (2.x) config file name
pub const LEGACY_CONF_FILE: &str = "etcd.conf";
/// Current (3.x) config file name
pub const CONF_FILE: &str = "etcd.conf.yml";
/// Subdirectory of the data dir holding member state
pub const MEMBER_DIR: &str = "member";

/// `initial-cluster-state` of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// First-ever creation of a cluster instance
    New,
    /// Joining a cluster that already exists
    #[default]
    Existing,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::New => write!(f, "new"),
            ClusterState::Existing => write!(f, "existing"),
        }
    }
}

/// "Who am I and how do I connect"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub unit_name: String,
    pub cluster_address: String,
    pub public_address: String,
    pub port: u16,
    pub management_port: u16,
    pub bind_to_all_interfaces: bool,
    pub cluster_token: String,
    pub cluster_string: String,
    pub cluster_state: ClusterState,
    pub leader_address: Option<String>,
    pub etcd_conf_dir: PathBuf,
    pub etcd_data_dir: PathBuf,
    pub tls: TlsConfig,
}

impl NodeRecord {
    pub fn derive(config: &FleetConfig, state: &LocalState) -> Self {
        Self {
            unit_name: config.unit_name.clone(),
            cluster_address: config.cluster_address.clone(),
            public_address: config.public_address.clone(),
            port: config.port,
            management_port: config.management_port,
            bind_to_all_interfaces: config.bind_to_all_interfaces,
            cluster_token: state
                .cluster_token
                .clone()
                .or_else(|| config.cluster_token.clone())
                .unwrap_or_default(),
            cluster_string: state.cluster_string.clone().unwrap_or_default(),
            cluster_state: state.cluster_state,
            leader_address: state.leader_address.clone(),
            etcd_conf_dir: config.conf_dir.clone(),
            etcd_data_dir: config.data_dir.clone(),
            tls: config.tls.clone(),
        }
    }

    /// URL peers use to reach this node
    pub fn peer_url(&self) -> String {
        connection_string(&[&self.cluster_address], self.management_port)
    }

    /// URL clients use to reach this node
    pub fn client_url(&self) -> String {
        connection_string(&[&self.public_address], self.port)
    }

    /// Single-member cluster string naming only this node
    pub fn self_cluster_string(&self) -> String {
        format!("{}={}", self.unit_name, self.peer_url())
    }

    pub fn listen_peer_urls(&self) -> String {
        if self.bind_to_all_interfaces {
            connection_string(&["0.0.0.0"], self.management_port)
        } else {
            self.peer_url()
        }
    }

    pub fn listen_client_urls(&self) -> String {
        if self.bind_to_all_interfaces {
            connection_string(&["0.0.0.0"], self.port)
        } else {
            self.client_url()
        }
    }

    pub fn conf_path(&self) -> PathBuf {
        self.etcd_conf_dir.join(CONF_FILE)
    }

    pub fn legacy_conf_path(&self) -> PathBuf {
        self.etcd_conf_dir.join(LEGACY_CONF_FILE)
    }

    pub fn member_dir(&self) -> PathBuf {
        self.etcd_data_dir.join(MEMBER_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NodeRecord {
        let config = FleetConfig::for_node("node1", "10.0.0.1", "192.168.0.1");
        NodeRecord::derive(&config, &LocalState::default())
    }

    #[test]
    fn test_urls() {
        let record = record();
        assert_eq!(record.peer_url(), "https://10.0.0.1:2380");
        assert_eq!(record.client_url(), "https://192.168.0.1:2379");
        assert_eq!(record.self_cluster_string(), "node1=https://10.0.0.1:2380");
        assert_eq!(record.listen_peer_urls(), "https://10.0.0.1:2380");
    }

    #[test]
    fn test_bind_to_all_interfaces() {
        let mut record = record();
        record.bind_to_all_interfaces = true;
        assert_eq!(record.listen_peer_urls(), "https://0.0.0.0:2380");
        assert_eq!(record.listen_client_urls(), "https://0.0.0.0:2379");
        // Advertised URLs never use the wildcard
        assert_eq!(record.peer_url(), "https://10.0.0.1:2380");
    }

    #[test]
    fn test_defaults_to_existing_state() {
        let record = record();
        assert_eq!(record.cluster_state, ClusterState::Existing);
        assert!(record.cluster_string.is_empty());
        assert!(record.leader_address.is_none());
    }
}
