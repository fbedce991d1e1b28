//! Membership client: the store's administrative surface
//!
//! Every call is synchronous and fails discretely. Calls take an optional
//! target endpoint so a node can talk to a remote member before it has
//! joined the cluster itself.

pub mod etcdctl;
pub mod memory;

pub use etcdctl::EtcdCtl;
pub use memory::{InMemoryCluster, MembershipCall};

use crate::common::{Error, Result};
use crate::node::NodeRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque member handle, shown in hex as etcdctl expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl std::str::FromStr for MemberId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        u64::from_str_radix(s.trim(), 16)
            .map(MemberId)
            .map_err(|e| Error::Parse(format!("invalid member id {:?}: {}", s, e)))
    }
}

/// One cluster participant, as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Empty while the member is registered but not yet started
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
}

impl Member {
    /// Peer URLs in the comma-joined form etcdctl accepts
    pub fn peer_urls_joined(&self) -> String {
        self.peer_urls.join(",")
    }

    /// Does this entry advertise exactly `peer_url`?
    pub fn advertises(&self, peer_url: &str) -> bool {
        !self.peer_urls.is_empty() && self.peer_urls_joined() == peer_url
    }
}

pub type MemberMap = BTreeMap<MemberId, Member>;

/// Answer to a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Authoritative membership string including the new member
    pub cluster_string: String,
}

/// Health as reported by the store; degraded is a normal result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub status: String,
    pub raw: String,
}

impl ClusterHealth {
    pub fn healthy(raw: impl Into<String>) -> Self {
        Self {
            status: "cluster is healthy".into(),
            raw: raw.into(),
        }
    }

    pub fn unhealthy(raw: impl Into<String>) -> Self {
        Self {
            status: "cluster is unhealthy".into(),
            raw: raw.into(),
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status.contains("unhealthy")
    }
}

/// Facade over the store's member administration
pub trait MembershipClient: Send + Sync {
    /// Current members of the cluster as seen by `target` (local node if `None`).
    fn list_members(&self, target: Option<&str>) -> Result<MemberMap>;

    /// Register `record` with the cluster at `record.leader_address`.
    fn register(&self, record: &NodeRecord) -> Result<Registration>;

    fn unregister(&self, id: MemberId, target: Option<&str>) -> Result<()>;

    /// Rewrite a member's advertised peer URL in place.
    fn update_member(&self, id: MemberId, peer_url: &str) -> Result<String>;

    fn cluster_health(&self, target: Option<&str>) -> ClusterHealth;

    /// Dotted version, or `"n/a"` when it cannot be determined.
    fn version(&self) -> String;
}

/// `name=peer_urls` for every started-or-registering member with peer URLs.
pub fn members_cluster_string(members: &MemberMap) -> String {
    members
        .values()
        .filter(|m| !m.peer_urls.is_empty())
        .map(|m| format!("{}={}", m.name, m.peer_urls_joined()))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, name: &str, peers: &[&str]) -> Member {
        Member {
            id: MemberId(id),
            name: name.into(),
            peer_urls: peers.iter().map(|s| s.to_string()).collect(),
            client_urls: vec![],
        }
    }

    #[test]
    fn test_member_id_hex() {
        let id = MemberId(0x8e9e05c52164694d);
        assert_eq!(id.to_string(), "8e9e05c52164694d");
        assert_eq!("8e9e05c52164694d".parse::<MemberId>().unwrap(), id);
        assert!("zz".parse::<MemberId>().is_err());
    }

    #[test]
    fn test_advertises_exact_match_only() {
        let m = member(1, "node1", &["https://10.0.0.1:2380"]);
        assert!(m.advertises("https://10.0.0.1:2380"));
        assert!(!m.advertises("https://10.0.0.1:2381"));
        assert!(!member(2, "", &[]).advertises(""));
    }

    #[test]
    fn test_members_cluster_string_skips_registering() {
        let mut members = MemberMap::new();
        members.insert(MemberId(1), member(1, "node1", &["https://10.0.0.1:2380"]));
        members.insert(MemberId(2), member(2, "", &[]));
        members.insert(MemberId(3), member(3, "node3", &["https://10.0.0.3:2380"]));
        assert_eq!(
            members_cluster_string(&members),
            "node1=https://10.0.0.1:2380,node3=https://10.0.0.3:2380"
        );
    }

    #[test]
    fn test_health_status() {
        assert!(!ClusterHealth::healthy("ok").is_unhealthy());
        assert!(ClusterHealth::unhealthy("bad").is_unhealthy());
    }
}
