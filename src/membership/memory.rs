//! In-process membership store
//!
//! Strongly consistent: every call takes one lock, so membership changes
//! are serialized the same way the real store serializes them. Used by the
//! test suites and by `minikv-fleet simulate`.

use crate::common::{Error, Result};
use crate::membership::{
    members_cluster_string, ClusterHealth, Member, MemberId, MemberMap, MembershipClient,
    Registration,
};
use crate::node::NodeRecord;
use std::sync::{Arc, Mutex, MutexGuard};

/// Recorded call, for asserting protocol order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipCall {
    List { target: Option<String> },
    Register { name: String, peer_url: String },
    Unregister { id: MemberId },
    Update { id: MemberId, peer_url: String },
    Health,
    Version,
}

struct Inner {
    members: MemberMap,
    next_id: u64,
    healthy: bool,
    version: String,
    fail_registers: u32,
    fail_lists: u32,
    fail_updates: u32,
    calls: Vec<MembershipCall>,
}

fn urls(url: &str) -> Vec<String> {
    url.split(',').filter(|u| !u.is_empty()).map(str::to_string).collect()
}

/// Shared handle; clones see the same cluster
#[derive(Clone)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new("3.4.22")
    }
}

impl InMemoryCluster {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                members: MemberMap::new(),
                next_id: 1,
                healthy: true,
                version: version.into(),
                fail_registers: 0,
                fail_lists: 0,
                fail_updates: 0,
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.lock().healthy = healthy;
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.lock().version = version.into();
    }

    /// Make the next `n` register calls fail as if quorum were unavailable.
    pub fn fail_next_registers(&self, n: u32) {
        self.lock().fail_registers = n;
    }

    /// Make the next `n` member listings fail as if unreachable.
    pub fn fail_next_lists(&self, n: u32) {
        self.lock().fail_lists = n;
    }

    /// Make the next `n` peer URL updates fail as if quorum were unavailable.
    pub fn fail_next_updates(&self, n: u32) {
        self.lock().fail_updates = n;
    }

    /// Add a member directly, bypassing the call log.
    pub fn seed_member(&self, name: &str, peer_url: &str, client_url: &str) -> MemberId {
        let mut inner = self.lock();
        let id = MemberId(inner.next_id);
        inner.next_id += 1;
        inner.members.insert(
            id,
            Member {
                id,
                name: name.to_string(),
                peer_urls: urls(peer_url),
                client_urls: urls(client_url),
            },
        );
        id
    }

    pub fn members(&self) -> MemberMap {
        self.lock().members.clone()
    }

    pub fn calls(&self) -> Vec<MembershipCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn cluster_string(&self) -> String {
        members_cluster_string(&self.lock().members)
    }
}

fn failed(command: &str, reason: &str) -> Error {
    Error::CommandFailed {
        command: command.to_string(),
        code: Some(1),
        stderr: reason.to_string(),
    }
}

impl MembershipClient for InMemoryCluster {
    fn list_members(&self, target: Option<&str>) -> Result<MemberMap> {
        let mut inner = self.lock();
        inner.calls.push(MembershipCall::List {
            target: target.map(str::to_string),
        });
        if inner.fail_lists > 0 {
            inner.fail_lists -= 1;
            return Err(failed("member list", "context deadline exceeded"));
        }
        Ok(inner.members.clone())
    }

    fn register(&self, record: &NodeRecord) -> Result<Registration> {
        let mut inner = self.lock();
        let peer_url = record.peer_url();
        inner.calls.push(MembershipCall::Register {
            name: record.unit_name.clone(),
            peer_url: peer_url.clone(),
        });
        if record.leader_address.is_none() {
            return Err(Error::MissingLeader);
        }
        if inner.fail_registers > 0 {
            inner.fail_registers -= 1;
            return Err(failed("member add", "etcdserver: unhealthy cluster"));
        }
        if inner.members.values().any(|m| m.advertises(&peer_url)) {
            return Err(failed("member add", "etcdserver: Peer URLs already exists"));
        }

        let id = MemberId(inner.next_id);
        inner.next_id += 1;
        inner.members.insert(
            id,
            Member {
                id,
                name: record.unit_name.clone(),
                peer_urls: vec![peer_url],
                client_urls: vec![record.client_url()],
            },
        );
        Ok(Registration {
            cluster_string: members_cluster_string(&inner.members),
        })
    }

    fn unregister(&self, id: MemberId, _target: Option<&str>) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(MembershipCall::Unregister { id });
        inner
            .members
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| failed("member remove", "etcdserver: member not found"))
    }

    fn update_member(&self, id: MemberId, peer_url: &str) -> Result<String> {
        let mut inner = self.lock();
        inner.calls.push(MembershipCall::Update {
            id,
            peer_url: peer_url.to_string(),
        });
        if inner.fail_updates > 0 {
            inner.fail_updates -= 1;
            return Err(failed("member update", "etcdserver: unhealthy cluster"));
        }
        let member = inner
            .members
            .get_mut(&id)
            .ok_or_else(|| failed("member update", "etcdserver: member not found"))?;
        member.peer_urls = peer_url.split(',').map(str::to_string).collect();
        Ok(format!("Member {} updated in cluster", id))
    }

    fn cluster_health(&self, _target: Option<&str>) -> ClusterHealth {
        let mut inner = self.lock();
        inner.calls.push(MembershipCall::Health);
        if inner.healthy {
            ClusterHealth::healthy("in-memory cluster is healthy")
        } else {
            ClusterHealth::unhealthy("in-memory cluster is unhealthy")
        }
    }

    fn version(&self) -> String {
        let mut inner = self.lock();
        inner.calls.push(MembershipCall::Version);
        inner.version.clone()
    }
}
