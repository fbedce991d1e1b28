//! External collaborators
//!
//! The coordinator only sees these traits. Command-backed implementations
//! drive the host tools named in [`crate::common::HookConfig`]; the memory
//! implementations record every call and back the simulator and tests.

pub mod command;
pub mod memory;
pub mod systemd;
pub mod tls;

pub use command::{CommandLeaderStore, CommandPorts, CommandStatus};
pub use memory::{
    MemoryLeaderStore, MemoryPorts, MemoryStatus, MemorySupervisor, PortEvent, RecordingSleeper,
    SupervisorEvent,
};
pub use systemd::SystemdSupervisor;
pub use tls::{TlsFile, TlsMaterial};

use crate::common::{FleetConfig, Result};
use crate::membership::{EtcdCtl, MembershipClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Process supervisor for the store daemon
pub trait Supervisor: Send + Sync {
    fn stop(&self) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn restart(&self) -> Result<()>;
    fn is_running(&self) -> bool;
    /// Make the supervisor restart the daemon whenever it exits.
    fn install_restart_policy(&self) -> Result<()>;
}

/// Network port exposure; both calls are idempotent.
pub trait PortManager: Send + Sync {
    fn open(&self, port: u16) -> Result<()>;
    fn close(&self, port: u16) -> Result<()>;
}

/// Cluster-wide values written by the leader, read by everyone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishedValues {
    /// Connection string of the node members register against
    pub leader_address: Option<String>,
    /// Membership string at publish time
    pub cluster: Option<String>,
    /// Changes whenever the leader restored from a snapshot
    pub force_rejoin: Option<String>,
}

impl PublishedValues {
    pub fn is_published(&self) -> bool {
        self.leader_address.is_some()
    }
}

pub trait LeaderStore: Send + Sync {
    fn published(&self) -> Result<PublishedValues>;
    /// Merge the `Some` fields of `values`; leader only.
    fn publish(&self, values: &PublishedValues) -> Result<()>;
}

/// Operator-facing status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum Status {
    Active(String),
    Waiting(String),
    Blocked(String),
}

impl Status {
    pub fn state(&self) -> &'static str {
        match self {
            Status::Active(_) => "active",
            Status::Waiting(_) => "waiting",
            Status::Blocked(_) => "blocked",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Active(m) | Status::Waiting(m) | Status::Blocked(m) => m,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.state(), self.message())
    }
}

pub trait StatusSink: Send + Sync {
    fn set(&self, status: Status);
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Everything a coordinator talks to
#[derive(Clone)]
pub struct Host {
    pub membership: Arc<dyn MembershipClient>,
    pub supervisor: Arc<dyn Supervisor>,
    pub ports: Arc<dyn PortManager>,
    pub leader: Arc<dyn LeaderStore>,
    pub status: Arc<dyn StatusSink>,
    pub sleeper: Arc<dyn Sleeper>,
    pub tls: TlsMaterial,
}

impl Host {
    /// Collaborators backed by etcdctl, systemd and the configured hooks
    pub fn system(config: &FleetConfig) -> Self {
        Self {
            membership: Arc::new(EtcdCtl::from_config(config)),
            supervisor: Arc::new(SystemdSupervisor::new(config.daemon.as_str())),
            ports: Arc::new(CommandPorts::new(&config.hooks)),
            leader: Arc::new(CommandLeaderStore::new(&config.hooks)),
            status: Arc::new(CommandStatus::new(&config.hooks)),
            sleeper: Arc::new(ThreadSleeper),
            tls: TlsMaterial::new(config.tls.clone()),
        }
    }
}
