//! Per-node transition table
//!
//! [`plan`] is a pure function of the trigger, the role resolved for that
//! trigger, the local latches and the gates observed at dispatch time. The
//! interpreter in `server.rs` executes the steps it returns.

use crate::common::{Error, PortSettings};
use crate::node::Latches;
use serde::{Deserialize, Serialize};

/// Leadership, resolved once per trigger by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "leader" => Ok(Role::Leader),
            "follower" => Ok(Role::Follower),
            other => Err(Error::Parse(format!("unknown role: {}", other))),
        }
    }
}

/// Discrete event delivered by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    /// Periodic status tick
    Tick,
    /// Local configuration changed
    ConfigChanged,
    /// Cluster membership information became available or changed
    PeerJoined,
    /// The certificate provider rewrote TLS material
    TlsWritten,
    /// The leader restored from a snapshot; discard local state and rejoin
    ForceRejoin,
    /// This node is leaving the cluster
    Departing,
    /// The coordinator itself was upgraded; templates may have changed
    Upgraded,
}

impl Trigger {
    pub const ALL: [Trigger; 7] = [
        Trigger::Tick,
        Trigger::ConfigChanged,
        Trigger::PeerJoined,
        Trigger::TlsWritten,
        Trigger::ForceRejoin,
        Trigger::Departing,
        Trigger::Upgraded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Tick => "tick",
            Trigger::ConfigChanged => "config-changed",
            Trigger::PeerJoined => "peer-joined",
            Trigger::TlsWritten => "tls-written",
            Trigger::ForceRejoin => "force-rejoin",
            Trigger::Departing => "departing",
            Trigger::Upgraded => "upgraded",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Trigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Parse(format!("unknown trigger: {}", s)))
    }
}

/// External readiness observed at dispatch time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gates {
    /// Every TLS file has been written
    pub tls_available: bool,
    /// Membership information about peers is available
    pub cluster_joined: bool,
    /// A leader address has been published cluster-wide
    pub cluster_published: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// What changed since the last dispatch that saw the config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDelta {
    pub port: Option<Change<u16>>,
    pub management_port: Option<Change<u16>>,
    pub bind_to_all_interfaces: Option<Change<bool>>,
}

impl ConfigDelta {
    /// Nothing is reported as changed until a previous value is known.
    pub fn between(previous: Option<PortSettings>, current: PortSettings) -> Self {
        fn diff<T: PartialEq + Copy>(old: T, new: T) -> Option<Change<T>> {
            (old != new).then_some(Change { old, new })
        }
        match previous {
            None => Self::default(),
            Some(prev) => Self {
                port: diff(prev.port, current.port),
                management_port: diff(prev.management_port, current.management_port),
                bind_to_all_interfaces: diff(
                    prev.bind_to_all_interfaces,
                    current.bind_to_all_interfaces,
                ),
            },
        }
    }

    pub fn ports_changed(&self) -> bool {
        self.port.is_some() || self.management_port.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.ports_changed() && self.bind_to_all_interfaces.is_none()
    }
}

/// One coordinator operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    ConfigureRestartPolicy,
    AwaitTls,
    PlaceTls,
    ExportClientEnv,
    InitializeCluster,
    AdoptLeadership,
    RegisterWithLeader,
    MigratePeerPort,
    MarkStale,
    RefreshTls,
    Rerender,
    Rejoin,
    Unregister,
    ReportHealth,
}

impl Step {
    /// Phase a node is in while this step runs
    pub fn phase(&self) -> Option<NodePhase> {
        match self {
            Step::InitializeCluster => Some(NodePhase::Initializing),
            Step::RegisterWithLeader | Step::Rejoin => Some(NodePhase::Registering),
            _ => None,
        }
    }
}

/// How an executed step ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum StepOutcome {
    Done,
    /// Nothing to do
    Skipped(String),
    /// Retryable; the latch stays unset until the trigger is redelivered
    Waiting(String),
    /// Needs operator attention
    Blocked(String),
    /// Store version unknown; retried on a later trigger
    Deferred(String),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodePhase {
    Uninitialized,
    Initializing,
    Registering,
    Registered,
    SteadyState,
}

impl NodePhase {
    /// Resting phase implied by the latches
    pub fn of(latches: &Latches) -> Self {
        if !(latches.registered || latches.leader_configured) {
            NodePhase::Uninitialized
        } else if latches.rerender_config {
            NodePhase::Registered
        } else {
            NodePhase::SteadyState
        }
    }
}

/// Planner inputs
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub trigger: Trigger,
    pub role: Role,
    pub latches: &'a Latches,
    pub gates: Gates,
    pub delta: &'a ConfigDelta,
}

/// Ordered steps enabled by `inputs`.
pub fn plan(inputs: &Inputs<'_>) -> Vec<Step> {
    let Inputs {
        trigger,
        role,
        latches,
        gates,
        delta,
    } = *inputs;

    // Departure tears down; nothing else is worth doing.
    if trigger == Trigger::Departing {
        return vec![Step::Unregister];
    }

    let mut steps = Vec::new();

    if !latches.service_restart_configured {
        steps.push(Step::ConfigureRestartPolicy);
    }

    if !latches.ssl_placed {
        steps.push(if gates.tls_available {
            Step::PlaceTls
        } else {
            Step::AwaitTls
        });
    } else if !latches.client_env_exported {
        steps.push(Step::ExportClientEnv);
    }

    // The rejoin procedure owns every join cycle of its trigger.
    let may_register = trigger != Trigger::ForceRejoin;
    match role {
        Role::Leader if !latches.leader_configured => {
            if latches.registered {
                steps.push(Step::AdoptLeadership);
            } else if latches.ssl_placed && !gates.cluster_published {
                steps.push(Step::InitializeCluster);
            } else if latches.ssl_placed && may_register {
                steps.push(Step::RegisterWithLeader);
            }
        }
        Role::Follower
            if latches.ssl_placed && gates.cluster_joined && !latches.registered && may_register =>
        {
            steps.push(Step::RegisterWithLeader);
        }
        _ => {}
    }

    match trigger {
        Trigger::ConfigChanged
            if delta.ports_changed() && role == Role::Leader && latches.leader_configured =>
        {
            steps.push(Step::MigratePeerPort);
        }
        Trigger::ConfigChanged if !delta.is_empty() => steps.push(Step::MarkStale),
        Trigger::Upgraded => steps.push(Step::MarkStale),
        Trigger::TlsWritten if latches.ssl_placed => steps.push(Step::RefreshTls),
        Trigger::ForceRejoin if role == Role::Follower => {
            steps.push(Step::Rejoin);
            steps.push(Step::ReportHealth);
        }
        _ => {}
    }

    if latches.rerender_config {
        steps.push(Step::Rerender);
    }

    if trigger == Trigger::Tick && (latches.registered || latches.leader_configured) {
        steps.push(Step::ReportHealth);
    }

    steps
}
