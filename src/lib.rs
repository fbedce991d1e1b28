//! # minikv-fleet
//!
//! Cluster membership and bootstrap coordination for a fleet of etcd nodes:
//! - Exactly one node bootstraps a fresh cluster, every other node joins it
//! - Stale member entries are removed before re-registration
//! - Rendered store config follows role, ports, TLS material and version
//! - Leader-driven peer-port migration and forced rejoin after a restore
//!
//! ## Architecture
//!
//! ```text
//!   scheduler ──(trigger, role)──▶ Coordinator
//!                                   │  fsm::plan(trigger, role, latches, gates)
//!                                   ▼
//!                    ┌──────────────┴───────────────┐
//!                    │ bootstrap  render  rejoin    │
//!                    │ health                       │
//!                    └──────────────┬───────────────┘
//!                                   │ host traits
//!        ┌──────────────┬───────────┼────────────┬──────────────┐
//!   Membership     Supervisor   PortManager  LeaderStore   StatusSink
//!   (etcdctl)      (systemd)    (hooks)      (hooks)       (hooks)
//! ```
//!
//! ## Usage
//!
//! ### Deliver a trigger
//! ```bash
//! minikv-fleet-agent --config /etc/minikv-fleet/fleet.toml \
//!   dispatch peer-joined --role follower --cluster-joined
//! ```
//!
//! ### Periodic health ticks
//! ```bash
//! minikv-fleet-agent watch --role leader
//! ```
//!
//! ### Operator views
//! ```bash
//! minikv-fleet health
//! minikv-fleet members
//! minikv-fleet connection-info
//! minikv-fleet simulate --nodes 3
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod host;
pub mod membership;
pub mod node;
pub mod ops;

// Re-export commonly used types
pub use common::{Error, FleetConfig, Result};
pub use coordinator::{Context, Coordinator, Role, Trigger};
pub use host::Host;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
