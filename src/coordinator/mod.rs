//! Per-node bootstrap and membership coordination
//!
//! The coordinator is responsible for:
//! - Deciding whether this node initializes the cluster or joins it
//! - Registering with and unregistering from the current membership
//! - Keeping the rendered store config in step with role and topology
//! - Forced rejoin after a leader snapshot restore
//! - Health reporting

pub mod bootstrap;
pub mod fsm;
pub mod health;
pub mod rejoin;
pub mod render;
pub mod server;

pub use fsm::{plan, ConfigDelta, Gates, NodePhase, Role, Step, StepOutcome, Trigger};
pub use health::{check_cluster_health, HealthReport, UnitHealth};
pub use rejoin::{Backoff, RejoinReport};
pub use render::{ConfigRenderer, RenderOutcome};
pub use server::{Context, Coordinator, DispatchReport, StepRecord};
