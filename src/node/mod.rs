//! Node identity and local state

pub mod record;
pub mod state;

pub use record::{ClusterState, NodeRecord};
pub use state::{Latches, LocalState, StateFile};
