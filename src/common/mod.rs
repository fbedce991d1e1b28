//! Common utilities and types shared across minikv-fleet

pub mod config;
pub mod error;
pub mod utils;

pub use config::{FleetConfig, HookConfig, PortSettings, RejoinConfig, TlsConfig};
pub use error::{Error, Result};
pub use utils::{connection_string, parse_duration, peer_noun, replace_port, StoreVersion};
