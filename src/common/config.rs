//! Configuration for minikv-fleet
//!
//! Loaded once per process from an optional TOML file layered under
//! `MINIKV_FLEET_*` environment variables, then treated as immutable and
//! passed explicitly into every coordinator call.

use crate::common::utils::parse_duration;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/minikv-fleet/fleet.toml";

/// Environment prefix for overrides (`MINIKV_FLEET_PORT=2479`)
pub const ENV_PREFIX: &str = "MINIKV_FLEET";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Stable unique node name (`etcd0`)
    pub unit_name: String,

    /// Address used for peer traffic
    pub cluster_address: String,

    /// Address used for client traffic
    pub public_address: String,

    /// Client-facing port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Peer-facing port
    #[serde(default = "default_management_port")]
    pub management_port: u16,

    /// Listen on 0.0.0.0 instead of the node addresses
    #[serde(default)]
    pub bind_to_all_interfaces: bool,

    /// Token for the first-ever bootstrap; generated when absent
    #[serde(default)]
    pub cluster_token: Option<String>,

    /// Directory holding the rendered store configuration
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,

    /// Canonical store data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local coordination state (latches, adopted cluster string)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Where etcdctl TLS environment exports are written
    #[serde(default)]
    pub client_env_path: Option<PathBuf>,

    /// Supervised daemon unit
    #[serde(default = "default_daemon")]
    pub daemon: String,

    /// etcdctl binary
    #[serde(default = "default_etcdctl")]
    pub etcdctl: PathBuf,

    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,

    /// Pause between daemon restart and the first health check
    #[serde(default = "default_settle_delay")]
    pub settle_delay: String,

    /// Interval of the periodic health tick
    #[serde(default = "default_health_interval")]
    pub health_interval: String,

    #[serde(default)]
    pub rejoin: RejoinConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub hooks: HookConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    2379
}
fn default_management_port() -> u16 {
    2380
}
fn default_conf_dir() -> PathBuf {
    PathBuf::from("/var/snap/etcd/common")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/snap/etcd/current")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/minikv-fleet")
}
fn default_daemon() -> String {
    "snap.etcd.etcd".to_string()
}
fn default_etcdctl() -> PathBuf {
    PathBuf::from("/snap/bin/etcd.etcdctl")
}
fn default_dial_timeout() -> String {
    "5s".to_string()
}
fn default_command_timeout() -> String {
    "10s".to_string()
}
fn default_settle_delay() -> String {
    "2s".to_string()
}
fn default_health_interval() -> String {
    "5m".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Randomized rejoin backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejoinConfig {
    /// Join cycles before giving up
    #[serde(default = "default_rejoin_attempts")]
    pub attempts: u32,

    /// Smallest delay, in `delay_unit`s
    #[serde(default = "default_rejoin_min")]
    pub min_delay: u64,

    /// Largest delay, in `delay_unit`s
    #[serde(default = "default_rejoin_max")]
    pub max_delay: u64,

    #[serde(default = "default_rejoin_unit")]
    pub delay_unit: String,
}

fn default_rejoin_attempts() -> u32 {
    11
}
fn default_rejoin_min() -> u64 {
    1
}
fn default_rejoin_max() -> u64 {
    10
}
fn default_rejoin_unit() -> String {
    "1s".to_string()
}

impl Default for RejoinConfig {
    fn default() -> Self {
        Self {
            attempts: default_rejoin_attempts(),
            min_delay: default_rejoin_min(),
            max_delay: default_rejoin_max(),
            delay_unit: default_rejoin_unit(),
        }
    }
}

/// Already-issued TLS material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_ca")]
    pub ca: PathBuf,
    #[serde(default = "default_server_cert")]
    pub server_cert: PathBuf,
    #[serde(default = "default_server_key")]
    pub server_key: PathBuf,
    #[serde(default = "default_client_cert")]
    pub client_cert: PathBuf,
    #[serde(default = "default_client_key")]
    pub client_key: PathBuf,
}

fn default_ca() -> PathBuf {
    PathBuf::from("/var/snap/etcd/common/ca.crt")
}
fn default_server_cert() -> PathBuf {
    PathBuf::from("/var/snap/etcd/common/server.crt")
}
fn default_server_key() -> PathBuf {
    PathBuf::from("/var/snap/etcd/common/server.key")
}
fn default_client_cert() -> PathBuf {
    PathBuf::from("/var/snap/etcd/common/client.crt")
}
fn default_client_key() -> PathBuf {
    PathBuf::from("/var/snap/etcd/common/client.key")
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca: default_ca(),
            server_cert: default_server_cert(),
            server_key: default_server_key(),
            client_cert: default_client_cert(),
            client_key: default_client_key(),
        }
    }
}

/// Host tools used by the command-backed collaborators.
///
/// `{port}` is substituted in the port commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default = "default_open_port")]
    pub open_port: Vec<String>,
    #[serde(default = "default_close_port")]
    pub close_port: Vec<String>,
    #[serde(default = "default_leader_get")]
    pub leader_get: Vec<String>,
    #[serde(default = "default_leader_set")]
    pub leader_set: Vec<String>,
    #[serde(default = "default_status_set")]
    pub status_set: Vec<String>,
}

fn default_open_port() -> Vec<String> {
    vec!["open-port".into(), "{port}/tcp".into()]
}
fn default_close_port() -> Vec<String> {
    vec!["close-port".into(), "{port}/tcp".into()]
}
fn default_leader_get() -> Vec<String> {
    vec!["leader-get".into(), "--format=json".into()]
}
fn default_leader_set() -> Vec<String> {
    vec!["leader-set".into()]
}
fn default_status_set() -> Vec<String> {
    vec!["status-set".into()]
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            open_port: default_open_port(),
            close_port: default_close_port(),
            leader_get: default_leader_get(),
            leader_set: default_leader_set(),
            status_set: default_status_set(),
        }
    }
}

impl FleetConfig {
    /// Minimal config for a node; everything else takes its default.
    pub fn for_node(
        unit_name: impl Into<String>,
        cluster_address: impl Into<String>,
        public_address: impl Into<String>,
    ) -> Self {
        Self {
            unit_name: unit_name.into(),
            cluster_address: cluster_address.into(),
            public_address: public_address.into(),
            port: default_port(),
            management_port: default_management_port(),
            bind_to_all_interfaces: false,
            cluster_token: None,
            conf_dir: default_conf_dir(),
            data_dir: default_data_dir(),
            state_dir: default_state_dir(),
            client_env_path: None,
            daemon: default_daemon(),
            etcdctl: default_etcdctl(),
            dial_timeout: default_dial_timeout(),
            command_timeout: default_command_timeout(),
            settle_delay: default_settle_delay(),
            health_interval: default_health_interval(),
            rejoin: RejoinConfig::default(),
            tls: TlsConfig::default(),
            hooks: HookConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// Load from `path` (missing file allowed) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: FleetConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.unit_name.trim().is_empty() {
            return Err(Error::InvalidConfig("unit_name cannot be empty".into()));
        }
        if self.cluster_address.trim().is_empty() || self.public_address.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "cluster_address and public_address are required".into(),
            ));
        }
        if self.port == 0 || self.management_port == 0 {
            return Err(Error::InvalidConfig("ports must be non-zero".into()));
        }
        if self.port == self.management_port {
            return Err(Error::InvalidConfig(format!(
                "port and management_port must differ (both {})",
                self.port
            )));
        }
        if self.rejoin.attempts == 0 {
            return Err(Error::InvalidConfig("rejoin.attempts must be >= 1".into()));
        }
        if self.rejoin.min_delay > self.rejoin.max_delay {
            return Err(Error::InvalidConfig(format!(
                "rejoin.min_delay ({}) exceeds rejoin.max_delay ({})",
                self.rejoin.min_delay, self.rejoin.max_delay
            )));
        }
        for raw in [
            &self.dial_timeout,
            &self.command_timeout,
            &self.settle_delay,
            &self.health_interval,
            &self.rejoin.delay_unit,
        ] {
            parse_duration(raw)?;
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        parse_duration(&self.dial_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn command_timeout(&self) -> Duration {
        parse_duration(&self.command_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn settle_delay(&self) -> Duration {
        parse_duration(&self.settle_delay).unwrap_or(Duration::from_secs(2))
    }

    pub fn health_interval(&self) -> Duration {
        parse_duration(&self.health_interval).unwrap_or(Duration::from_secs(300))
    }

    pub fn rejoin_delay_unit(&self) -> Duration {
        parse_duration(&self.rejoin.delay_unit).unwrap_or(Duration::from_secs(1))
    }

    /// Port settings tracked for config-change detection
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            port: self.port,
            management_port: self.management_port,
            bind_to_all_interfaces: self.bind_to_all_interfaces,
        }
    }
}

/// The subset of config whose changes require coordinated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    pub port: u16,
    pub management_port: u16,
    pub bind_to_all_interfaces: bool,
}
