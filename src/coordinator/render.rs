//! Store configuration rendering
//!
//! The output format follows the store version: 2.x reads the legacy
//! environment-style `etcd.conf`, everything newer reads `etcd.conf.yml`.
//! Rendering the same record twice leaves the second call without side
//! effects.

use crate::common::{Error, Result, StoreVersion, TlsConfig};
use crate::coordinator::fsm::Change;
use crate::host::{Host, PortManager, Supervisor};
use crate::membership::MembershipClient;
use crate::node::{ClusterState, NodeRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// errno for rename across filesystems
const EXDEV: i32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfFormat {
    Legacy,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub version: StoreVersion,
    pub format: ConfFormat,
    pub path: PathBuf,
    /// The file on disk changed
    pub written: bool,
    /// Data was moved into the canonical data dir first
    pub migrated_data: bool,
    /// Client port moved from `old` to `new`
    pub ports: Option<Change<u16>>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct TransportSecurity<'a> {
    cert_file: &'a Path,
    key_file: &'a Path,
    trusted_ca_file: &'a Path,
    client_cert_auth: bool,
}

impl<'a> TransportSecurity<'a> {
    fn server(tls: &'a TlsConfig) -> Self {
        Self {
            cert_file: &tls.server_cert,
            key_file: &tls.server_key,
            trusted_ca_file: &tls.ca,
            client_cert_auth: true,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct StoreConf<'a> {
    name: &'a str,
    data_dir: &'a Path,
    listen_peer_urls: String,
    listen_client_urls: String,
    initial_advertise_peer_urls: String,
    advertise_client_urls: String,
    initial_cluster: String,
    initial_cluster_token: &'a str,
    initial_cluster_state: ClusterState,
    client_transport_security: TransportSecurity<'a>,
    peer_transport_security: TransportSecurity<'a>,
}

/// Cluster string to render; a node that has adopted nothing yet names only itself.
fn initial_cluster(record: &NodeRecord) -> String {
    if record.cluster_string.is_empty() {
        record.self_cluster_string()
    } else {
        record.cluster_string.clone()
    }
}

pub fn render_yaml(record: &NodeRecord) -> Result<String> {
    let conf = StoreConf {
        name: &record.unit_name,
        data_dir: &record.etcd_data_dir,
        listen_peer_urls: record.listen_peer_urls(),
        listen_client_urls: record.listen_client_urls(),
        initial_advertise_peer_urls: record.peer_url(),
        advertise_client_urls: record.client_url(),
        initial_cluster: initial_cluster(record),
        initial_cluster_token: &record.cluster_token,
        initial_cluster_state: record.cluster_state,
        client_transport_security: TransportSecurity::server(&record.tls),
        peer_transport_security: TransportSecurity::server(&record.tls),
    };
    Ok(serde_yaml::to_string(&conf)?)
}

pub fn render_legacy(record: &NodeRecord) -> String {
    let tls = &record.tls;
    let vars = [
        ("ETCD_NAME", record.unit_name.clone()),
        ("ETCD_DATA_DIR", record.etcd_data_dir.display().to_string()),
        ("ETCD_LISTEN_PEER_URLS", record.listen_peer_urls()),
        ("ETCD_LISTEN_CLIENT_URLS", record.listen_client_urls()),
        ("ETCD_INITIAL_ADVERTISE_PEER_URLS", record.peer_url()),
        ("ETCD_ADVERTISE_CLIENT_URLS", record.client_url()),
        ("ETCD_INITIAL_CLUSTER", initial_cluster(record)),
        ("ETCD_INITIAL_CLUSTER_TOKEN", record.cluster_token.clone()),
        ("ETCD_INITIAL_CLUSTER_STATE", record.cluster_state.to_string()),
        ("ETCD_CERT_FILE", tls.server_cert.display().to_string()),
        ("ETCD_KEY_FILE", tls.server_key.display().to_string()),
        ("ETCD_TRUSTED_CA_FILE", tls.ca.display().to_string()),
        ("ETCD_CLIENT_CERT_AUTH", "true".to_string()),
        ("ETCD_PEER_CERT_FILE", tls.server_cert.display().to_string()),
        ("ETCD_PEER_KEY_FILE", tls.server_key.display().to_string()),
        ("ETCD_PEER_TRUSTED_CA_FILE", tls.ca.display().to_string()),
        ("ETCD_PEER_CLIENT_CERT_AUTH", "true".to_string()),
    ];
    vars.iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
}

/// etcdctl TLS exports; 3.3 dropped the `_FILE` suffixes.
pub fn client_env_exports(version: &StoreVersion, tls: &TlsConfig) -> String {
    let (key, cert, ca) = if version.has_short_tls_env() {
        ("ETCDCTL_KEY", "ETCDCTL_CERT", "ETCDCTL_CACERT")
    } else {
        ("ETCDCTL_KEY_FILE", "ETCDCTL_CERT_FILE", "ETCDCTL_CA_FILE")
    };
    format!(
        "export {}={}\nexport {}={}\nexport {}={}\n",
        key,
        tls.client_key.display(),
        cert,
        tls.client_cert.display(),
        ca,
        tls.ca.display()
    )
}

/// Write `content` unless the file already holds exactly that.
pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    match std::fs::read_to_string(path) {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(true)
}

/// Close `previous` and open `current` when both are known and differ.
pub fn reconcile_ports(
    previous: Option<u16>,
    current: u16,
    ports: &dyn PortManager,
) -> Result<Option<Change<u16>>> {
    match previous {
        Some(old) if old != current => {
            tracing::info!("Client port moved {} -> {}", old, current);
            ports.close(old)?;
            ports.open(current)?;
            Ok(Some(Change { old, new: current }))
        }
        _ => Ok(None),
    }
}

fn move_entry(from: &Path, to: &Path) -> Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            copy_recursive(from, to)?;
            if from.is_dir() {
                std::fs::remove_dir_all(from)?;
            } else {
                std::fs::remove_file(from)?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn copy_recursive(from: &Path, to: &Path) -> Result<()> {
    if from.is_dir() {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(from, to)?;
    }
    Ok(())
}

pub struct ConfigRenderer<'a> {
    membership: &'a dyn MembershipClient,
    supervisor: &'a dyn Supervisor,
    ports: &'a dyn PortManager,
}

impl<'a> ConfigRenderer<'a> {
    pub fn new(
        membership: &'a dyn MembershipClient,
        supervisor: &'a dyn Supervisor,
        ports: &'a dyn PortManager,
    ) -> Self {
        Self {
            membership,
            supervisor,
            ports,
        }
    }

    pub fn for_host(host: &'a Host) -> Self {
        Self::new(
            host.membership.as_ref(),
            host.supervisor.as_ref(),
            host.ports.as_ref(),
        )
    }

    /// Detect the store version; `n/a` is [`Error::VersionUnknown`].
    pub fn version(&self) -> Result<StoreVersion> {
        let raw = self.membership.version();
        StoreVersion::parse(&raw).ok_or_else(|| {
            tracing::warn!("Store version {:?} is not usable yet", raw);
            Error::VersionUnknown
        })
    }

    /// Render the store config for `record`.
    ///
    /// `open_port` is the client port opened by an earlier dispatch.
    pub fn render(&self, record: &NodeRecord, open_port: Option<u16>) -> Result<RenderOutcome> {
        let version = self.version()?;
        let migrated_data = self.migrate_data_dir(record)?;

        let (format, path, content) = if version.uses_legacy_config() {
            (ConfFormat::Legacy, record.legacy_conf_path(), render_legacy(record))
        } else {
            (ConfFormat::Yaml, record.conf_path(), render_yaml(record)?)
        };

        let written = write_if_changed(&path, &content)?;
        if written {
            tracing::info!("Rendered {} for store {}", path.display(), version);
        } else {
            tracing::debug!("{} unchanged", path.display());
        }

        let legacy = record.legacy_conf_path();
        if format == ConfFormat::Yaml && legacy.exists() {
            tracing::info!("Removing legacy config {}", legacy.display());
            std::fs::remove_file(&legacy)?;
        }

        let ports = reconcile_ports(open_port, record.port, self.ports)?;

        Ok(RenderOutcome {
            version,
            format,
            path,
            written,
            migrated_data,
            ports,
        })
    }

    /// Move data named by an existing `etcd.conf.yml` into the canonical dir.
    pub fn migrate_data_dir(&self, record: &NodeRecord) -> Result<bool> {
        let conf_path = record.conf_path();
        let raw = match std::fs::read_to_string(&conf_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut conf: serde_yaml::Value = serde_yaml::from_str(&raw)?;
        let current = match conf.get("data-dir").and_then(|v| v.as_str()) {
            Some(dir) => PathBuf::from(dir),
            None => return Ok(false),
        };
        let desired = &record.etcd_data_dir;
        if &current == desired {
            return Ok(false);
        }

        tracing::info!(
            "Moving store data from {} to {}",
            current.display(),
            desired.display()
        );
        self.supervisor.stop()?;
        std::fs::create_dir_all(desired)?;
        if current.is_dir() {
            for entry in std::fs::read_dir(&current)? {
                let entry = entry?;
                move_entry(&entry.path(), &desired.join(entry.file_name()))?;
            }
            std::fs::remove_dir(&current)?;
        }

        if let Some(map) = conf.as_mapping_mut() {
            map.insert(
                "data-dir".into(),
                serde_yaml::Value::String(desired.display().to_string()),
            );
        }
        std::fs::write(&conf_path, serde_yaml::to_string(&conf)?)?;
        self.supervisor.start()?;
        Ok(true)
    }
}
