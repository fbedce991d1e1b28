//! etcdctl-backed membership client
//!
//! Talks to the store through its own admin tool, API v3. Dial and command
//! timeouts are passed to etcdctl on every call; the coordinator never
//! times calls out itself.

use crate::common::{Error, FleetConfig, Result, TlsConfig};
use crate::membership::{
    ClusterHealth, Member, MemberId, MemberMap, MembershipClient, Registration,
};
use crate::node::NodeRecord;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::Duration;

pub struct EtcdCtl {
    binary: PathBuf,
    /// Endpoint used when no target is given
    local_endpoint: String,
    tls: TlsConfig,
    dial_timeout: Duration,
    command_timeout: Duration,
}

impl EtcdCtl {
    pub fn new(
        binary: impl Into<PathBuf>,
        local_endpoint: impl Into<String>,
        tls: TlsConfig,
    ) -> Self {
        Self {
            binary: binary.into(),
            local_endpoint: local_endpoint.into(),
            tls,
            dial_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        let local = crate::common::connection_string(&[&config.public_address], config.port);
        Self {
            dial_timeout: config.dial_timeout(),
            command_timeout: config.command_timeout(),
            ..Self::new(&config.etcdctl, local, config.tls.clone())
        }
    }

    /// Global flags shared by every v3 call.
    pub fn base_args(&self, target: Option<&str>) -> Vec<String> {
        vec![
            format!("--endpoints={}", target.unwrap_or(&self.local_endpoint)),
            format!("--cacert={}", self.tls.ca.display()),
            format!("--cert={}", self.tls.client_cert.display()),
            format!("--key={}", self.tls.client_key.display()),
            format!("--dial-timeout={}s", self.dial_timeout.as_secs().max(1)),
            format!("--command-timeout={}s", self.command_timeout.as_secs().max(1)),
        ]
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("ETCDCTL_API", "3").args(args);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        // Flags carry paths, not secrets, but keep the log line short.
        let verbs: Vec<&str> = args
            .iter()
            .filter(|a| !a.starts_with("--"))
            .map(String::as_str)
            .collect();
        format!("{} {}", self.binary.display(), verbs.join(" "))
    }

    /// Run with `args`, failing on spawn error or non-zero exit.
    fn run(&self, args: Vec<String>) -> Result<Output> {
        let name = self.describe(&args);
        tracing::debug!("Running {}", name);
        let output = self.command(&args).output().map_err(|e| Error::CommandFailed {
            command: name.clone(),
            code: None,
            stderr: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(Error::command_failed(name, &output));
        }
        Ok(output)
    }

    fn run_v3(&self, target: Option<&str>, verbs: &[&str]) -> Result<Output> {
        let mut args = self.base_args(target);
        args.extend(verbs.iter().map(|v| v.to_string()));
        self.run(args)
    }
}

impl MembershipClient for EtcdCtl {
    fn list_members(&self, target: Option<&str>) -> Result<MemberMap> {
        let output = self.run_v3(target, &["member", "list", "-w", "json"])?;
        parse_member_list(&output.stdout)
    }

    fn register(&self, record: &NodeRecord) -> Result<Registration> {
        let leader = record.leader_address.as_deref().ok_or(Error::MissingLeader)?;
        let peer = format!("--peer-urls={}", record.peer_url());
        let output = self.run_v3(Some(leader), &["member", "add", &record.unit_name, &peer])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let cluster_string = parse_initial_cluster(&stdout).ok_or_else(|| {
            Error::Parse(format!("no ETCD_INITIAL_CLUSTER in member add output: {}", stdout))
        })?;
        Ok(Registration { cluster_string })
    }

    fn unregister(&self, id: MemberId, target: Option<&str>) -> Result<()> {
        let id = id.to_string();
        self.run_v3(target, &["member", "remove", &id])?;
        Ok(())
    }

    fn update_member(&self, id: MemberId, peer_url: &str) -> Result<String> {
        let id = id.to_string();
        let peer = format!("--peer-urls={}", peer_url);
        let output = self.run_v3(None, &["member", "update", &id, &peer])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn cluster_health(&self, target: Option<&str>) -> ClusterHealth {
        let mut args = self.base_args(target);
        args.extend(["endpoint".to_string(), "health".to_string()]);
        match self.command(&args).output() {
            Ok(output) => {
                let mut raw = String::from_utf8_lossy(&output.stdout).to_string();
                raw.push_str(&String::from_utf8_lossy(&output.stderr));
                health_from_output(&raw, output.status.success())
            }
            Err(e) => {
                tracing::warn!("Health check could not run: {}", e);
                ClusterHealth::unhealthy(e.to_string())
            }
        }
    }

    fn version(&self) -> String {
        let v3 = Command::new(&self.binary)
            .env("ETCDCTL_API", "3")
            .arg("version")
            .output();
        let raw = match v3 {
            Ok(output) => {
                let text = output_text(&output);
                if text.contains("No help topic for 'version'") {
                    match Command::new(&self.binary).arg("--version").output() {
                        Ok(output) => output_text(&output),
                        Err(e) => {
                            tracing::error!("Failed to get etcd version: {}", e);
                            return "n/a".to_string();
                        }
                    }
                } else if output.status.success() {
                    text
                } else {
                    tracing::error!("Failed to get etcd version: {}", text.trim());
                    return "n/a".to_string();
                }
            }
            Err(e) => {
                tracing::error!("Failed to get etcd version: {}", e);
                return "n/a".to_string();
            }
        };
        parse_version(&raw).unwrap_or_else(|| {
            tracing::error!("Unable to find etcd version: {}", raw.trim());
            "n/a".to_string()
        })
    }
}

fn output_text(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

#[derive(Deserialize)]
struct MemberListResponse {
    #[serde(default)]
    members: Vec<MemberJson>,
}

#[derive(Deserialize)]
struct MemberJson {
    #[serde(rename = "ID")]
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "peerURLs", default)]
    peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    client_urls: Vec<String>,
}

/// Parse `etcdctl member list -w json`.
pub fn parse_member_list(json: &[u8]) -> Result<MemberMap> {
    let response: MemberListResponse = serde_json::from_slice(json)?;
    Ok(response
        .members
        .into_iter()
        .map(|m| {
            let id = MemberId(m.id);
            (
                id,
                Member {
                    id,
                    name: m.name,
                    peer_urls: m.peer_urls,
                    client_urls: m.client_urls,
                },
            )
        })
        .collect())
}

/// Pull `ETCD_INITIAL_CLUSTER` out of `etcdctl member add` output.
pub fn parse_initial_cluster(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("ETCD_INITIAL_CLUSTER=")
            .map(|v| v.trim_matches('"').to_string())
    })
}

/// "etcdctl version: 3.4.22" (v3) or "etcdctl version 2.3.8" (v2).
pub fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("etcdctl version"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}

/// Any unhealthy endpoint, or a failed run, makes the cluster unhealthy.
pub fn health_from_output(raw: &str, success: bool) -> ClusterHealth {
    let any_unhealthy = raw.lines().any(|line| line.contains("unhealthy"));
    if success && !any_unhealthy {
        ClusterHealth::healthy(raw.trim())
    } else {
        ClusterHealth::unhealthy(raw.trim())
    }
}
