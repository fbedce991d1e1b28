//! Collaborators backed by host tools
//!
//! Each hook is an argv vector from [`HookConfig`]; `{port}` is the only
//! placeholder.

use crate::common::{Error, HookConfig, Result};
use crate::host::{LeaderStore, PortManager, PublishedValues, Status, StatusSink};
use std::process::{Command, Output};

fn run_hook(argv: &[String], extra: &[String]) -> Result<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::InvalidConfig("empty hook command".into()))?;
    let name = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .args(extra)
        .output()
        .map_err(|e| Error::CommandFailed {
            command: name.clone(),
            code: None,
            stderr: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(Error::command_failed(name, &output));
    }
    Ok(output)
}

fn substitute_port(argv: &[String], port: u16) -> Vec<String> {
    argv.iter()
        .map(|a| a.replace("{port}", &port.to_string()))
        .collect()
}

/// open-port / close-port style tools
pub struct CommandPorts {
    open: Vec<String>,
    close: Vec<String>,
}

impl CommandPorts {
    pub fn new(hooks: &HookConfig) -> Self {
        Self {
            open: hooks.open_port.clone(),
            close: hooks.close_port.clone(),
        }
    }
}

impl PortManager for CommandPorts {
    fn open(&self, port: u16) -> Result<()> {
        tracing::info!("Opening port {}", port);
        run_hook(&substitute_port(&self.open, port), &[])?;
        Ok(())
    }

    fn close(&self, port: u16) -> Result<()> {
        tracing::info!("Closing port {}", port);
        run_hook(&substitute_port(&self.close, port), &[])?;
        Ok(())
    }
}

/// leader-get / leader-set style tools
pub struct CommandLeaderStore {
    get: Vec<String>,
    set: Vec<String>,
}

impl CommandLeaderStore {
    pub fn new(hooks: &HookConfig) -> Self {
        Self {
            get: hooks.leader_get.clone(),
            set: hooks.leader_set.clone(),
        }
    }
}

/// Parse leader-get JSON; empty output and `null` mean nothing published.
pub fn parse_published(stdout: &str) -> Result<PublishedValues> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(PublishedValues::default());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// `key=value` pairs for every field being published
pub fn publish_args(values: &PublishedValues) -> Vec<String> {
    [
        ("leader_address", &values.leader_address),
        ("cluster", &values.cluster),
        ("force_rejoin", &values.force_rejoin),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.as_ref().map(|v| format!("{}={}", key, v)))
    .collect()
}

impl LeaderStore for CommandLeaderStore {
    fn published(&self) -> Result<PublishedValues> {
        let output = run_hook(&self.get, &[])?;
        parse_published(&String::from_utf8_lossy(&output.stdout))
    }

    fn publish(&self, values: &PublishedValues) -> Result<()> {
        let args = publish_args(values);
        if args.is_empty() {
            return Ok(());
        }
        tracing::info!("Publishing {}", args.join(" "));
        run_hook(&self.set, &args)?;
        Ok(())
    }
}

/// status-set style tool
pub struct CommandStatus {
    set: Vec<String>,
}

impl CommandStatus {
    pub fn new(hooks: &HookConfig) -> Self {
        Self {
            set: hooks.status_set.clone(),
        }
    }
}

impl StatusSink for CommandStatus {
    fn set(&self, status: Status) {
        tracing::info!("Status {}", status);
        let args = [status.state().to_string(), status.message().to_string()];
        if let Err(e) = run_hook(&self.set, &args) {
            tracing::warn!("Could not report status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_port() {
        let argv = vec!["open-port".to_string(), "{port}/tcp".to_string()];
        assert_eq!(substitute_port(&argv, 2379), vec!["open-port", "2379/tcp"]);
    }

    #[test]
    fn test_parse_published() {
        assert_eq!(parse_published("").unwrap(), PublishedValues::default());
        assert_eq!(parse_published("null\n").unwrap(), PublishedValues::default());

        let values = parse_published(
            r#"{"leader_address": "https://10.0.0.1:2379",
                "cluster": "node1=https://10.0.0.1:2380", "snapd_refresh": "fri"}"#,
        )
        .unwrap();
        assert_eq!(values.leader_address.as_deref(), Some("https://10.0.0.1:2379"));
        assert!(values.force_rejoin.is_none());
    }

    #[test]
    fn test_publish_args_only_set_fields() {
        let values = PublishedValues {
            leader_address: Some("https://10.0.0.1:2379".into()),
            ..Default::default()
        };
        assert_eq!(publish_args(&values), vec!["leader_address=https://10.0.0.1:2379"]);
    }

    #[test]
    fn test_empty_hook_is_config_error() {
        assert!(matches!(run_hook(&[], &[]), Err(Error::InvalidConfig(_))));
    }
}
