//! systemd-backed supervisor

use crate::common::{Error, Result};
use crate::host::Supervisor;
use std::path::PathBuf;
use std::process::Command;

/// systemd moved the start-limit knob to [Unit] in this release
const UNIT_START_LIMIT_SINCE: u32 = 230;

const RESTART_ALWAYS: &str = "[Unit]
StartLimitIntervalSec=0

[Service]
Restart=always
RestartSec=10
";

const RESTART_ALWAYS_LEGACY: &str = "[Service]
Restart=always
RestartSec=10
StartLimitInterval=0
";

pub struct SystemdSupervisor {
    unit: String,
    dropin_root: PathBuf,
}

impl SystemdSupervisor {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            dropin_root: PathBuf::from("/etc/systemd/system"),
        }
    }

    fn service(&self) -> String {
        if self.unit.ends_with(".service") {
            self.unit.clone()
        } else {
            format!("{}.service", self.unit)
        }
    }

    fn systemctl(&self, verb: &str) -> Result<()> {
        let service = self.service();
        tracing::info!("systemctl {} {}", verb, service);
        let output = Command::new("systemctl").arg(verb).arg(&service).output()?;
        if !output.status.success() {
            return Err(Error::command_failed(format!("systemctl {} {}", verb, service), &output));
        }
        Ok(())
    }

    fn systemd_version() -> Option<u32> {
        let output = Command::new("systemd").arg("--version").output().ok()?;
        parse_systemd_version(&String::from_utf8_lossy(&output.stdout))
    }
}

/// First line reads "systemd 245 (245.4-4ubuntu3)".
pub fn parse_systemd_version(output: &str) -> Option<u32> {
    let mut words = output.lines().next()?.split_whitespace();
    if words.next()? != "systemd" {
        return None;
    }
    words.next()?.parse().ok()
}

/// Drop-in body for the detected systemd; unknown versions get the current one.
pub fn restart_policy_for(version: Option<u32>) -> &'static str {
    match version {
        Some(v) if v < UNIT_START_LIMIT_SINCE => RESTART_ALWAYS_LEGACY,
        _ => RESTART_ALWAYS,
    }
}

impl Supervisor for SystemdSupervisor {
    fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    fn start(&self) -> Result<()> {
        self.systemctl("start")
    }

    fn restart(&self) -> Result<()> {
        self.systemctl("restart")
    }

    fn is_running(&self) -> bool {
        Command::new("systemctl")
            .arg("is-active")
            .arg("--quiet")
            .arg(self.service())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn install_restart_policy(&self) -> Result<()> {
        let version = Self::systemd_version();
        if version.is_none() {
            tracing::error!("Failed to detect systemd version, using latest template");
        }
        let dir = self.dropin_root.join(format!("{}.d", self.service()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("always-restart.conf"), restart_policy_for(version))?;

        let output = Command::new("systemctl").arg("daemon-reload").output()?;
        if !output.status.success() {
            return Err(Error::command_failed("systemctl daemon-reload", &output));
        }
        self.restart()
    }
}
