//! Recording in-memory collaborators

use crate::common::Result;
use crate::host::{
    LeaderStore, PortManager, PublishedValues, Sleeper, Status, StatusSink, Supervisor,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Stop,
    Start,
    Restart,
    RestartPolicy,
}

#[derive(Default)]
struct SupervisorInner {
    running: bool,
    events: Vec<SupervisorEvent>,
}

#[derive(Clone, Default)]
pub struct MemorySupervisor {
    inner: Arc<Mutex<SupervisorInner>>,
}

impl MemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SupervisorEvent> {
        lock(&self.inner).events.clone()
    }

    pub fn count(&self, event: SupervisorEvent) -> usize {
        lock(&self.inner).events.iter().filter(|e| **e == event).count()
    }

    pub fn clear(&self) {
        lock(&self.inner).events.clear();
    }
}

impl Supervisor for MemorySupervisor {
    fn stop(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.running = false;
        inner.events.push(SupervisorEvent::Stop);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.running = true;
        inner.events.push(SupervisorEvent::Start);
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.running = true;
        inner.events.push(SupervisorEvent::Restart);
        Ok(())
    }

    fn is_running(&self) -> bool {
        lock(&self.inner).running
    }

    fn install_restart_policy(&self) -> Result<()> {
        lock(&self.inner).events.push(SupervisorEvent::RestartPolicy);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    Open(u16),
    Close(u16),
}

#[derive(Default)]
struct PortsInner {
    open: BTreeSet<u16>,
    events: Vec<PortEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryPorts {
    inner: Arc<Mutex<PortsInner>>,
}

impl MemoryPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_ports(&self) -> Vec<u16> {
        lock(&self.inner).open.iter().copied().collect()
    }

    pub fn events(&self) -> Vec<PortEvent> {
        lock(&self.inner).events.clone()
    }

    pub fn clear(&self) {
        lock(&self.inner).events.clear();
    }
}

impl PortManager for MemoryPorts {
    fn open(&self, port: u16) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.open.insert(port);
        inner.events.push(PortEvent::Open(port));
        Ok(())
    }

    fn close(&self, port: u16) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.open.remove(&port);
        inner.events.push(PortEvent::Close(port));
        Ok(())
    }
}

/// Shared by every simulated node, like the real leader settings
#[derive(Clone, Default)]
pub struct MemoryLeaderStore {
    inner: Arc<Mutex<PublishedValues>>,
}

impl MemoryLeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PublishedValues {
        lock(&self.inner).clone()
    }
}

impl LeaderStore for MemoryLeaderStore {
    fn published(&self) -> Result<PublishedValues> {
        Ok(self.snapshot())
    }

    fn publish(&self, values: &PublishedValues) -> Result<()> {
        let mut inner = lock(&self.inner);
        if let Some(v) = &values.leader_address {
            inner.leader_address = Some(v.clone());
        }
        if let Some(v) = &values.cluster {
            inner.cluster = Some(v.clone());
        }
        if let Some(v) = &values.force_rejoin {
            inner.force_rejoin = Some(v.clone());
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStatus {
    history: Arc<Mutex<Vec<Status>>>,
}

impl MemoryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Status> {
        lock(&self.history).last().cloned()
    }

    pub fn history(&self) -> Vec<Status> {
        lock(&self.history).clone()
    }
}

impl StatusSink for MemoryStatus {
    fn set(&self, status: Status) {
        tracing::debug!("Status {}", status);
        lock(&self.history).push(status);
    }
}

/// Records requested sleeps without blocking
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slept(&self) -> Vec<Duration> {
        lock(&self.slept).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        lock(&self.slept).push(duration);
    }
}
