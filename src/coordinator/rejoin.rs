//! Forced rejoin after the leader restored from a snapshot
//!
//! The node discards its member data and re-registers as a fresh member,
//! spreading attempts out with random waits so a whole fleet told to
//! rejoin at once does not hit the leader in lockstep.

use crate::common::{Error, FleetConfig, Result};
use crate::coordinator::bootstrap;
use crate::host::Host;
use crate::node::{LocalState, NodeRecord, StateFile};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

/// Random wait before each registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub min: u64,
    pub max: u64,
    pub unit: Duration,
}

impl Backoff {
    pub fn from_config(config: &FleetConfig) -> Result<Self> {
        let rejoin = &config.rejoin;
        if rejoin.min_delay > rejoin.max_delay {
            return Err(Error::InvalidConfig(format!(
                "rejoin.min_delay {} exceeds rejoin.max_delay {}",
                rejoin.min_delay, rejoin.max_delay
            )));
        }
        if u32::try_from(rejoin.max_delay).is_err() {
            return Err(Error::InvalidConfig(format!(
                "rejoin.max_delay {} is out of range",
                rejoin.max_delay
            )));
        }
        Ok(Self {
            attempts: rejoin.attempts,
            min: rejoin.min_delay,
            max: rejoin.max_delay,
            unit: config.rejoin_delay_unit(),
        })
    }

    /// Draw a delay in `[min, max]` units.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min..=self.max)
    }

    /// Wall-clock length of `delay` units
    pub fn wait(&self, delay: u64) -> Result<Duration> {
        u32::try_from(delay)
            .ok()
            .and_then(|units| self.unit.checked_mul(units))
            .ok_or_else(|| Error::InvalidConfig(format!("rejoin delay {} is out of range", delay)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejoinReport {
    pub attempts: u32,
    /// Delay drawn before each attempt, in delay units
    pub delays: Vec<u64>,
    pub rejoined: bool,
}

/// Wipe local member data and register again.
///
/// Exhausting every attempt is not an error; the node stays unregistered
/// and the next trigger takes the ordinary joiner path.
pub fn force_rejoin<R: Rng + ?Sized>(
    config: &FleetConfig,
    host: &Host,
    state: &mut LocalState,
    store: Option<&StateFile>,
    rng: &mut R,
) -> Result<RejoinReport> {
    let backoff = Backoff::from_config(config)?;
    tracing::info!("Forcing rejoin of {}", config.unit_name);
    host.supervisor.stop()?;

    state.latches.registered = false;
    if let Some(store) = store {
        store.save(state)?;
    }

    let member_dir = NodeRecord::derive(config, state).member_dir();
    if member_dir.exists() {
        tracing::info!("Removing {}", member_dir.display());
        std::fs::remove_dir_all(&member_dir)?;
    }

    let mut report = RejoinReport::default();
    for attempt in 1..=backoff.attempts {
        let delay = backoff.draw(rng);
        report.delays.push(delay);
        report.attempts = attempt;
        host.sleeper.sleep(backoff.wait(delay)?);

        let outcome = bootstrap::register_with_leader(config, host, state)?;
        if state.latches.registered {
            report.rejoined = true;
            break;
        }
        tracing::warn!("Rejoin attempt {} of {}: {:?}", attempt, backoff.attempts, outcome);
    }

    if !report.rejoined {
        tracing::warn!("{} did not rejoin after {} attempts", config.unit_name, report.attempts);
    }
    Ok(report)
}
