//! Coordinator: runs one trigger to completion against the host

use crate::common::{Error, FleetConfig, Result};
use crate::coordinator::bootstrap::{self, RETRY_REGISTRATION};
use crate::coordinator::fsm::{
    self, ConfigDelta, Gates, Inputs, NodePhase, Role, Step, StepOutcome, Trigger,
};
use crate::coordinator::health::{check_cluster_health, HealthReport};
use crate::coordinator::rejoin::{self, RejoinReport};
use crate::coordinator::render::{client_env_exports, write_if_changed, ConfigRenderer};
use crate::host::{Host, PublishedValues, Status};
use crate::membership::members_cluster_string;
use crate::node::{LocalState, NodeRecord, StateFile};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;

pub const MISSING_TLS: &str = "Missing relation to certificate authority.";

/// Per-trigger facts resolved by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub role: Role,
    /// Peers have shared their membership information
    pub cluster_joined: bool,
}

impl Context {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            cluster_joined: false,
        }
    }

    pub fn joined(mut self) -> Self {
        self.cluster_joined = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub trigger: Trigger,
    pub role: Role,
    pub steps: Vec<StepRecord>,
    pub phase: NodePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejoin: Option<RejoinReport>,
}

impl DispatchReport {
    pub fn executed(&self) -> Vec<Step> {
        self.steps.iter().map(|r| r.step).collect()
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }
}

pub struct Coordinator {
    config: Arc<FleetConfig>,
    host: Host,
    state: LocalState,
    store: Option<StateFile>,
    rng: StdRng,
}

impl Coordinator {
    /// Coordinator over in-memory state only
    pub fn new(config: Arc<FleetConfig>, host: Host, state: LocalState) -> Self {
        Self {
            config,
            host,
            state,
            store: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Coordinator persisting to `<state_dir>/state.json`
    pub fn open(config: Arc<FleetConfig>, host: Host) -> Result<Self> {
        let store = StateFile::new(&config.state_dir);
        let state = store.load()?;
        tracing::debug!("Loaded state from {}", store.path().display());
        Ok(Self {
            store: Some(store),
            ..Self::new(config, host, state)
        })
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn record(&self) -> NodeRecord {
        NodeRecord::derive(&self.config, &self.state)
    }

    pub fn phase(&self) -> NodePhase {
        NodePhase::of(&self.state.latches)
    }

    pub fn health(&self) -> HealthReport {
        check_cluster_health(self.host.membership.as_ref())
    }

    /// Leader only: ask every follower to discard its data and rejoin.
    pub fn signal_force_rejoin(&self) -> Result<String> {
        let marker = chrono::Utc::now().to_rfc3339();
        tracing::info!("Requesting fleet-wide rejoin ({})", marker);
        self.host.leader.publish(&PublishedValues {
            force_rejoin: Some(marker.clone()),
            ..Default::default()
        })?;
        Ok(marker)
    }

    fn persist(&mut self) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(&mut self.state)?;
        }
        Ok(())
    }

    /// Plan and execute every step enabled by `trigger`.
    ///
    /// The plan is recomputed after each step so latches set along the way
    /// enable later steps; no step runs twice in one dispatch.
    pub fn dispatch(&mut self, trigger: Trigger, ctx: Context) -> Result<DispatchReport> {
        tracing::info!(
            "Dispatching {} for {} as {}",
            trigger,
            self.config.unit_name,
            ctx.role
        );
        let current = self.config.port_settings();
        let delta = ConfigDelta::between(self.state.seen, current);
        let published = self.host.leader.published()?;
        let gates = Gates {
            tls_available: self.host.tls.is_ready(),
            cluster_joined: ctx.cluster_joined,
            cluster_published: published.is_published(),
        };

        let mut report = DispatchReport {
            trigger,
            role: ctx.role,
            steps: Vec::new(),
            phase: self.phase(),
            rejoin: None,
        };
        let mut executed: Vec<Step> = Vec::new();

        loop {
            let steps = fsm::plan(&Inputs {
                trigger,
                role: ctx.role,
                latches: &self.state.latches,
                gates,
                delta: &delta,
            });
            let Some(step) = steps.into_iter().find(|s| !executed.contains(s)) else {
                break;
            };
            executed.push(step);
            if let Some(phase) = step.phase() {
                tracing::debug!("{} entering {:?}", self.config.unit_name, phase);
            }

            let outcome = match self.execute(step, &delta, &published, &mut report) {
                Ok(outcome) => outcome,
                Err(Error::VersionUnknown) => {
                    tracing::warn!("Deferring {:?}: store version unknown", step);
                    StepOutcome::Deferred(Error::VersionUnknown.to_string())
                }
                Err(e) => {
                    tracing::error!("{:?} failed: {}", step, e);
                    self.persist()?;
                    return Err(e);
                }
            };
            self.persist()?;

            match &outcome {
                StepOutcome::Waiting(msg) => self.host.status.set(Status::Waiting(msg.clone())),
                StepOutcome::Blocked(msg) => self.host.status.set(Status::Blocked(msg.clone())),
                _ => {}
            }
            report.steps.push(StepRecord { step, outcome });
        }

        let migration_pending = report
            .outcome(Step::MigratePeerPort)
            .is_some_and(|o| !o.is_done());
        if (trigger == Trigger::ConfigChanged || self.state.seen.is_none()) && !migration_pending {
            self.state.seen = Some(current);
            self.persist()?;
        }

        report.phase = self.phase();
        Ok(report)
    }

    fn execute(
        &mut self,
        step: Step,
        delta: &ConfigDelta,
        published: &PublishedValues,
        report: &mut DispatchReport,
    ) -> Result<StepOutcome> {
        let config = Arc::clone(&self.config);
        match step {
            Step::ConfigureRestartPolicy => {
                self.host.supervisor.install_restart_policy()?;
                self.state.latches.service_restart_configured = true;
                Ok(StepOutcome::Done)
            }
            Step::AwaitTls => Ok(StepOutcome::Blocked(MISSING_TLS.into())),
            Step::PlaceTls => {
                std::fs::create_dir_all(&config.conf_dir)?;
                self.state.latches.ssl_placed = true;
                Ok(StepOutcome::Done)
            }
            Step::ExportClientEnv => {
                let version = ConfigRenderer::for_host(&self.host).version()?;
                if let Some(path) = &config.client_env_path {
                    write_if_changed(path, &client_env_exports(&version, &config.tls))?;
                }
                self.state.latches.client_env_exported = true;
                Ok(StepOutcome::Done)
            }
            Step::InitializeCluster => {
                bootstrap::initialize_cluster(&config, &self.host, &mut self.state)
            }
            Step::AdoptLeadership => {
                bootstrap::adopt_leadership(&config, &self.host, &mut self.state)
            }
            Step::RegisterWithLeader => {
                bootstrap::register_with_leader(&config, &self.host, &mut self.state)
            }
            Step::MigratePeerPort => {
                bootstrap::migrate_peer_port(
                    &config,
                    &self.host,
                    &mut self.state,
                    delta.management_port,
                )
            }
            Step::MarkStale => {
                self.state.latches.rerender_config = true;
                Ok(StepOutcome::Done)
            }
            Step::RefreshTls => {
                if self.state.latches.registered || self.state.latches.leader_configured {
                    self.render()?;
                    self.host.supervisor.restart()?;
                }
                self.state.latches.ssl_placed = false;
                Ok(StepOutcome::Done)
            }
            Step::Rerender => self.rerender(),
            Step::Rejoin => {
                if let Some(marker) = &published.force_rejoin {
                    if self.state.last_force_rejoin.as_ref() == Some(marker) {
                        return Ok(StepOutcome::Skipped(format!("already rejoined for {}", marker)));
                    }
                }
                let rejoined = rejoin::force_rejoin(
                    &config,
                    &self.host,
                    &mut self.state,
                    self.store.as_ref(),
                    &mut self.rng,
                )?;
                self.state.last_force_rejoin = published.force_rejoin.clone();
                let done = rejoined.rejoined;
                report.rejoin = Some(rejoined);
                if done {
                    Ok(StepOutcome::Done)
                } else {
                    Ok(StepOutcome::Waiting(RETRY_REGISTRATION.into()))
                }
            }
            Step::Unregister => bootstrap::unregister_self(&config, &self.host, &mut self.state),
            Step::ReportHealth => {
                let health = self.health();
                self.host.status.set(health.status());
                Ok(StepOutcome::Done)
            }
        }
    }

    /// Render with the current record, tracking any client port move.
    fn render(&mut self) -> Result<bool> {
        let record = self.record();
        let outcome = ConfigRenderer::for_host(&self.host).render(&record, self.state.open_port)?;
        if let Some(change) = outcome.ports {
            self.state.open_port = Some(change.new);
        }
        Ok(outcome.written || outcome.migrated_data || outcome.ports.is_some())
    }

    fn rerender(&mut self) -> Result<StepOutcome> {
        if self.state.latches.registered {
            match self.host.membership.list_members(None) {
                Ok(members) => {
                    let cluster = members_cluster_string(&members);
                    if !cluster.is_empty() {
                        self.state.cluster_string = Some(cluster);
                    }
                }
                Err(e) => tracing::warn!("Rendering with the adopted cluster string: {}", e),
            }
        }
        let changed = self.render()?;
        self.state.latches.rerender_config = false;
        if changed && self.host.supervisor.is_running() {
            self.host.supervisor.restart()?;
        }
        Ok(StepOutcome::Done)
    }
}
