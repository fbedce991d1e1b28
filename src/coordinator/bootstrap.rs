//! Initializer, joiner and leader-side membership steps
//!
//! Each step works on a copy of the local state and commits it only once
//! every side effect it latches has succeeded.

use crate::common::{connection_string, replace_port, Error, FleetConfig, Result};
use crate::coordinator::fsm::{Change, StepOutcome};
use crate::coordinator::render::ConfigRenderer;
use crate::host::{Host, PublishedValues};
use crate::membership::{members_cluster_string, Registration};
use crate::node::{ClusterState, LocalState, NodeRecord};

pub const NOT_HEALTHY: &str = "Cluster not healthy.";
pub const RETRY_REGISTRATION: &str = "Waiting to retry etcd registration";
pub const NO_LEADER: &str = "Waiting for the leader to publish its address";
pub const RETRY_MIGRATION: &str = "Waiting to retry peer port migration";
pub const RETRY_UNREGISTRATION: &str = "Waiting to retry etcd unregistration";

/// Address published for members to register against
pub fn leader_address(config: &FleetConfig) -> String {
    connection_string(&[&config.cluster_address], config.port)
}

/// Swap the peer port of every `name=url` entry.
pub fn rewrite_cluster_ports(cluster: &str, old: u16, new: u16) -> String {
    cluster
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) => format!("{}={}", name, replace_port(url, old, new)),
            None => entry.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// First-ever node: bootstrap a single-member cluster and publish it.
pub fn initialize_cluster(
    config: &FleetConfig,
    host: &Host,
    state: &mut LocalState,
) -> Result<StepOutcome> {
    let mut next = state.clone();
    next.ensure_token(config);
    next.cluster_state = ClusterState::New;
    let cluster = NodeRecord::derive(config, &next).self_cluster_string();
    next.cluster_string = Some(cluster.clone());

    let record = NodeRecord::derive(config, &next);
    ConfigRenderer::for_host(host).render(&record, state.open_port)?;
    host.supervisor.restart()?;

    host.sleeper.sleep(config.settle_delay());
    let health = host.membership.cluster_health(None);
    if health.is_unhealthy() {
        tracing::warn!("Bootstrap health check failed: {}", health.raw);
        return Ok(StepOutcome::Blocked(NOT_HEALTHY.into()));
    }

    host.ports.open(config.port)?;
    next.open_port = Some(config.port);

    let address = leader_address(config);
    tracing::info!("Publishing leader address {} for cluster {}", address, cluster);
    host.leader.publish(&PublishedValues {
        leader_address: Some(address.clone()),
        cluster: Some(cluster),
        force_rejoin: None,
    })?;
    next.leader_address = Some(address);
    next.latches.registered = true;
    next.latches.leader_configured = true;

    *state = next;
    Ok(StepOutcome::Done)
}

/// A registered node that became leader takes over the published values.
pub fn adopt_leadership(
    config: &FleetConfig,
    host: &Host,
    state: &mut LocalState,
) -> Result<StepOutcome> {
    let members = match host.membership.list_members(None) {
        Ok(members) => members,
        Err(e) if e.is_retryable() => {
            tracing::warn!("Cannot list members to adopt leadership: {}", e);
            return Ok(StepOutcome::Waiting(RETRY_REGISTRATION.into()));
        }
        Err(e) => return Err(e),
    };
    let cluster = members_cluster_string(&members);
    let address = leader_address(config);

    tracing::info!("Adopting leadership, publishing {}", address);
    host.leader.publish(&PublishedValues {
        leader_address: Some(address.clone()),
        cluster: Some(cluster.clone()),
        force_rejoin: None,
    })?;
    state.leader_address = Some(address);
    state.cluster_string = Some(cluster);
    state.latches.leader_configured = true;
    Ok(StepOutcome::Done)
}

fn join(host: &Host, record: &NodeRecord, leader: &str) -> Result<Registration> {
    let peer_url = record.peer_url();
    let members = host.membership.list_members(Some(leader))?;
    for member in members.values().filter(|m| m.advertises(&peer_url)) {
        tracing::info!(
            "Removing stale member {} advertising {} before registering",
            member.id,
            peer_url
        );
        host.membership.unregister(member.id, Some(leader))?;
    }
    tracing::info!("Registering {} at {} with {}", record.unit_name, peer_url, leader);
    host.membership.register(record)
}

/// Join the published cluster as a new member.
pub fn register_with_leader(
    config: &FleetConfig,
    host: &Host,
    state: &mut LocalState,
) -> Result<StepOutcome> {
    let published = host.leader.published()?;
    let leader = match published.leader_address {
        Some(leader) => leader,
        None => return Ok(StepOutcome::Waiting(NO_LEADER.into())),
    };

    let mut next = state.clone();
    next.ensure_token(config);
    next.leader_address = Some(leader.clone());

    let registration = match join(host, &NodeRecord::derive(config, &next), &leader) {
        Ok(registration) => registration,
        Err(e) if e.is_retryable() => {
            tracing::warn!("Registration with {} failed: {}", leader, e);
            return Ok(StepOutcome::Waiting(RETRY_REGISTRATION.into()));
        }
        Err(e) => return Err(e),
    };
    next.cluster_string = Some(registration.cluster_string);
    next.cluster_state = ClusterState::Existing;

    let record = NodeRecord::derive(config, &next);
    ConfigRenderer::for_host(host).render(&record, state.open_port)?;
    host.supervisor.restart()?;
    host.ports.open(config.port)?;
    next.open_port = Some(config.port);
    next.latches.registered = true;

    *state = next;
    Ok(StepOutcome::Done)
}

/// Leader side of a port change: rewrite every member, then republish.
///
/// Members already on the new port are left alone, so a retry after a
/// partial failure only touches the rest.
pub fn migrate_peer_port(
    config: &FleetConfig,
    host: &Host,
    state: &mut LocalState,
    management_port: Option<Change<u16>>,
) -> Result<StepOutcome> {
    let mut members = match host.membership.list_members(None) {
        Ok(members) => members,
        Err(e) if e.is_retryable() => {
            tracing::warn!("Cannot list members to migrate peer port: {}", e);
            return Ok(StepOutcome::Waiting(RETRY_MIGRATION.into()));
        }
        Err(e) => return Err(e),
    };

    if let Some(Change { old, new }) = management_port {
        for member in members.values_mut().filter(|m| !m.peer_urls.is_empty()) {
            let updated: Vec<String> = member
                .peer_urls
                .iter()
                .map(|url| replace_port(url, old, new))
                .collect();
            if updated == member.peer_urls {
                tracing::debug!("Member {} already uses port {}", member.id, new);
                continue;
            }
            let joined = updated.join(",");
            tracing::info!("Updating member {} peer URL to {}", member.id, joined);
            match host.membership.update_member(member.id, &joined) {
                Ok(_) => member.peer_urls = updated,
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Peer URL update of member {} failed: {}", member.id, e);
                    return Ok(StepOutcome::Waiting(RETRY_MIGRATION.into()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    let cluster = members_cluster_string(&members);
    if !cluster.is_empty() {
        state.cluster_string = Some(cluster);
    } else if let (Some(Change { old, new }), Some(adopted)) =
        (management_port, state.cluster_string.as_mut())
    {
        *adopted = rewrite_cluster_ports(adopted, old, new);
    }

    let record = NodeRecord::derive(config, state);
    let rendered = ConfigRenderer::for_host(host).render(&record, state.open_port)?;
    if let Some(change) = rendered.ports {
        state.open_port = Some(change.new);
    }

    let address = leader_address(config);
    host.leader.publish(&PublishedValues {
        leader_address: Some(address.clone()),
        cluster: state.cluster_string.clone(),
        force_rejoin: None,
    })?;
    state.leader_address = Some(address);

    host.supervisor.restart()?;
    Ok(StepOutcome::Done)
}

/// Remove this node from the cluster on departure.
///
/// A retryable failure leaves the local state untouched for redelivery.
pub fn unregister_self(
    config: &FleetConfig,
    host: &Host,
    state: &mut LocalState,
) -> Result<StepOutcome> {
    let leader = host
        .leader
        .published()?
        .leader_address
        .or_else(|| state.leader_address.clone());
    let members = match host.membership.list_members(leader.as_deref()) {
        Ok(members) => members,
        Err(e) if e.is_retryable() => {
            tracing::warn!("Cannot list members to unregister: {}", e);
            return Ok(StepOutcome::Waiting(RETRY_UNREGISTRATION.into()));
        }
        Err(e) => return Err(e),
    };
    let member = members
        .values()
        .find(|m| m.name == config.unit_name)
        .map(|m| m.id);

    let outcome = match member {
        Some(id) => {
            tracing::info!("Unregistering {} ({})", config.unit_name, id);
            match host.membership.unregister(id, leader.as_deref()) {
                Ok(()) => StepOutcome::Done,
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Unregistering {} failed: {}", config.unit_name, e);
                    return Ok(StepOutcome::Waiting(RETRY_UNREGISTRATION.into()));
                }
                Err(e) => return Err(e),
            }
        }
        None => {
            tracing::debug!("{} is not a member, nothing to unregister", config.unit_name);
            StepOutcome::Skipped(Error::MemberNotFound(config.unit_name.clone()).to_string())
        }
    };
    state.latches.registered = false;
    state.latches.leader_configured = false;
    Ok(outcome)
}
