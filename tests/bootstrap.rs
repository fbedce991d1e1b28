//! Bootstrap and registration across a small in-memory fleet

mod common;

use common::Fleet;
use minikv_fleet::coordinator::bootstrap::{NOT_HEALTHY, RETRY_REGISTRATION, RETRY_UNREGISTRATION};
use minikv_fleet::coordinator::server::MISSING_TLS;
use minikv_fleet::coordinator::{NodePhase, Step, StepOutcome};
use minikv_fleet::host::{Status, SupervisorEvent};
use minikv_fleet::membership::MembershipCall;
use minikv_fleet::node::ClusterState;
use minikv_fleet::{Role, Trigger};
use std::time::Duration;

#[test]
fn test_fresh_single_node_bootstrap() {
    let fleet = Fleet::new();
    let mut node = fleet.node(1);

    let report = node.dispatch(Trigger::Tick, Role::Leader);
    assert_eq!(
        report.executed(),
        vec![
            Step::ConfigureRestartPolicy,
            Step::PlaceTls,
            Step::ExportClientEnv,
            Step::InitializeCluster,
            Step::ReportHealth,
        ]
    );
    assert_eq!(report.phase, NodePhase::SteadyState);

    let state = node.coordinator.state();
    assert_eq!(state.cluster_string.as_deref(), Some("node1=https://10.0.0.1:2380"));
    assert_eq!(state.cluster_state, ClusterState::New);
    assert!(state.latches.registered);
    assert!(state.latches.leader_configured);

    let published = fleet.leader.snapshot();
    assert_eq!(published.leader_address.as_deref(), Some("https://10.0.0.1:2379"));
    assert_eq!(published.cluster.as_deref(), Some("node1=https://10.0.0.1:2380"));

    assert_eq!(node.ports.open_ports(), vec![2379]);
    assert_eq!(node.sleeper.slept(), vec![Duration::from_secs(2)]);
    assert_eq!(node.conf_value("initial-cluster-state").as_deref(), Some("new"));
    assert_eq!(node.conf_value("initial-cluster-token").as_deref(), Some("fleet-token"));
    match node.status.last() {
        Some(Status::Active(msg)) => assert!(msg.starts_with("Healthy with")),
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn test_unhealthy_bootstrap_blocks_without_latching() {
    let fleet = Fleet::new();
    let mut node = fleet.node(1);
    fleet.cluster.set_healthy(false);

    let report = node.dispatch(Trigger::Tick, Role::Leader);
    assert_eq!(
        report.outcome(Step::InitializeCluster),
        Some(&StepOutcome::Blocked(NOT_HEALTHY.into()))
    );
    assert_eq!(node.status.last(), Some(Status::Blocked(NOT_HEALTHY.into())));
    assert!(!node.coordinator.state().latches.registered);
    assert!(!node.coordinator.state().latches.leader_configured);
    assert!(!fleet.leader.snapshot().is_published());
    assert!(node.ports.open_ports().is_empty());
    // Left running for inspection
    assert_eq!(node.supervisor.count(SupervisorEvent::Stop), 0);

    fleet.cluster.set_healthy(true);
    let report = node.dispatch(Trigger::Tick, Role::Leader);
    assert_eq!(report.outcome(Step::InitializeCluster), Some(&StepOutcome::Done));
    assert!(fleet.leader.snapshot().is_published());
}

#[test]
fn test_joiner_retries_then_registers() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let mut node = fleet.node(2);

    fleet.cluster.fail_next_registers(1);
    let report = node.dispatch(Trigger::PeerJoined, Role::Follower);
    assert_eq!(
        report.outcome(Step::RegisterWithLeader),
        Some(&StepOutcome::Waiting(RETRY_REGISTRATION.into()))
    );
    assert_eq!(node.status.last(), Some(Status::Waiting(RETRY_REGISTRATION.into())));
    assert!(!node.coordinator.state().latches.registered);
    assert!(node.ports.open_ports().is_empty());
    assert!(!node.coordinator.record().conf_path().exists());

    // Redelivery of the same trigger succeeds
    let report = node.dispatch(Trigger::PeerJoined, Role::Follower);
    assert_eq!(report.outcome(Step::RegisterWithLeader), Some(&StepOutcome::Done));

    let state = node.coordinator.state();
    assert!(state.latches.registered);
    assert_eq!(state.cluster_state, ClusterState::Existing);
    assert_eq!(
        state.cluster_string.as_deref(),
        Some("node1=https://10.0.0.1:2380,node2=https://10.0.0.2:2380")
    );
    assert_eq!(
        node.conf_value("initial-cluster").as_deref(),
        Some("node1=https://10.0.0.1:2380,node2=https://10.0.0.2:2380")
    );
    assert_eq!(node.conf_value("initial-cluster-state").as_deref(), Some("existing"));
    assert_eq!(node.ports.open_ports(), vec![2379]);
    assert_eq!(node.supervisor.count(SupervisorEvent::Restart), 1);
}

#[test]
fn test_existing_peer_url_is_unregistered_once_before_register() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let stale = fleet
        .cluster
        .seed_member("", "https://10.0.0.2:2380", "https://10.0.0.2:2379");
    fleet.cluster.clear_calls();

    let _node = fleet.join_follower(2);

    let mutations: Vec<MembershipCall> = fleet
        .cluster
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                MembershipCall::Unregister { .. } | MembershipCall::Register { .. }
            )
        })
        .collect();
    assert_eq!(
        mutations,
        vec![
            MembershipCall::Unregister { id: stale },
            MembershipCall::Register {
                name: "node2".into(),
                peer_url: "https://10.0.0.2:2380".into(),
            },
        ]
    );
    assert_eq!(fleet.cluster.members().len(), 2);
}

#[test]
fn test_cluster_state_new_only_for_first_initialization() {
    let fleet = Fleet::new();
    let leader = fleet.bootstrap_leader();
    let mut follower = fleet.join_follower(2);
    assert_eq!(leader.coordinator.state().cluster_state, ClusterState::New);
    assert_eq!(follower.coordinator.state().cluster_state, ClusterState::Existing);

    // A promoted follower adopts the cluster and never initializes
    let report = follower.dispatch(Trigger::Tick, Role::Leader);
    assert!(report.executed().contains(&Step::AdoptLeadership));
    assert!(!report.executed().contains(&Step::InitializeCluster));
    assert_eq!(follower.coordinator.state().cluster_state, ClusterState::Existing);
    assert!(follower.coordinator.state().latches.leader_configured);

    let published = fleet.leader.snapshot();
    assert_eq!(published.leader_address.as_deref(), Some("https://10.0.0.2:2379"));
    assert_eq!(
        published.cluster.as_deref(),
        Some("node1=https://10.0.0.1:2380,node2=https://10.0.0.2:2380")
    );
}

#[test]
fn test_state_survives_restart() {
    let fleet = Fleet::new();
    let leader = fleet.bootstrap_leader();
    let config = (*leader.config).clone();
    let mut leader = leader.reopen(config);
    leader.supervisor.clear();

    let report = leader.dispatch(Trigger::Tick, Role::Leader);
    assert_eq!(report.executed(), vec![Step::ReportHealth]);
    assert!(leader.supervisor.events().is_empty());
    assert_eq!(
        leader.status.last(),
        Some(Status::Active("Healthy with 1 known peer".into()))
    );
}

#[test]
fn test_follower_waits_for_published_leader() {
    let fleet = Fleet::new();
    let mut node = fleet.node(2);

    let report = node.dispatch(Trigger::PeerJoined, Role::Follower);
    assert!(matches!(
        report.outcome(Step::RegisterWithLeader),
        Some(StepOutcome::Waiting(_))
    ));
    assert!(fleet
        .cluster
        .calls()
        .iter()
        .all(|c| !matches!(c, MembershipCall::Register { .. })));
}

#[test]
fn test_follower_without_peers_does_nothing() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let mut node = fleet.node(2);

    let report = node
        .coordinator
        .dispatch(
            Trigger::PeerJoined,
            minikv_fleet::Context::new(Role::Follower),
        )
        .unwrap();
    assert!(!report.executed().contains(&Step::RegisterWithLeader));
    assert!(!node.coordinator.state().latches.registered);
}

#[test]
fn test_missing_tls_blocks() {
    let fleet = Fleet::without_tls();
    let mut node = fleet.node(1);

    let report = node.dispatch(Trigger::Tick, Role::Leader);
    assert_eq!(
        report.executed(),
        vec![Step::ConfigureRestartPolicy, Step::AwaitTls]
    );
    assert_eq!(node.status.last(), Some(Status::Blocked(MISSING_TLS.into())));
    assert!(!node.coordinator.state().latches.ssl_placed);
}

#[test]
fn test_departing_unregisters_self() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let mut node = fleet.join_follower(2);
    assert_eq!(fleet.cluster.members().len(), 2);

    let report = node.dispatch(Trigger::Departing, Role::Follower);
    assert_eq!(report.executed(), vec![Step::Unregister]);
    assert_eq!(report.outcome(Step::Unregister), Some(&StepOutcome::Done));
    assert_eq!(fleet.cluster.cluster_string(), "node1=https://10.0.0.1:2380");

    // Absence is not an error
    let report = node.dispatch(Trigger::Departing, Role::Follower);
    assert!(matches!(
        report.outcome(Step::Unregister),
        Some(StepOutcome::Skipped(_))
    ));
}

#[test]
fn test_departing_waits_when_membership_unreachable() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let mut node = fleet.join_follower(2);
    fleet.cluster.fail_next_lists(1);

    let report = node.dispatch(Trigger::Departing, Role::Follower);
    assert_eq!(
        report.outcome(Step::Unregister),
        Some(&StepOutcome::Waiting(RETRY_UNREGISTRATION.into()))
    );
    assert_eq!(node.status.last(), Some(Status::Waiting(RETRY_UNREGISTRATION.into())));
    assert!(node.coordinator.state().latches.registered);
    assert_eq!(fleet.cluster.members().len(), 2);

    let report = node.dispatch(Trigger::Departing, Role::Follower);
    assert_eq!(report.outcome(Step::Unregister), Some(&StepOutcome::Done));
    assert!(!node.coordinator.state().latches.registered);
    assert_eq!(fleet.cluster.cluster_string(), "node1=https://10.0.0.1:2380");
}

#[test]
fn test_unknown_version_defers_without_state_change() {
    let fleet = Fleet::new();
    fleet.cluster.set_version("n/a");
    let mut node = fleet.node(1);

    let report = node.dispatch(Trigger::Tick, Role::Leader);
    assert!(matches!(
        report.outcome(Step::InitializeCluster),
        Some(StepOutcome::Deferred(_))
    ));
    assert!(matches!(
        report.outcome(Step::ExportClientEnv),
        Some(StepOutcome::Deferred(_))
    ));
    let state = node.coordinator.state();
    assert!(state.cluster_string.is_none());
    assert!(state.cluster_token.is_none());
    assert!(!state.latches.client_env_exported);
    assert!(!node.coordinator.record().conf_path().exists());
    assert!(!fleet.leader.snapshot().is_published());

    fleet.cluster.set_version("3.4.22");
    node.dispatch(Trigger::Tick, Role::Leader);
    assert!(node.coordinator.state().latches.leader_configured);
}
