//! Forced rejoin after a leader snapshot restore

mod common;

use common::Fleet;
use minikv_fleet::coordinator::bootstrap::RETRY_REGISTRATION;
use minikv_fleet::coordinator::{Step, StepOutcome};
use minikv_fleet::host::{Status, SupervisorEvent};
use minikv_fleet::{Role, Trigger};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn seeded(node: common::Node, seed: u64) -> common::Node {
    common::Node {
        coordinator: node.coordinator.with_rng(StdRng::seed_from_u64(seed)),
        ..node
    }
}

#[test]
fn test_rejoin_stops_at_first_success() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let mut node = seeded(fleet.join_follower(2), 42);

    let member_dir = node.coordinator.record().member_dir();
    std::fs::create_dir_all(member_dir.join("snap")).unwrap();
    std::fs::write(member_dir.join("snap").join("db"), b"old").unwrap();
    node.supervisor.clear();
    fleet.cluster.fail_next_registers(3);

    let report = node.dispatch(Trigger::ForceRejoin, Role::Follower);
    assert_eq!(report.executed(), vec![Step::Rejoin, Step::ReportHealth]);
    assert_eq!(report.outcome(Step::Rejoin), Some(&StepOutcome::Done));

    let rejoin = report.rejoin.expect("rejoin report");
    assert!(rejoin.rejoined);
    assert_eq!(rejoin.attempts, 4);
    assert_eq!(rejoin.delays.len(), 4);
    assert!(rejoin.delays.iter().all(|d| (1..=10).contains(d)));
    let expected: Vec<Duration> = rejoin.delays.iter().map(|d| Duration::from_secs(*d)).collect();
    assert_eq!(node.sleeper.slept(), expected);

    assert!(!member_dir.exists());
    assert!(node.coordinator.state().latches.registered);
    assert_eq!(node.supervisor.events().first(), Some(&SupervisorEvent::Stop));
    assert_eq!(
        fleet.cluster.cluster_string(),
        "node1=https://10.0.0.1:2380,node2=https://10.0.0.2:2380"
    );
    assert!(matches!(node.status.last(), Some(Status::Active(_))));
}

#[test]
fn test_rejoin_gives_up_after_eleven_attempts() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let mut node = seeded(fleet.join_follower(2), 7);
    fleet.cluster.fail_next_registers(100);

    let report = node.dispatch(Trigger::ForceRejoin, Role::Follower);
    assert_eq!(
        report.outcome(Step::Rejoin),
        Some(&StepOutcome::Waiting(RETRY_REGISTRATION.into()))
    );
    let rejoin = report.rejoin.expect("rejoin report");
    assert!(!rejoin.rejoined);
    assert_eq!(rejoin.attempts, 11);
    assert_eq!(node.sleeper.slept().len(), 11);
    assert!(!node.coordinator.state().latches.registered);

    // Persisted before the first attempt, so a crash mid-rejoin stays unregistered
    let config = (*node.config).clone();
    let node = node.reopen(config);
    assert!(!node.coordinator.state().latches.registered);
}

#[test]
fn test_same_seed_same_delays() {
    let delays = |seed| {
        let fleet = Fleet::new();
        let _leader = fleet.bootstrap_leader();
        let mut node = seeded(fleet.join_follower(2), seed);
        fleet.cluster.fail_next_registers(100);
        node.dispatch(Trigger::ForceRejoin, Role::Follower)
            .rejoin
            .map(|r| r.delays)
            .unwrap_or_default()
    };
    assert_eq!(delays(11), delays(11));
}

#[test]
fn test_signalled_rejoin_runs_once_per_marker() {
    let fleet = Fleet::new();
    let leader = fleet.bootstrap_leader();
    let mut node = seeded(fleet.join_follower(2), 1);

    let marker = leader.coordinator.signal_force_rejoin().unwrap();
    assert_eq!(fleet.leader.snapshot().force_rejoin.as_deref(), Some(marker.as_str()));

    let report = node.dispatch(Trigger::ForceRejoin, Role::Follower);
    assert_eq!(report.outcome(Step::Rejoin), Some(&StepOutcome::Done));
    assert_eq!(node.coordinator.state().last_force_rejoin.as_deref(), Some(marker.as_str()));

    node.supervisor.clear();
    let report = node.dispatch(Trigger::ForceRejoin, Role::Follower);
    assert!(matches!(
        report.outcome(Step::Rejoin),
        Some(StepOutcome::Skipped(_))
    ));
    assert!(report.rejoin.is_none());
    assert_eq!(node.supervisor.count(SupervisorEvent::Stop), 0);
}

#[test]
fn test_leader_ignores_force_rejoin() {
    let fleet = Fleet::new();
    let mut leader = fleet.bootstrap_leader();
    leader.supervisor.clear();

    let report = leader.dispatch(Trigger::ForceRejoin, Role::Leader);
    assert!(report.steps.is_empty());
    assert!(leader.supervisor.events().is_empty());
    assert!(leader.coordinator.state().latches.registered);
}

#[test]
fn test_inverted_backoff_fails_before_stopping() {
    let fleet = Fleet::new();
    let _leader = fleet.bootstrap_leader();
    let follower = fleet.join_follower(2);

    let mut config = fleet.config(2);
    config.rejoin.min_delay = 10;
    config.rejoin.max_delay = 1;
    let mut node = follower.reopen(config);
    node.supervisor.clear();

    let result = node.coordinator.dispatch(
        Trigger::ForceRejoin,
        minikv_fleet::Context::new(Role::Follower).joined(),
    );
    assert!(matches!(result, Err(minikv_fleet::Error::InvalidConfig(_))));
    assert!(node.supervisor.events().is_empty());
    assert!(node.coordinator.state().latches.registered);
}
