//! Shared in-memory fleet for integration tests

#![allow(dead_code)]

use minikv_fleet::coordinator::DispatchReport;
use minikv_fleet::host::{
    MemoryLeaderStore, MemoryPorts, MemoryStatus, MemorySupervisor, RecordingSleeper, TlsFile,
    TlsMaterial,
};
use minikv_fleet::membership::InMemoryCluster;
use minikv_fleet::{Context, Coordinator, FleetConfig, Host, Role, Trigger};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Fleet {
    pub dir: TempDir,
    pub cluster: InMemoryCluster,
    pub leader: MemoryLeaderStore,
}

pub struct Node {
    pub config: Arc<FleetConfig>,
    pub supervisor: MemorySupervisor,
    pub ports: MemoryPorts,
    pub status: MemoryStatus,
    pub sleeper: RecordingSleeper,
    pub host: Host,
    pub coordinator: Coordinator,
}

impl Fleet {
    pub fn new() -> Self {
        let fleet = Self::without_tls();
        let tls = TlsMaterial::new(fleet.config(1).tls);
        for file in TlsFile::ALL {
            let path = tls.path(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "pem\n").unwrap();
        }
        fleet
    }

    pub fn without_tls() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            cluster: InMemoryCluster::default(),
            leader: MemoryLeaderStore::new(),
        }
    }

    /// Config of `node<index>` at `10.0.0.<index>`
    pub fn config(&self, index: usize) -> FleetConfig {
        let name = format!("node{}", index);
        let address = format!("10.0.0.{}", index);
        let mut config = FleetConfig::for_node(&name, &address, &address);
        let root = self.dir.path().join(&name);
        config.conf_dir = root.join("conf");
        config.data_dir = root.join("data");
        config.state_dir = root.join("state");
        config.cluster_token = Some("fleet-token".into());
        let tls = self.dir.path().join("tls");
        config.tls.ca = tls.join("ca.crt");
        config.tls.server_cert = tls.join("server.crt");
        config.tls.server_key = tls.join("server.key");
        config.tls.client_cert = tls.join("client.crt");
        config.tls.client_key = tls.join("client.key");
        config
    }

    pub fn node(&self, index: usize) -> Node {
        self.node_with(self.config(index))
    }

    pub fn node_with(&self, config: FleetConfig) -> Node {
        let supervisor = MemorySupervisor::new();
        let ports = MemoryPorts::new();
        let status = MemoryStatus::new();
        let sleeper = RecordingSleeper::new();
        let host = Host {
            membership: Arc::new(self.cluster.clone()),
            supervisor: Arc::new(supervisor.clone()),
            ports: Arc::new(ports.clone()),
            leader: Arc::new(self.leader.clone()),
            status: Arc::new(status.clone()),
            sleeper: Arc::new(sleeper.clone()),
            tls: TlsMaterial::new(config.tls.clone()),
        };
        let config = Arc::new(config);
        let coordinator = Coordinator::open(config.clone(), host.clone()).unwrap();
        Node {
            config,
            supervisor,
            ports,
            status,
            sleeper,
            host,
            coordinator,
        }
    }

    /// node1 bootstrapped as leader, with its member entry created the way
    /// the daemon would on first start
    pub fn bootstrap_leader(&self) -> Node {
        let mut node = self.node(1);
        node.dispatch(Trigger::Tick, Role::Leader);
        let record = node.coordinator.record();
        self.cluster
            .seed_member(&record.unit_name, &record.peer_url(), &record.client_url());
        node
    }

    /// node<index> registered as a follower
    pub fn join_follower(&self, index: usize) -> Node {
        let mut node = self.node(index);
        node.dispatch(Trigger::PeerJoined, Role::Follower);
        assert!(node.coordinator.state().latches.registered);
        node
    }
}

impl Node {
    /// Deliver `trigger`; followers report peers as joined.
    pub fn dispatch(&mut self, trigger: Trigger, role: Role) -> DispatchReport {
        let ctx = match role {
            Role::Leader => Context::new(role),
            Role::Follower => Context::new(role).joined(),
        };
        self.coordinator.dispatch(trigger, ctx).unwrap()
    }

    /// Same collaborators and state dir, new config
    pub fn reopen(self, config: FleetConfig) -> Node {
        let config = Arc::new(config);
        let coordinator = Coordinator::open(config.clone(), self.host.clone()).unwrap();
        Node {
            config,
            coordinator,
            ..self
        }
    }

    pub fn conf(&self) -> String {
        std::fs::read_to_string(self.coordinator.record().conf_path()).unwrap()
    }

    pub fn conf_value(&self, key: &str) -> Option<String> {
        let conf: serde_yaml::Value = serde_yaml::from_str(&self.conf()).unwrap();
        conf.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }
}
