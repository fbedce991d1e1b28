//! CLI for cluster operations

use clap::{Parser, Subcommand};
use minikv_fleet::coordinator::check_cluster_health;
use minikv_fleet::host::{
    MemoryLeaderStore, MemoryPorts, MemoryStatus, MemorySupervisor, RecordingSleeper, TlsFile,
    TlsMaterial,
};
use minikv_fleet::membership::{EtcdCtl, InMemoryCluster, MembershipClient};
use minikv_fleet::node::LocalState;
use minikv_fleet::ops::ConnectionDetails;
use minikv_fleet::{Context, Coordinator, FleetConfig, Host, Role, Trigger};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "minikv-fleet")]
#[command(about = "minikv-fleet operator CLI")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster health as seen from this node
    Health,

    /// Current member list
    Members,

    /// Connection string, cluster string and client credentials
    ConnectionInfo,

    /// Bootstrap an in-process cluster and print what each node did
    Simulate {
        /// Number of nodes
        #[arg(long, default_value = "3")]
        nodes: usize,

        /// Scratch directory for rendered configs and state
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

fn simulated_config(workdir: &Path, index: usize) -> FleetConfig {
    let name = format!("node{}", index);
    let address = format!("10.0.0.{}", index);
    let mut config = FleetConfig::for_node(&name, &address, &address);
    let root = workdir.join(&name);
    config.conf_dir = root.join("conf");
    config.data_dir = root.join("data");
    config.state_dir = root.join("state");
    config.settle_delay = "0s".into();
    let tls = workdir.join("tls");
    config.tls.ca = tls.join("ca.crt");
    config.tls.server_cert = tls.join("server.crt");
    config.tls.server_key = tls.join("server.key");
    config.tls.client_cert = tls.join("client.crt");
    config.tls.client_key = tls.join("client.key");
    config
}

fn simulate(nodes: usize, workdir: &Path) -> anyhow::Result<()> {
    let cluster = InMemoryCluster::default();
    let leader = MemoryLeaderStore::new();

    for index in 1..=nodes.max(1) {
        let config = Arc::new(simulated_config(workdir, index));
        let tls = TlsMaterial::new(config.tls.clone());
        for file in TlsFile::ALL {
            let path = tls.path(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, "simulated\n")?;
        }

        let host = Host {
            membership: Arc::new(cluster.clone()),
            supervisor: Arc::new(MemorySupervisor::new()),
            ports: Arc::new(MemoryPorts::new()),
            leader: Arc::new(leader.clone()),
            status: Arc::new(MemoryStatus::new()),
            sleeper: Arc::new(RecordingSleeper::new()),
            tls,
        };
        let mut coordinator = Coordinator::new(config.clone(), host, LocalState::default());

        let report = if index == 1 {
            let report = coordinator.dispatch(Trigger::Tick, Context::new(Role::Leader))?;
            let record = coordinator.record();
            // The daemon creates the first member when it starts.
            cluster.seed_member(&record.unit_name, &record.peer_url(), &record.client_url());
            report
        } else {
            coordinator.dispatch(Trigger::PeerJoined, Context::new(Role::Follower).joined())?
        };

        println!("{}:", config.unit_name);
        for step in &report.steps {
            println!("  {:?} -> {:?}", step.step, step.outcome);
        }
        println!("  phase: {:?}", report.phase);
    }

    println!();
    println!("Cluster: {}", cluster.cluster_string());
    println!("{}", check_cluster_health(&cluster).message());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Health => {
            let config = FleetConfig::load(cli.config.as_deref())?;
            let report = check_cluster_health(&EtcdCtl::from_config(&config));
            println!("{}", report.message());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Members => {
            let config = FleetConfig::load(cli.config.as_deref())?;
            let members = EtcdCtl::from_config(&config).list_members(None)?;
            for member in members.values() {
                println!(
                    "{}  {:<12} {}  {}",
                    member.id,
                    member.name,
                    member.peer_urls_joined(),
                    member.client_urls.join(",")
                );
            }
        }

        Commands::ConnectionInfo => {
            let config = FleetConfig::load(cli.config.as_deref())?;
            let details = ConnectionDetails::collect(
                &config,
                &EtcdCtl::from_config(&config),
                &TlsMaterial::new(config.tls.clone()),
            )?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }

        Commands::Simulate { nodes, workdir } => {
            let workdir = workdir.unwrap_or_else(|| {
                std::env::temp_dir().join(format!("minikv-fleet-sim-{}", uuid::Uuid::new_v4()))
            });
            std::fs::create_dir_all(&workdir)?;
            simulate(nodes, &workdir)?;
            println!("Scratch files in {}", workdir.display());
        }
    }

    Ok(())
}
