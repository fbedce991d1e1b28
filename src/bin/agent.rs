//! Per-node agent binary

use clap::{Parser, Subcommand};
use minikv_fleet::{Context, Coordinator, FleetConfig, Host, Role, Trigger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minikv-fleet-agent")]
#[command(about = "minikv-fleet per-node bootstrap and membership agent")]
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
    /// Deliver one trigger and exit
    Dispatch {
        /// tick, config-changed, peer-joined, tls-written, force-rejoin, departing, upgraded
        trigger: Trigger,

        /// Leadership as resolved by the scheduler
        #[arg(long)]
        role: Role,

        /// Peers have shared membership information
        #[arg(long)]
        cluster_joined: bool,
    },

    /// Deliver a tick every health interval until interrupted
    Watch {
        #[arg(long)]
        role: Role,

        #[arg(long)]
        cluster_joined: bool,
    },

    /// Ask every follower to discard its data and rejoin (leader only)
    SignalRejoin,
}

fn init_tracing(config: &FleetConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(FleetConfig::load(cli.config.as_deref())?);
    init_tracing(&config);

    let host = Host::system(&config);
    let mut coordinator = Coordinator::open(config.clone(), host)?;

    match cli.command {
        Commands::Dispatch {
            trigger,
            role,
            cluster_joined,
        } => {
            let ctx = Context {
                role,
                cluster_joined,
            };
            let report = coordinator.dispatch(trigger, ctx)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Watch {
            role,
            cluster_joined,
        } => {
            let ctx = Context {
                role,
                cluster_joined,
            };
            let mut interval = tokio::time::interval(config.health_interval());
            tracing::info!(
                "Watching {} every {:?}",
                config.unit_name,
                config.health_interval()
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let (returned, result) = tokio::task::spawn_blocking(move || {
                            let result = coordinator.dispatch(Trigger::Tick, ctx);
                            (coordinator, result)
                        })
                        .await?;
                        coordinator = returned;
                        match result {
                            Ok(report) => tracing::debug!("Tick finished in {:?}", report.phase),
                            Err(e) => tracing::error!("Tick failed: {}", e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutting down");
                        break;
                    }
                }
            }
        }

        Commands::SignalRejoin => {
            let marker = coordinator.signal_force_rejoin()?;
            println!("{}", marker);
        }
    }

    Ok(())
}
