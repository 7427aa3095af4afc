//! Multi-Paxos simulation runner
//!
//! Starts a full deployment in-process, lets the clients run for a while,
//! then prints what every replica executed.

use std::time::Duration;

use clap::Parser;
use error_stack::{Report, ResultExt};
use paxossim_paxos::{Address, Command, SimConfig, Simulation, SimulationError, Slot};
use serde::Serialize;
use tracing::info;

/// Run a Multi-Paxos simulation
#[derive(Parser, Debug)]
#[command(name = "paxossim")]
#[command(about = "Run a Multi-Paxos simulation and print each replica's log")]
struct Args {
    /// Failures to tolerate; sizes the deployment as f+1 replicas and
    /// leaders and 2f+1 acceptors
    #[arg(short, long, default_value_t = 1)]
    failures: usize,

    /// Number of clients
    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    /// Override the number of acceptors
    #[arg(long)]
    acceptors: Option<usize>,

    /// Override the number of leaders
    #[arg(long)]
    leaders: Option<usize>,

    /// Override the number of replicas
    #[arg(long)]
    replicas: Option<usize>,

    /// Milliseconds between two requests from one client
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,

    /// Slots a replica may have in flight
    #[arg(short, long, default_value_t = 5)]
    window: u64,

    /// How long the clients run, in seconds
    #[arg(short, long, default_value_t = 5)]
    duration_secs: u64,

    /// Print the executed logs as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> SimConfig {
        let mut config = SimConfig::with_failures(self.failures)
            .clients(self.clients)
            .client_interval(Duration::from_millis(self.interval_ms))
            .window(self.window);
        if let Some(acceptors) = self.acceptors {
            config.acceptors = acceptors;
        }
        if let Some(leaders) = self.leaders {
            config.leaders = leaders;
        }
        if let Some(replicas) = self.replicas {
            config.replicas = replicas;
        }
        config
    }
}

#[derive(Serialize)]
struct Executed {
    slot: Slot,
    command: Command,
}

#[derive(Serialize)]
struct ReplicaLog {
    replica: Address,
    executed: Vec<Executed>,
}

/// Time allowed for in-flight commands to be decided after the clients stop.
const SETTLE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Report<SimulationError>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    info!(?config, "configuration");

    let mut sim = Simulation::new(config)?;
    sim.start()?;

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
    sim.stop_clients();
    tokio::time::sleep(SETTLE).await;

    let logs: Vec<ReplicaLog> = sim
        .replica_logs()
        .into_iter()
        .map(|(replica, entries)| ReplicaLog {
            replica,
            executed: entries
                .into_iter()
                .map(|(slot, command)| Executed { slot, command })
                .collect(),
        })
        .collect();
    sim.shutdown().await?;

    if args.json {
        let json = serde_json::to_string_pretty(&logs)
            .change_context(SimulationError)
            .attach("serializing replica logs")?;
        println!("{json}");
    } else {
        for log in &logs {
            println!("{} executed {} commands", log.replica, log.executed.len());
            for Executed { slot, command } in &log.executed {
                println!("  {slot}: {command}");
            }
        }
    }
    Ok(())
}
