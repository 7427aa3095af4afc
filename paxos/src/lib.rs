//! Multi-Paxos simulation
//!
//! Every role of "Paxos Made Moderately Complex" runs as its own tokio task
//! and talks to the others only through an addressed [`MessageExchange`].
//!
//! # Architecture
//!
//! - **Acceptors**: Promise ballots and accept pvalues under them
//! - **Leaders**: Own a ballot; spawn a [`Scout`] to get it adopted and a
//!   [`Commander`] per slot to get commands chosen
//! - **Replicas**: Turn client requests into slot proposals and apply
//!   decisions in slot order through a [`StateMachine`]
//! - **Clients**: Emit synthetic requests on a fixed interval
//!
//! Role logic is synchronous: each role implements [`Process`] and pushes
//! its sends and spawns onto an [`Outbox`], which [`run_process`] carries out.
//!
//! # Quick Start
//!
//! ```ignore
//! use paxossim_paxos::{SimConfig, Simulation};
//!
//! let mut sim = Simulation::new(SimConfig::with_failures(1))?;
//! sim.start()?;
//! tokio::time::sleep(Duration::from_secs(5)).await;
//! sim.stop_clients();
//! let logs = sim.replica_logs();
//! sim.shutdown().await?;
//! ```

#![warn(clippy::pedantic)]

pub mod acceptor;
pub mod client;
pub mod commander;
pub mod config;
pub mod error;
pub mod exchange;
pub mod leader;
mod messages;
pub mod process;
mod quorum;
pub mod replica;
pub mod scout;
pub mod sim;
pub mod state_machine;
pub mod types;

pub use acceptor::Acceptor;
pub use client::{Client, ClientHandle};
pub use commander::Commander;
pub use config::SimConfig;
pub use error::{ExchangeError, ProcessError, ProtocolViolation, SimulationError};
pub use exchange::{Inbox, LocalExchange, Mailbox, MessageExchange, mailbox};
pub use leader::Leader;
pub use messages::{AcceptorRequest, Body, LeaderInput, Message, ReplicaInput};
pub use process::{Delivery, Effect, Outbox, Process, Spawn, Step, run_process, spawn_process};
pub use replica::Replica;
pub use scout::Scout;
pub use sim::Simulation;
pub use state_machine::{NoopStateMachine, RecordingStateMachine, StateMachine};
pub use types::{Address, BallotNumber, Command, PValue, PValues, Role, Slot};
