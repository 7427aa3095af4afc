//! Simulation wiring: one exchange, every long-lived role, and the clients.

use error_stack::{Report, ResultExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::acceptor::Acceptor;
use crate::client::{Client, ClientHandle};
use crate::config::SimConfig;
use crate::error::{ProcessError, SimulationError};
use crate::exchange::{LocalExchange, Mailbox, MessageExchange, mailbox};
use crate::leader::Leader;
use crate::process::{Process, run_process};
use crate::replica::Replica;
use crate::state_machine::{RecordingStateMachine, StateMachine};
use crate::types::{Address, Command, Role, Slot};

type ProcessTask = JoinHandle<Result<(), Report<ProcessError>>>;

/// Registered but not yet running.
struct Pending<S> {
    acceptors: Vec<(Acceptor, Mailbox)>,
    leaders: Vec<(Leader, Mailbox)>,
    replicas: Vec<(Replica<S>, Mailbox)>,
}

/// A complete Multi-Paxos deployment inside one process.
///
/// Construction registers every acceptor, leader and replica with a fresh
/// exchange, so by the time anything runs every long-lived address is
/// routable. Nothing runs until [`Simulation::start`].
pub struct Simulation<S = RecordingStateMachine> {
    config: SimConfig,
    exchange: LocalExchange,
    cancel: CancellationToken,
    acceptors: Vec<Address>,
    leaders: Vec<Address>,
    replicas: Vec<(Address, S)>,
    pending: Option<Pending<S>>,
    tasks: Vec<ProcessTask>,
    clients: Vec<ClientHandle>,
}

impl Simulation<RecordingStateMachine> {
    /// A simulation whose replicas record what they execute.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid.
    pub fn new(config: SimConfig) -> Result<Self, Report<SimulationError>> {
        Self::with_state_machines(config, |_| RecordingStateMachine::new())
    }

    /// Executed log of every replica, in replica order.
    #[must_use]
    pub fn replica_logs(&self) -> Vec<(Address, Vec<(Slot, Command)>)> {
        self.replicas
            .iter()
            .map(|(address, log)| (*address, log.entries()))
            .collect()
    }
}

impl<S> Simulation<S>
where
    S: StateMachine + Clone,
{
    /// Build a simulation, calling `state_machine` once per replica.
    ///
    /// The simulation keeps a clone of each state machine, available from
    /// [`Simulation::state_machines`].
    ///
    /// # Errors
    ///
    /// If the configuration is invalid.
    pub fn with_state_machines(
        config: SimConfig,
        mut state_machine: impl FnMut(Address) -> S,
    ) -> Result<Self, Report<SimulationError>> {
        config.validate()?;
        let exchange = LocalExchange::new();

        let acceptors: Vec<Acceptor> = (0..config.acceptors)
            .map(|_| Acceptor::new(exchange.next_address(Role::Acceptor)))
            .collect();
        let acceptor_addresses: Vec<Address> = acceptors.iter().map(Process::address).collect();

        let leaders: Vec<Leader> = (0..config.leaders)
            .map(|_| Leader::new(exchange.next_address(Role::Leader), acceptor_addresses.clone()))
            .collect();
        let leader_addresses: Vec<Address> = leaders.iter().map(Process::address).collect();

        let mut replica_handles = Vec::with_capacity(config.replicas);
        let replicas: Vec<Replica<S>> = (0..config.replicas)
            .map(|_| {
                let address = exchange.next_address(Role::Replica);
                let machine = state_machine(address);
                replica_handles.push((address, machine.clone()));
                Replica::new(address, leader_addresses.clone(), machine).with_window(config.window)
            })
            .collect();

        let pending = Pending {
            acceptors: register_all(&exchange, acceptors)?,
            leaders: register_all(&exchange, leaders)?,
            replicas: register_all(&exchange, replicas)?,
        };
        debug!(
            acceptors = config.acceptors,
            leaders = config.leaders,
            replicas = config.replicas,
            "registered"
        );

        Ok(Self {
            config,
            exchange,
            cancel: CancellationToken::new(),
            acceptors: acceptor_addresses,
            leaders: leader_addresses,
            replicas: replica_handles,
            pending: Some(pending),
            tasks: Vec::new(),
            clients: Vec::new(),
        })
    }

    /// Start every role and then the clients. Must be called from within a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// If the simulation was already started.
    #[instrument(skip_all)]
    pub fn start(&mut self) -> Result<(), Report<SimulationError>> {
        let Some(pending) = self.pending.take() else {
            return Err(Report::new(SimulationError).attach("already started"));
        };

        for (acceptor, mailbox) in pending.acceptors {
            self.spawn(acceptor, mailbox);
        }
        for (leader, mailbox) in pending.leaders {
            self.spawn(leader, mailbox);
        }
        for (replica, mailbox) in pending.replicas {
            self.spawn(replica, mailbox);
        }

        for _ in 0..self.config.clients {
            let client = Client::new(
                self.exchange.next_address(Role::Client),
                self.exchange.clone(),
                self.config.client_interval,
            );
            self.clients.push(client.spawn(&self.cancel));
        }

        info!(
            processes = self.tasks.len(),
            clients = self.clients.len(),
            "simulation started"
        );
        Ok(())
    }

    fn spawn<P: Process>(&mut self, process: P, mailbox: Mailbox) {
        self.tasks.push(tokio::spawn(run_process(
            process,
            mailbox,
            self.exchange.clone(),
            self.cancel.clone(),
        )));
    }

    /// Stop request emission. Roles keep running so in-flight commands can
    /// still be decided.
    pub fn stop_clients(&self) {
        for client in &self.clients {
            client.stop();
        }
        info!("clients stopped");
    }

    /// Cancel every process and wait for the long-lived ones to exit.
    ///
    /// # Errors
    ///
    /// The first process that aborted before shutdown, or panicked.
    #[instrument(skip_all)]
    pub async fn shutdown(self) -> Result<(), Report<SimulationError>> {
        self.stop_clients();
        self.cancel.cancel();

        let mut result = Ok(());
        for client in self.clients {
            if let Err(report) = client.join().await {
                result = result.and(Err(report.change_context(SimulationError)));
            }
        }
        for task in self.tasks {
            let outcome = task
                .await
                .change_context(ProcessError)
                .and_then(|exit| exit)
                .change_context(SimulationError);
            result = result.and(outcome);
        }

        info!("simulation shut down");
        result
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The shared exchange, e.g. for injecting requests.
    #[must_use]
    pub fn exchange(&self) -> &LocalExchange {
        &self.exchange
    }

    #[must_use]
    pub fn acceptors(&self) -> &[Address] {
        &self.acceptors
    }

    #[must_use]
    pub fn leaders(&self) -> &[Address] {
        &self.leaders
    }

    /// Each replica's address with the caller's handle on its state machine.
    #[must_use]
    pub fn state_machines(&self) -> &[(Address, S)] {
        &self.replicas
    }
}

fn register_all<P: Process>(
    exchange: &LocalExchange,
    processes: Vec<P>,
) -> Result<Vec<(P, Mailbox)>, Report<SimulationError>> {
    processes
        .into_iter()
        .map(|process| {
            let (inbox, mailbox) = mailbox(process.address());
            exchange
                .register(inbox)
                .change_context(SimulationError)?;
            Ok((process, mailbox))
        })
        .collect()
}
