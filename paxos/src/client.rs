//! Synthetic workload: a client that keeps sending requests to every replica.

use std::time::Duration;

use error_stack::{Report, ResultExt};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::ProcessError;
use crate::exchange::MessageExchange;
use crate::messages::{Body, Message};
use crate::types::{Address, Command, Role};

/// Operation carried by every generated command.
pub const CLIENT_OP: &str = "OP";

/// Emits one fresh command per tick to all replicas.
///
/// The client never receives messages, so it is not registered with the
/// exchange; its address only names it as a sender.
pub struct Client<E> {
    address: Address,
    exchange: E,
    interval: Duration,
    sent: u64,
}

impl<E: MessageExchange> Client<E> {
    #[must_use]
    pub fn new(address: Address, exchange: E, interval: Duration) -> Self {
        Self {
            address,
            exchange,
            interval,
            sent: 0,
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Command ids count up from "1"; the client id is the client's address.
    fn next_command(&mut self) -> Command {
        self.sent += 1;
        Command::basic(self.address.to_string(), self.sent.to_string(), CLIENT_OP)
    }

    /// Start emitting on a new task. `shutdown` stops the client as well as
    /// [`ClientHandle::stop`].
    #[must_use]
    pub fn spawn(self, shutdown: &CancellationToken) -> ClientHandle {
        let stop = shutdown.child_token();
        let address = self.address;
        let task = tokio::spawn(self.run(stop.clone()));
        ClientHandle {
            address,
            stop,
            task,
        }
    }

    #[instrument(skip_all, name = "client", fields(address = %self.address))]
    async fn run(mut self, stop: CancellationToken) -> u64 {
        // the first request goes out one interval after start
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let command = self.next_command();
            debug!(%command, "sending request");
            let message = Message::new(self.address, Body::Request(command));
            if let Err(report) = self.exchange.send_all(Role::Replica, message) {
                warn!(?report, "request not delivered");
            }
        }

        debug!(sent = self.sent, "stopped");
        self.sent
    }
}

/// Control handle for a running [`Client`].
#[derive(Debug)]
pub struct ClientHandle {
    address: Address,
    stop: CancellationToken,
    task: JoinHandle<u64>,
}

impl ClientHandle {
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// End the emission loop. Idempotent; returns without waiting.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the client to stop and return how many commands it sent.
    ///
    /// # Errors
    ///
    /// If the client task panicked or was aborted.
    pub async fn join(self) -> Result<u64, Report<ProcessError>> {
        self.task
            .await
            .change_context(ProcessError)
            .attach(format!("address: {}", self.address))
    }
}
