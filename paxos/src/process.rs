//! Process runtime: one tokio task per role instance.
//!
//! Roles are written as synchronous message handlers that push their effects
//! onto an [`Outbox`]. [`run_process`] owns the mailbox loop and carries the
//! effects out through the exchange, so role logic never touches I/O and can
//! be driven directly in tests.

use error_stack::{Report, ResultExt};
use futures::StreamExt;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use crate::commander::Commander;
use crate::error::{ExchangeError, ProcessError, ProtocolViolation};
use crate::exchange::{Mailbox, MessageExchange, mailbox};
use crate::messages::{Body, Message};
use crate::scout::Scout;
use crate::types::{Address, BallotNumber, PValue, Role};

/// What a routing failure means to the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The destination must exist; failing to reach it aborts the sender.
    Required,
    /// Log the failure and carry on.
    BestEffort,
}

/// A transient agent a leader wants started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Spawn {
    Scout {
        leader: Address,
        acceptors: Vec<Address>,
        ballot: BallotNumber,
    },
    Commander {
        leader: Address,
        acceptors: Vec<Address>,
        pvalue: PValue,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Send {
        dest: Address,
        message: Message,
        delivery: Delivery,
    },
    SendAll {
        role: Role,
        message: Message,
        delivery: Delivery,
    },
    Spawn(Spawn),
}

/// Effects produced while handling one message, in order.
#[derive(Debug)]
pub struct Outbox {
    src: Address,
    effects: Vec<Effect>,
}

impl Outbox {
    #[must_use]
    pub fn new(src: Address) -> Self {
        Self {
            src,
            effects: Vec::new(),
        }
    }

    /// Address stamped as `src` on every outgoing message.
    #[must_use]
    pub fn src(&self) -> Address {
        self.src
    }

    pub fn send(&mut self, dest: Address, body: Body, delivery: Delivery) {
        self.effects.push(Effect::Send {
            dest,
            message: Message::new(self.src, body),
            delivery,
        });
    }

    pub fn send_all(&mut self, role: Role, body: Body, delivery: Delivery) {
        self.effects.push(Effect::SendAll {
            role,
            message: Message::new(self.src, body),
            delivery,
        });
    }

    pub fn spawn(&mut self, spawn: Spawn) {
        self.effects.push(Effect::Spawn(spawn));
    }

    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn take(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}

/// Whether a process keeps running after a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Terminal transition; the process is unregistered and its task ends.
    Done,
}

/// A role instance with a single sequential message loop.
pub trait Process: Send + 'static {
    fn address(&self) -> Address;

    /// Called once before the first message is received.
    fn start(&mut self, _out: &mut Outbox) {}

    /// Handle one message atomically with respect to the process's own state.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] if the message is not valid for this role.
    fn handle(
        &mut self,
        message: Message,
        out: &mut Outbox,
    ) -> Result<Step, Report<ProtocolViolation>>;
}

enum Exit {
    Done,
    Cancelled,
    Closed,
}

/// Register `process` with the exchange and start it on a new task.
///
/// Registration completes before the task starts, so replies to anything the
/// process sends from [`Process::start`] always find it.
///
/// # Errors
///
/// Fails if the process's address is already registered.
pub fn spawn_process<P, E>(
    process: P,
    exchange: &E,
    cancel: &CancellationToken,
) -> Result<JoinHandle<Result<(), Report<ProcessError>>>, Report<ExchangeError>>
where
    P: Process,
    E: MessageExchange,
{
    let (inbox, mailbox) = mailbox(process.address());
    exchange.register(inbox)?;
    Ok(tokio::spawn(run_process(
        process,
        mailbox,
        exchange.clone(),
        cancel.clone(),
    )))
}

/// Drive `process` until it terminates, is cancelled, or aborts.
///
/// # Errors
///
/// Returns the protocol violation or required-delivery failure that aborted
/// the process. The process is unregistered in that case.
#[instrument(skip_all, name = "process", fields(address = %process.address()))]
pub async fn run_process<P, E>(
    mut process: P,
    mut mailbox: Mailbox,
    exchange: E,
    cancel: CancellationToken,
) -> Result<(), Report<ProcessError>>
where
    P: Process,
    E: MessageExchange,
{
    let address = process.address();
    match drive(&mut process, &mut mailbox, &exchange, &cancel).await {
        Ok(Exit::Done) => {
            debug!("terminated");
            exchange
                .unregister(address)
                .change_context(ProcessError)
                .attach(format!("address: {address}"))
        }
        Ok(Exit::Cancelled) => {
            debug!("cancelled");
            let _ = exchange.unregister(address);
            Ok(())
        }
        Ok(Exit::Closed) => {
            debug!("mailbox closed");
            Ok(())
        }
        // peers going away mid-shutdown is not a failure
        Err(report) if cancel.is_cancelled() => {
            debug!(?report, "aborted during shutdown");
            let _ = exchange.unregister(address);
            Ok(())
        }
        Err(report) => {
            error!(?report, "process aborted");
            let _ = exchange.unregister(address);
            Err(report.attach(format!("address: {address}")))
        }
    }
}

async fn drive<P, E>(
    process: &mut P,
    mailbox: &mut Mailbox,
    exchange: &E,
    cancel: &CancellationToken,
) -> Result<Exit, Report<ProcessError>>
where
    P: Process,
    E: MessageExchange,
{
    let mut out = Outbox::new(process.address());
    process.start(&mut out);
    flush(&mut out, exchange, cancel)?;

    loop {
        let message = select! {
            biased;
            () = cancel.cancelled() => return Ok(Exit::Cancelled),
            message = mailbox.next() => message,
        };
        let Some(message) = message else {
            return Ok(Exit::Closed);
        };

        trace!(%message, "received");
        let step = process
            .handle(message, &mut out)
            .change_context(ProcessError)?;
        flush(&mut out, exchange, cancel)?;

        if step == Step::Done {
            return Ok(Exit::Done);
        }
    }
}

fn flush<E: MessageExchange>(
    out: &mut Outbox,
    exchange: &E,
    cancel: &CancellationToken,
) -> Result<(), Report<ProcessError>> {
    for effect in out.take() {
        match effect {
            Effect::Send {
                dest,
                message,
                delivery,
            } => deliver(exchange.send(dest, message), delivery)?,
            Effect::SendAll {
                role,
                message,
                delivery,
            } => deliver(exchange.send_all(role, message), delivery)?,
            Effect::Spawn(spawn) => start_agent(spawn, exchange, cancel)?,
        }
    }
    Ok(())
}

fn deliver(
    result: Result<(), Report<ExchangeError>>,
    delivery: Delivery,
) -> Result<(), Report<ProcessError>> {
    let Err(report) = result else {
        return Ok(());
    };
    let context = *report.current_context();
    match (delivery, context) {
        (Delivery::Required, _) => Err(report.change_context(ProcessError)),
        // replies to a scout or commander that already finished
        (Delivery::BestEffort, ExchangeError::NotFound) => {
            debug!(?report, "dropping message for unregistered process");
            Ok(())
        }
        (Delivery::BestEffort, _) => {
            warn!(?report, "best-effort delivery failed");
            Ok(())
        }
    }
}

fn start_agent<E: MessageExchange>(
    spawn: Spawn,
    exchange: &E,
    cancel: &CancellationToken,
) -> Result<(), Report<ProcessError>> {
    let handle = match spawn {
        Spawn::Scout {
            leader,
            acceptors,
            ballot,
        } => {
            let scout = Scout::new(exchange.next_address(Role::Scout), leader, acceptors, ballot);
            debug!(scout = %scout.address(), %ballot, "spawning scout");
            spawn_process(scout, exchange, cancel)
        }
        Spawn::Commander {
            leader,
            acceptors,
            pvalue,
        } => {
            let commander = Commander::new(
                exchange.next_address(Role::Commander),
                leader,
                acceptors,
                pvalue,
            );
            debug!(commander = %commander.address(), pvalue = %commander.pvalue(), "spawning commander");
            spawn_process(commander, exchange, cancel)
        }
    };
    // agents report their own failures; nobody joins them
    drop(handle.change_context(ProcessError)?);
    Ok(())
}
