//! Process registry and message router.
//!
//! The exchange is the only state shared between processes. One is built per
//! simulation run and handed to every role by handle.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use error_stack::Report;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::ExchangeError;
use crate::messages::Message;
use crate::types::{Address, Role};

// =============================================================================
// MAILBOX
// =============================================================================

/// Sending half of a process mailbox. Cheap to clone, never blocks.
#[derive(Clone, Debug)]
pub struct Inbox {
    address: Address,
    tx: mpsc::UnboundedSender<Message>,
}

impl Inbox {
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Enqueue a message.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Disconnected`] if the receiving process has gone away.
    pub fn send(&self, message: Message) -> Result<(), Report<ExchangeError>> {
        self.tx.send(message).map_err(|_| {
            Report::new(ExchangeError::Disconnected).attach(format!("address: {}", self.address))
        })
    }
}

/// Receiving half of a process mailbox, consumed only by the owning process.
#[derive(Debug)]
pub struct Mailbox {
    address: Address,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Wait for the next message. `None` once every [`Inbox`] is dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Mailbox {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Create an unbounded FIFO mailbox for `address`.
#[must_use]
pub fn mailbox(address: Address) -> (Inbox, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Inbox { address, tx }, Mailbox { address, rx })
}

// =============================================================================
// EXCHANGE
// =============================================================================

/// Addressed message routing between processes.
///
/// Every call is atomic with respect to the registry: a registration is
/// either fully visible to later sends or not at all.
pub trait MessageExchange: Clone + Send + Sync + 'static {
    /// Allocate a fresh, never-before-used address for a process of `role`.
    fn next_address(&self, role: Role) -> Address;

    /// # Errors
    ///
    /// [`ExchangeError::DuplicateAddress`] if the address is taken.
    fn register(&self, inbox: Inbox) -> Result<(), Report<ExchangeError>>;

    /// # Errors
    ///
    /// [`ExchangeError::NotFound`] if the address was never registered.
    fn unregister(&self, address: Address) -> Result<(), Report<ExchangeError>>;

    /// # Errors
    ///
    /// [`ExchangeError::NotFound`] if `dest` is not registered.
    fn send(&self, dest: Address, message: Message) -> Result<(), Report<ExchangeError>>;

    /// Deliver a copy of `message` to every process of `role`, in registration
    /// order. A failure partway through is reported; earlier deliveries stand.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::NotFound`] if no process of `role` is registered.
    fn send_all(&self, role: Role, message: Message) -> Result<(), Report<ExchangeError>>;
}

#[derive(Default)]
struct Registry {
    by_address: HashMap<Address, Inbox>,
    by_role: HashMap<Role, Vec<Inbox>>,
    next_id: HashMap<Role, u64>,
}

/// In-process [`MessageExchange`] behind a single mutex.
///
/// Sends clone the target inboxes out of the lock before enqueueing.
#[derive(Clone, Default)]
pub struct LocalExchange {
    registry: Arc<Mutex<Registry>>,
}

impl LocalExchange {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered addresses of `role`, in registration order.
    #[must_use]
    pub fn addresses(&self, role: Role) -> Vec<Address> {
        self.registry()
            .by_role
            .get(&role)
            .map(|inboxes| inboxes.iter().map(Inbox::address).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_registered(&self, address: Address) -> bool {
        self.registry().by_address.contains_key(&address)
    }
}

impl MessageExchange for LocalExchange {
    fn next_address(&self, role: Role) -> Address {
        let mut registry = self.registry();
        let next = registry.next_id.entry(role).or_insert(0);
        let id = *next;
        *next += 1;
        Address::new(id, role)
    }

    fn register(&self, inbox: Inbox) -> Result<(), Report<ExchangeError>> {
        let address = inbox.address();
        let mut registry = self.registry();
        if registry.by_address.contains_key(&address) {
            return Err(Report::new(ExchangeError::DuplicateAddress)
                .attach(format!("address: {address}")));
        }

        // keep the allocator ahead of explicitly chosen ids
        let next = registry.next_id.entry(address.role).or_insert(0);
        *next = (*next).max(address.id + 1);

        registry
            .by_role
            .entry(address.role)
            .or_default()
            .push(inbox.clone());
        registry.by_address.insert(address, inbox);
        trace!(%address, "registered");
        Ok(())
    }

    fn unregister(&self, address: Address) -> Result<(), Report<ExchangeError>> {
        let mut registry = self.registry();
        if registry.by_address.remove(&address).is_none() {
            return Err(Report::new(ExchangeError::NotFound).attach(format!("address: {address}")));
        }
        if let Some(inboxes) = registry.by_role.get_mut(&address.role) {
            inboxes.retain(|inbox| inbox.address() != address);
        }
        trace!(%address, "unregistered");
        Ok(())
    }

    fn send(&self, dest: Address, message: Message) -> Result<(), Report<ExchangeError>> {
        let inbox = self.registry().by_address.get(&dest).cloned();
        let Some(inbox) = inbox else {
            return Err(Report::new(ExchangeError::NotFound)
                .attach(format!("address: {dest}"))
                .attach(format!("message: {message}")));
        };
        trace!(%dest, %message, "send");
        inbox.send(message)
    }

    fn send_all(&self, role: Role, message: Message) -> Result<(), Report<ExchangeError>> {
        let inboxes = self.registry().by_role.get(&role).cloned().unwrap_or_default();
        if inboxes.is_empty() {
            return Err(Report::new(ExchangeError::NotFound)
                .attach(format!("role: {role}"))
                .attach(format!("message: {message}")));
        }
        for inbox in inboxes {
            trace!(dest = %inbox.address(), %message, "send");
            inbox.send(message.clone())?;
        }
        Ok(())
    }
}
