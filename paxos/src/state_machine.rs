//! The replicated application a replica applies decided commands to

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::types::{Command, Slot};

/// Applied once per distinct decided command, in slot order.
///
/// Reconfiguration commands never reach this trait.
pub trait StateMachine: Send + 'static {
    fn execute(&mut self, slot: Slot, command: &Command);
}

/// Logs every command and keeps no state.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStateMachine;

impl StateMachine for NoopStateMachine {
    fn execute(&mut self, slot: Slot, command: &Command) {
        info!(%slot, %command, "executed");
    }
}

/// Records the executed sequence behind a shared handle, so a caller can
/// keep a clone and inspect it while the replica owns the other.
#[derive(Clone, Debug, Default)]
pub struct RecordingStateMachine {
    log: Arc<Mutex<Vec<(Slot, Command)>>>,
}

impl RecordingStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything executed so far.
    #[must_use]
    pub fn entries(&self) -> Vec<(Slot, Command)> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Executed commands without their slots.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.entries()
            .into_iter()
            .map(|(_, command)| command)
            .collect()
    }
}

impl StateMachine for RecordingStateMachine {
    fn execute(&mut self, slot: Slot, command: &Command) {
        info!(%slot, %command, "executed");
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((slot, command.clone()));
    }
}
