//! Error types. Use `error_stack::Report<_>` with attachments for details.

use std::fmt;

/// Routing failure reported by a [`MessageExchange`](crate::MessageExchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    /// The address is already registered.
    DuplicateAddress,
    /// No process with that address (or of that role) is registered.
    NotFound,
    /// The process is registered but its mailbox has been dropped.
    Disconnected,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::DuplicateAddress => f.write_str("duplicate address"),
            ExchangeError::NotFound => f.write_str("process not found"),
            ExchangeError::Disconnected => f.write_str("mailbox disconnected"),
        }
    }
}

impl std::error::Error for ExchangeError {}

/// A role received a message it has no business receiving, or one of its
/// invariants was broken upstream. Never recovered from.
#[derive(Debug)]
pub struct ProtocolViolation;

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("protocol violation")
    }
}

impl std::error::Error for ProtocolViolation {}

/// A process aborted.
#[derive(Debug)]
pub struct ProcessError;

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("process aborted")
    }
}

impl std::error::Error for ProcessError {}

/// Simulation wiring failed.
#[derive(Debug)]
pub struct SimulationError;

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("simulation setup failed")
    }
}

impl std::error::Error for SimulationError {}
