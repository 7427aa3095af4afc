//! Simulation configuration

use std::time::Duration;

use error_stack::Report;

use crate::error::SimulationError;
use crate::replica::DEFAULT_WINDOW;

/// Default delay between two requests from the same client.
pub const DEFAULT_CLIENT_INTERVAL: Duration = Duration::from_secs(1);

/// How many processes of each role to run, and how clients and replicas pace
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub acceptors: usize,
    pub leaders: usize,
    pub replicas: usize,
    pub clients: usize,
    /// Delay between two requests from one client
    pub client_interval: Duration,
    /// Slots a replica may have proposed but not yet seen decided
    pub window: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::with_failures(1)
    }
}

impl SimConfig {
    /// Sized to tolerate `failures` crashed processes of each role:
    /// `f + 1` replicas and leaders, `2f + 1` acceptors.
    #[must_use]
    pub fn with_failures(failures: usize) -> Self {
        Self {
            acceptors: 2 * failures + 1,
            leaders: failures + 1,
            replicas: failures + 1,
            clients: 2,
            client_interval: DEFAULT_CLIENT_INTERVAL,
            window: DEFAULT_WINDOW,
        }
    }

    #[must_use]
    pub fn clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    #[must_use]
    pub fn client_interval(mut self, interval: Duration) -> Self {
        self.client_interval = interval;
        self
    }

    #[must_use]
    pub fn window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    /// Crashed acceptors the configuration survives while still reaching a
    /// majority.
    #[must_use]
    pub fn tolerated_acceptor_failures(&self) -> usize {
        self.acceptors.saturating_sub(1) / 2
    }

    /// # Errors
    ///
    /// If any long-lived role has no processes, or the window is zero.
    pub fn validate(&self) -> Result<(), Report<SimulationError>> {
        for (role, count) in [
            ("acceptors", self.acceptors),
            ("leaders", self.leaders),
            ("replicas", self.replicas),
        ] {
            if count == 0 {
                return Err(Report::new(SimulationError).attach(format!("no {role} configured")));
            }
        }
        if self.window == 0 {
            return Err(Report::new(SimulationError).attach("window must be at least one slot"));
        }
        if self.client_interval.is_zero() && self.clients > 0 {
            return Err(Report::new(SimulationError).attach("client interval must be non-zero"));
        }
        Ok(())
    }
}
