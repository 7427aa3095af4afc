//! Core type definitions for the simulation.
//!
//! These are plain values: every message payload carries copies of them, so
//! no two processes ever alias the same ballot, command or pvalue.

use std::collections::BTreeSet;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// =============================================================================
// ADDRESSES
// =============================================================================

/// The kind of process living behind an [`Address`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    Acceptor,
    Commander,
    Leader,
    Replica,
    Scout,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Acceptor => "Acceptor",
            Role::Commander => "Commander",
            Role::Leader => "Leader",
            Role::Replica => "Replica",
            Role::Scout => "Scout",
            Role::Client => "Client",
        })
    }
}

/// Identifies one process for its whole lifetime.
///
/// Used both as the routing key in the exchange and as the tie-breaking
/// component of a [`BallotNumber`]. Ordering is by `(id, role)`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Address {
    pub id: u64,
    pub role: Role,
}

impl Address {
    #[must_use]
    pub const fn new(id: u64, role: Role) -> Self {
        Self { id, role }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}-{})", self.role, self.id)
    }
}

// =============================================================================
// BALLOT NUMBER
// =============================================================================

/// Totally ordered `(round, leader)` pair.
///
/// Compares by round first, then by leader address. A ballot `b2` preempts
/// `b1` iff `b2 > b1`. A leader never mutates its ballot in place; it builds
/// the successor with [`BallotNumber::next_round`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BallotNumber {
    pub round: u64,
    pub leader: Address,
}

impl BallotNumber {
    #[must_use]
    pub const fn new(round: u64, leader: Address) -> Self {
        Self { round, leader }
    }

    /// Same leader, one round higher.
    #[must_use]
    pub const fn next_round(self) -> Self {
        Self {
            round: self.round + 1,
            leader: self.leader,
        }
    }
}

impl fmt::Display for BallotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.round, self.leader)
    }
}

// =============================================================================
// SLOT
// =============================================================================

/// Position in the replicated command log. Always `>= Slot::INITIAL`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Slot(pub u64);

impl Slot {
    /// The first slot of every log.
    pub const INITIAL: Self = Self(1);

    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The slot `n` positions later.
    #[must_use]
    pub const fn ahead(self, n: u64) -> Self {
        Self(self.0 + n)
    }

    /// The slot `n` positions earlier, if that is still a valid slot.
    #[must_use]
    pub fn behind(self, n: u64) -> Option<Self> {
        self.0
            .checked_sub(n)
            .map(Self)
            .filter(|slot| *slot >= Self::INITIAL)
    }

    /// Number of slots between `earlier` and `self`.
    #[must_use]
    pub const fn distance_from(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot({})", self.0)
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// A client command. Equality is structural over every field.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicCommand {
    pub client_id: String,
    pub command_id: String,
    pub op: String,
}

/// A command that replaces the replicas' leader configuration.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReconfigCommand {
    pub command: BasicCommand,
    pub leaders: Vec<Address>,
}

/// Anything a replica can be asked to order.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Command {
    Basic(BasicCommand),
    Reconfig(ReconfigCommand),
}

impl Command {
    pub fn basic(
        client_id: impl Into<String>,
        command_id: impl Into<String>,
        op: impl Into<String>,
    ) -> Self {
        Self::Basic(BasicCommand {
            client_id: client_id.into(),
            command_id: command_id.into(),
            op: op.into(),
        })
    }

    pub fn reconfig(
        client_id: impl Into<String>,
        command_id: impl Into<String>,
        leaders: Vec<Address>,
    ) -> Self {
        Self::Reconfig(ReconfigCommand {
            command: BasicCommand {
                client_id: client_id.into(),
                command_id: command_id.into(),
                op: "RECONFIG".to_owned(),
            },
            leaders,
        })
    }

    fn inner(&self) -> &BasicCommand {
        match self {
            Self::Basic(command) | Self::Reconfig(ReconfigCommand { command, .. }) => command,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.inner().client_id
    }

    #[must_use]
    pub fn command_id(&self) -> &str {
        &self.inner().command_id
    }

    #[must_use]
    pub fn op(&self) -> &str {
        &self.inner().op
    }

    /// The new leader set, if this is a reconfiguration.
    #[must_use]
    pub fn new_leaders(&self) -> Option<&[Address]> {
        match self {
            Self::Basic(_) => None,
            Self::Reconfig(reconfig) => Some(&reconfig.leaders),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let BasicCommand {
            client_id,
            command_id,
            op,
        } = self.inner();
        write!(f, "({client_id}, {command_id}, {op})")?;
        if let Some(leaders) = self.new_leaders() {
            write!(f, " -> {} leaders", leaders.len())?;
        }
        Ok(())
    }
}

// =============================================================================
// PVALUES
// =============================================================================

/// "Ballot `ballot` proposed `command` for `slot`."
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PValue {
    pub ballot: BallotNumber,
    pub slot: Slot,
    pub command: Command,
}

impl PValue {
    #[must_use]
    pub fn new(ballot: BallotNumber, slot: Slot, command: Command) -> Self {
        Self {
            ballot,
            slot,
            command,
        }
    }
}

impl fmt::Display for PValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}, {}>", self.ballot, self.slot, self.command)
    }
}

/// Set of pvalues; inserting an equal pvalue twice is a no-op.
pub type PValues = BTreeSet<PValue>;
