//! Protocol messages
//!
//! Every message on the exchange is a [`Message`]: the sender's address plus a
//! [`Body`]. Each role narrows `Body` into the closed set of inputs it accepts
//! (`AcceptorRequest`, `LeaderInput`, ...); anything outside that set comes
//! back as the original body and is a protocol violation for that role.

use std::fmt;

use error_stack::Report;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ProtocolViolation;
use crate::types::{Address, BallotNumber, Command, PValue, PValues, Slot};

/// An addressed message. Payloads are owned snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Message {
    pub src: Address,
    pub body: Body,
}

impl Message {
    #[must_use]
    pub fn new(src: Address, body: Body) -> Self {
        Self { src, body }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Body {
    /// Client to replica.
    Request(Command),
    /// Replica to leader.
    Propose { slot: Slot, command: Command },
    /// Commander to replica.
    Decision { slot: Slot, command: Command },
    /// Phase 1a: scout to acceptor.
    Phase1Request { ballot: BallotNumber },
    /// Phase 1b: acceptor to scout, carrying the acceptor's current ballot.
    Phase1Response {
        ballot: BallotNumber,
        accepted: PValues,
    },
    /// Phase 2a: commander to acceptor.
    Phase2Request { pvalue: PValue },
    /// Phase 2b: acceptor to commander, carrying the acceptor's current ballot.
    Phase2Response { ballot: BallotNumber },
    /// Scout to leader: a majority adopted `ballot`.
    Adopted {
        ballot: BallotNumber,
        accepted: PValues,
    },
    /// Scout or commander to leader: `ballot` outranks the one pursued.
    Preempt { ballot: BallotNumber },
}

impl Body {
    /// Short variant name, for logs and violation reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Request(_) => "Request",
            Body::Propose { .. } => "Propose",
            Body::Decision { .. } => "Decision",
            Body::Phase1Request { .. } => "Phase1Request",
            Body::Phase1Response { .. } => "Phase1Response",
            Body::Phase2Request { .. } => "Phase2Request",
            Body::Phase2Response { .. } => "Phase2Response",
            Body::Adopted { .. } => "Adopted",
            Body::Preempt { .. } => "Preempt",
        }
    }

    /// The report a role raises when handed a body outside its input set.
    #[must_use]
    pub fn unexpected_at(&self, receiver: Address) -> Report<ProtocolViolation> {
        Report::new(ProtocolViolation)
            .attach(format!("unexpected {} at {receiver}", self.kind()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.body.kind(), self.src)
    }
}

// =============================================================================
// PER-ROLE INPUTS
// =============================================================================

/// Inputs an acceptor handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptorRequest {
    Phase1(BallotNumber),
    Phase2(PValue),
}

impl TryFrom<Body> for AcceptorRequest {
    type Error = Body;

    fn try_from(body: Body) -> Result<Self, Body> {
        match body {
            Body::Phase1Request { ballot } => Ok(Self::Phase1(ballot)),
            Body::Phase2Request { pvalue } => Ok(Self::Phase2(pvalue)),
            other => Err(other),
        }
    }
}

/// Inputs a leader handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaderInput {
    Propose {
        slot: Slot,
        command: Command,
    },
    Adopted {
        ballot: BallotNumber,
        accepted: PValues,
    },
    Preempt(BallotNumber),
}

impl TryFrom<Body> for LeaderInput {
    type Error = Body;

    fn try_from(body: Body) -> Result<Self, Body> {
        match body {
            Body::Propose { slot, command } => Ok(Self::Propose { slot, command }),
            Body::Adopted { ballot, accepted } => Ok(Self::Adopted { ballot, accepted }),
            Body::Preempt { ballot } => Ok(Self::Preempt(ballot)),
            other => Err(other),
        }
    }
}

/// Inputs a replica handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicaInput {
    Request(Command),
    Decision { slot: Slot, command: Command },
}

impl TryFrom<Body> for ReplicaInput {
    type Error = Body;

    fn try_from(body: Body) -> Result<Self, Body> {
        match body {
            Body::Request(command) => Ok(Self::Request(command)),
            Body::Decision { slot, command } => Ok(Self::Decision { slot, command }),
            other => Err(other),
        }
    }
}
