//! Scout: runs phase 1 for one leader ballot, then exits.

use error_stack::Report;
use tracing::{debug, trace};

use crate::error::ProtocolViolation;
use crate::messages::{Body, Message};
use crate::process::{Delivery, Outbox, Process, Step};
use crate::quorum::Quorum;
use crate::types::{Address, BallotNumber, PValues};

#[derive(Debug)]
pub struct Scout {
    address: Address,
    leader: Address,
    acceptors: Vec<Address>,
    ballot: BallotNumber,
    quorum: Quorum,
    /// Union of every accepted set reported by a matching reply.
    pvalues: PValues,
}

impl Scout {
    #[must_use]
    pub fn new(
        address: Address,
        leader: Address,
        acceptors: Vec<Address>,
        ballot: BallotNumber,
    ) -> Self {
        Self {
            address,
            leader,
            quorum: Quorum::new(&acceptors),
            acceptors,
            ballot,
            pvalues: PValues::new(),
        }
    }

    #[must_use]
    pub fn ballot(&self) -> BallotNumber {
        self.ballot
    }
}

impl Process for Scout {
    fn address(&self) -> Address {
        self.address
    }

    fn start(&mut self, out: &mut Outbox) {
        for &acceptor in &self.acceptors {
            out.send(
                acceptor,
                Body::Phase1Request {
                    ballot: self.ballot,
                },
                Delivery::Required,
            );
        }
    }

    fn handle(
        &mut self,
        message: Message,
        out: &mut Outbox,
    ) -> Result<Step, Report<ProtocolViolation>> {
        let Message { src, body } = message;
        let Body::Phase1Response { ballot, accepted } = body else {
            return Err(body.unexpected_at(self.address));
        };

        if ballot != self.ballot || !self.quorum.is_waiting_on(src) {
            debug!(%src, %ballot, ours = %self.ballot, "preempted");
            out.send(self.leader, Body::Preempt { ballot }, Delivery::Required);
            return Ok(Step::Done);
        }

        self.pvalues.extend(accepted);
        if !self.quorum.record(src) {
            return Ok(Step::Continue);
        }

        debug!(ballot = %self.ballot, pvalues = self.pvalues.len(), "adopted");
        out.send(
            self.leader,
            Body::Adopted {
                ballot: self.ballot,
                accepted: std::mem::take(&mut self.pvalues),
            },
            Delivery::Required,
        );
        trace!(stragglers = self.quorum.remaining(), "not waiting");
        Ok(Step::Done)
    }
}
