//! Commander: runs phase 2 for one pvalue, then exits.

use error_stack::Report;
use tracing::{debug, trace};

use crate::error::ProtocolViolation;
use crate::messages::{Body, Message};
use crate::process::{Delivery, Outbox, Process, Step};
use crate::quorum::Quorum;
use crate::types::{Address, PValue, Role};

#[derive(Debug)]
pub struct Commander {
    address: Address,
    leader: Address,
    acceptors: Vec<Address>,
    pvalue: PValue,
    quorum: Quorum,
}

impl Commander {
    #[must_use]
    pub fn new(address: Address, leader: Address, acceptors: Vec<Address>, pvalue: PValue) -> Self {
        Self {
            address,
            leader,
            quorum: Quorum::new(&acceptors),
            acceptors,
            pvalue,
        }
    }

    #[must_use]
    pub fn pvalue(&self) -> &PValue {
        &self.pvalue
    }
}

impl Process for Commander {
    fn address(&self) -> Address {
        self.address
    }

    fn start(&mut self, out: &mut Outbox) {
        for &acceptor in &self.acceptors {
            out.send(
                acceptor,
                Body::Phase2Request {
                    pvalue: self.pvalue.clone(),
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
        let Body::Phase2Response { ballot } = body else {
            return Err(body.unexpected_at(self.address));
        };

        if ballot != self.pvalue.ballot || !self.quorum.is_waiting_on(src) {
            debug!(%src, %ballot, pvalue = %self.pvalue, "preempted");
            out.send(self.leader, Body::Preempt { ballot }, Delivery::Required);
            return Ok(Step::Done);
        }

        if !self.quorum.record(src) {
            return Ok(Step::Continue);
        }

        debug!(pvalue = %self.pvalue, "decided");
        out.send_all(
            Role::Replica,
            Body::Decision {
                slot: self.pvalue.slot,
                command: self.pvalue.command.clone(),
            },
            Delivery::Required,
        );
        trace!(stragglers = self.quorum.remaining(), "not waiting");
        Ok(Step::Done)
    }
}
