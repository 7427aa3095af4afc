//! Acceptor: the long-lived voter.
//!
//! Holds the highest ballot it has promised and every pvalue it accepted
//! under it. Both are only ever read by other processes through the replies
//! this module sends.

use error_stack::Report;
use tracing::{debug, trace};

use crate::error::ProtocolViolation;
use crate::messages::{AcceptorRequest, Body, Message};
use crate::process::{Delivery, Outbox, Process, Step};
use crate::types::{Address, BallotNumber, PValue, PValues};

/// Outcome of a phase 1 request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromiseOutcome {
    Promised,
    Outdated,
}

/// Outcome of a phase 2 request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptOutcome {
    Accepted,
    Outdated,
}

#[derive(Debug)]
pub struct Acceptor {
    address: Address,
    /// `None` until the first phase 1 request; lower than every real ballot.
    ballot: Option<BallotNumber>,
    accepted: PValues,
}

impl Acceptor {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ballot: None,
            accepted: PValues::new(),
        }
    }

    #[must_use]
    pub fn ballot(&self) -> Option<BallotNumber> {
        self.ballot
    }

    #[must_use]
    pub fn accepted(&self) -> &PValues {
        &self.accepted
    }

    pub(crate) fn promise(&mut self, ballot: BallotNumber) -> (PromiseOutcome, BallotNumber) {
        match self.ballot {
            Some(current) if current >= ballot => (PromiseOutcome::Outdated, current),
            _ => {
                self.ballot = Some(ballot);
                (PromiseOutcome::Promised, ballot)
            }
        }
    }

    pub(crate) fn accept(
        &mut self,
        pvalue: PValue,
    ) -> Result<(AcceptOutcome, BallotNumber), Report<ProtocolViolation>> {
        let Some(current) = self.ballot else {
            return Err(Report::new(ProtocolViolation)
                .attach(format!("phase 2 request at {} before any ballot", self.address))
                .attach(format!("pvalue: {pvalue}")));
        };

        if pvalue.ballot == current {
            self.accepted.insert(pvalue);
            Ok((AcceptOutcome::Accepted, current))
        } else {
            Ok((AcceptOutcome::Outdated, current))
        }
    }
}

impl Process for Acceptor {
    fn address(&self) -> Address {
        self.address
    }

    fn handle(
        &mut self,
        message: Message,
        out: &mut Outbox,
    ) -> Result<Step, Report<ProtocolViolation>> {
        let Message { src, body } = message;
        let request =
            AcceptorRequest::try_from(body).map_err(|body| body.unexpected_at(self.address))?;

        let reply = match request {
            AcceptorRequest::Phase1(requested) => {
                let (outcome, ballot) = self.promise(requested);
                match outcome {
                    PromiseOutcome::Promised => debug!(%ballot, %src, "adopted ballot"),
                    PromiseOutcome::Outdated => {
                        trace!(%requested, current = %ballot, %src, "promise rejected - outdated");
                    }
                }
                Body::Phase1Response {
                    ballot,
                    accepted: self.accepted.clone(),
                }
            }
            AcceptorRequest::Phase2(pvalue) => {
                let slot = pvalue.slot;
                let requested = pvalue.ballot;
                let (outcome, ballot) = self.accept(pvalue)?;
                match outcome {
                    AcceptOutcome::Accepted => trace!(%slot, %ballot, %src, "accepted"),
                    AcceptOutcome::Outdated => {
                        trace!(%slot, %requested, current = %ballot, %src, "accept rejected - outdated");
                    }
                }
                Body::Phase2Response { ballot }
            }
        };

        // the asking scout or commander may already have its majority
        out.send(src, reply, Delivery::BestEffort);
        Ok(Step::Continue)
    }
}
