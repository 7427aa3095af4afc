//! Leader: owns a ballot and the slot proposals made under it.
//!
//! A leader is passive until a scout gets its ballot adopted. From then on
//! every proposal it receives gets a commander straight away. A preemption
//! knocks it back to passive with the next round and a fresh scout.

use std::collections::BTreeMap;

use error_stack::Report;
use tracing::{debug, trace};

use crate::error::ProtocolViolation;
use crate::messages::{LeaderInput, Message};
use crate::process::{Outbox, Process, Spawn, Step};
use crate::types::{Address, BallotNumber, Command, PValue, PValues, Slot};

#[derive(Debug)]
pub struct Leader {
    address: Address,
    ballot: BallotNumber,
    active: bool,
    proposals: BTreeMap<Slot, Command>,
    acceptors: Vec<Address>,
}

impl Leader {
    #[must_use]
    pub fn new(address: Address, acceptors: Vec<Address>) -> Self {
        Self {
            address,
            ballot: BallotNumber::new(0, address),
            active: false,
            proposals: BTreeMap::new(),
            acceptors,
        }
    }

    #[must_use]
    pub fn ballot(&self) -> BallotNumber {
        self.ballot
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn proposals(&self) -> &BTreeMap<Slot, Command> {
        &self.proposals
    }

    fn spawn_scout(&self, out: &mut Outbox) {
        out.spawn(Spawn::Scout {
            leader: self.address,
            acceptors: self.acceptors.clone(),
            ballot: self.ballot,
        });
    }

    fn spawn_commander(&self, slot: Slot, command: Command, out: &mut Outbox) {
        out.spawn(Spawn::Commander {
            leader: self.address,
            acceptors: self.acceptors.clone(),
            pvalue: PValue::new(self.ballot, slot, command),
        });
    }

    fn on_propose(&mut self, slot: Slot, command: Command, out: &mut Outbox) {
        if self.proposals.contains_key(&slot) {
            trace!(%slot, "slot already proposed");
            return;
        }
        self.proposals.insert(slot, command.clone());
        if self.active {
            self.spawn_commander(slot, command, out);
        }
    }

    fn on_adopted(&mut self, ballot: BallotNumber, accepted: PValues, out: &mut Outbox) {
        if ballot != self.ballot {
            trace!(%ballot, ours = %self.ballot, "stale adoption");
            return;
        }

        // whatever a majority may already have chosen must win over our own proposals
        for (slot, command) in pmax(accepted) {
            self.proposals.insert(slot, command);
        }
        for (&slot, command) in &self.proposals {
            self.spawn_commander(slot, command.clone(), out);
        }
        self.active = true;
        debug!(%ballot, proposals = self.proposals.len(), "active");
    }

    fn on_preempt(&mut self, ballot: BallotNumber, out: &mut Outbox) {
        if ballot <= self.ballot {
            trace!(%ballot, ours = %self.ballot, "stale preemption");
            return;
        }
        self.active = false;
        self.ballot = self.ballot.next_round();
        debug!(by = %ballot, next = %self.ballot, "preempted");
        self.spawn_scout(out);
    }
}

/// For each slot, the command of the highest-ballot pvalue.
fn pmax(pvalues: PValues) -> BTreeMap<Slot, Command> {
    let mut best: BTreeMap<Slot, (BallotNumber, Command)> = BTreeMap::new();
    for PValue {
        ballot,
        slot,
        command,
    } in pvalues
    {
        match best.get(&slot) {
            Some((seen, _)) if *seen >= ballot => {}
            _ => {
                best.insert(slot, (ballot, command));
            }
        }
    }
    best.into_iter()
        .map(|(slot, (_, command))| (slot, command))
        .collect()
}

impl Process for Leader {
    fn address(&self) -> Address {
        self.address
    }

    fn start(&mut self, out: &mut Outbox) {
        self.spawn_scout(out);
    }

    fn handle(
        &mut self,
        message: Message,
        out: &mut Outbox,
    ) -> Result<Step, Report<ProtocolViolation>> {
        let input =
            LeaderInput::try_from(message.body).map_err(|body| body.unexpected_at(self.address))?;
        match input {
            LeaderInput::Propose { slot, command } => self.on_propose(slot, command, out),
            LeaderInput::Adopted { ballot, accepted } => self.on_adopted(ballot, accepted, out),
            LeaderInput::Preempt(ballot) => self.on_preempt(ballot, out),
        }
        Ok(Step::Continue)
    }
}
