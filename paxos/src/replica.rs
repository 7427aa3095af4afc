//! Replica: the client-facing end of the log.
//!
//! Client requests are queued, then proposed to every leader in the current
//! configuration, at most `window` slots ahead of the first undecided slot.
//! Decisions are applied strictly in slot order. A request that loses its
//! slot to another command goes back on the queue and is proposed again.

use std::collections::{BTreeMap, VecDeque};

use error_stack::Report;
use tracing::{debug, trace};

use crate::error::ProtocolViolation;
use crate::messages::{Body, Message, ReplicaInput};
use crate::process::{Delivery, Outbox, Process, Step};
use crate::state_machine::StateMachine;
use crate::types::{Address, Command, Slot};

/// Default number of slots a replica may have proposed but not decided.
pub const DEFAULT_WINDOW: u64 = 5;

#[derive(Debug)]
pub struct Replica<S> {
    address: Address,
    slot_in: Slot,
    slot_out: Slot,
    requests: VecDeque<Command>,
    proposals: BTreeMap<Slot, Command>,
    decisions: BTreeMap<Slot, Command>,
    leaders: Vec<Address>,
    window: u64,
    state_machine: S,
}

impl<S: StateMachine> Replica<S> {
    #[must_use]
    pub fn new(address: Address, leaders: Vec<Address>, state_machine: S) -> Self {
        Self {
            address,
            slot_in: Slot::INITIAL,
            slot_out: Slot::INITIAL,
            requests: VecDeque::new(),
            proposals: BTreeMap::new(),
            decisions: BTreeMap::new(),
            leaders,
            window: DEFAULT_WINDOW,
            state_machine,
        }
    }

    /// # Panics
    ///
    /// If `window` is zero; such a replica could never propose.
    #[must_use]
    pub fn with_window(mut self, window: u64) -> Self {
        assert!(window > 0, "window must be at least one slot");
        self.window = window;
        self
    }

    /// Next slot this replica will propose into.
    #[must_use]
    pub fn slot_in(&self) -> Slot {
        self.slot_in
    }

    /// First slot not yet decided and applied.
    #[must_use]
    pub fn slot_out(&self) -> Slot {
        self.slot_out
    }

    #[must_use]
    pub fn requests(&self) -> &VecDeque<Command> {
        &self.requests
    }

    #[must_use]
    pub fn proposals(&self) -> &BTreeMap<Slot, Command> {
        &self.proposals
    }

    #[must_use]
    pub fn decisions(&self) -> &BTreeMap<Slot, Command> {
        &self.decisions
    }

    /// The leader configuration proposals currently go to.
    #[must_use]
    pub fn leaders(&self) -> &[Address] {
        &self.leaders
    }

    #[must_use]
    pub fn state_machine(&self) -> &S {
        &self.state_machine
    }

    fn on_decision(&mut self, slot: Slot, command: Command) {
        // duplicates from several commanders overwrite with the same value
        self.decisions.insert(slot, command);

        while let Some(decided) = self.decisions.get(&self.slot_out).cloned() {
            match self.proposals.remove(&self.slot_out) {
                Some(proposed) if proposed != decided => {
                    debug!(slot = %self.slot_out, %proposed, %decided, "lost slot, requeueing");
                    self.requests.push_back(proposed);
                }
                _ => {}
            }
            self.perform(&decided);
            self.slot_out = self.slot_out.next();
        }
    }

    /// Apply the command decided at `slot_out`, unless it already ran at an
    /// earlier slot.
    fn perform(&mut self, command: &Command) {
        let earlier = self
            .decisions
            .range(Slot::INITIAL..self.slot_out)
            .any(|(_, decided)| decided == command);
        if earlier {
            trace!(slot = %self.slot_out, %command, "already executed");
            return;
        }

        match command {
            // takes effect from `propose`, `window` slots later
            Command::Reconfig(_) => trace!(slot = %self.slot_out, %command, "reconfiguration"),
            Command::Basic(_) => self.state_machine.execute(self.slot_out, command),
        }
    }

    /// Adopt the leaders of a reconfiguration decided `window` slots before
    /// `slot_in`.
    fn reconfigure(&mut self) {
        let retiring = self.slot_in.behind(self.window);
        let reconfig = retiring
            .and_then(|slot| self.decisions.get(&slot))
            .and_then(Command::new_leaders);
        if let Some(leaders) = reconfig {
            debug!(slot = %self.slot_in, leaders = leaders.len(), "configuration updated");
            self.leaders = leaders.to_vec();
        }
    }

    fn propose(&mut self, out: &mut Outbox) {
        while self.slot_in < self.slot_out.ahead(self.window) {
            // decided without a proposal from here; nothing to propose into
            if self.decisions.contains_key(&self.slot_in) {
                self.reconfigure();
                self.slot_in = self.slot_in.next();
                continue;
            }
            let Some(command) = self.requests.pop_front() else {
                break;
            };
            self.reconfigure();

            for &leader in &self.leaders {
                out.send(
                    leader,
                    Body::Propose {
                        slot: self.slot_in,
                        command: command.clone(),
                    },
                    Delivery::BestEffort,
                );
            }
            self.proposals.insert(self.slot_in, command);
            self.slot_in = self.slot_in.next();
        }
    }
}

impl<S: StateMachine> Process for Replica<S> {
    fn address(&self) -> Address {
        self.address
    }

    fn handle(
        &mut self,
        message: Message,
        out: &mut Outbox,
    ) -> Result<Step, Report<ProtocolViolation>> {
        let input =
            ReplicaInput::try_from(message.body).map_err(|body| body.unexpected_at(self.address))?;
        match input {
            ReplicaInput::Request(command) => self.requests.push_back(command),
            ReplicaInput::Decision { slot, command } => self.on_decision(slot, command),
        }
        self.propose(out);
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Effect;
    use crate::state_machine::RecordingStateMachine;
    use crate::types::Role;

    fn leaders() -> Vec<Address> {
        (0..2).map(|id| Address::new(id, Role::Leader)).collect()
    }

    fn replica() -> (Replica<RecordingStateMachine>, RecordingStateMachine) {
        let log = RecordingStateMachine::new();
        let replica = Replica::new(Address::new(0, Role::Replica), leaders(), log.clone());
        (replica, log)
    }

    fn cmd(id: &str) -> Command {
        Command::basic("c", id, "OP")
    }

    fn client() -> Address {
        Address::new(0, Role::Client)
    }

    fn commander() -> Address {
        Address::new(0, Role::Commander)
    }

    fn deliver<S: StateMachine>(
        replica: &mut Replica<S>,
        src: Address,
        body: Body,
    ) -> Vec<Effect> {
        let mut out = Outbox::new(replica.address());
        let step = replica.handle(Message::new(src, body), &mut out).unwrap();
        assert_eq!(step, Step::Continue);
        assert!(replica.slot_out() <= replica.slot_in());
        assert!(replica.slot_in() <= replica.slot_out().ahead(replica.window));
        out.take()
    }

    fn decide<S: StateMachine>(
        replica: &mut Replica<S>,
        slot: u64,
        command: Command,
    ) -> Vec<Effect> {
        deliver(
            replica,
            commander(),
            Body::Decision {
                slot: Slot::new(slot),
                command,
            },
        )
    }

    fn proposals(effects: &[Effect]) -> Vec<(Address, Slot, Command)> {
        effects
            .iter()
            .map(|effect| match effect {
                Effect::Send {
                    dest,
                    message,
                    delivery: Delivery::BestEffort,
                } => match &message.body {
                    Body::Propose { slot, command } => (*dest, *slot, command.clone()),
                    other => panic!("expected Propose, got {other:?}"),
                },
                other => panic!("unexpected effect {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_request_is_proposed_to_every_leader() {
        let (mut replica, _) = replica();
        let effects = deliver(&mut replica, client(), Body::Request(cmd("1")));

        assert_eq!(replica.slot_in(), Slot::new(2));
        assert!(replica.requests().is_empty());
        assert_eq!(replica.proposals()[&Slot::INITIAL], cmd("1"));
        assert_eq!(
            proposals(&effects),
            leaders()
                .into_iter()
                .map(|leader| (leader, Slot::INITIAL, cmd("1")))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_lost_slot_requeues_own_command() {
        let (mut replica, log) = replica();
        for id in ["1", "2", "3", "4", "A"] {
            deliver(&mut replica, client(), Body::Request(cmd(id)));
        }
        for (slot, id) in (1..=4).zip(["1", "2", "3", "4"]) {
            decide(&mut replica, slot, cmd(id));
        }
        assert_eq!(replica.slot_out(), Slot::new(5));
        assert_eq!(replica.proposals()[&Slot::new(5)], cmd("A"));

        let effects = decide(&mut replica, 5, cmd("B"));

        assert_eq!(replica.decisions()[&Slot::new(5)], cmd("B"));
        assert_eq!(replica.slot_out(), Slot::new(6));
        // "A" went back on the queue and was proposed again at once
        assert_eq!(
            proposals(&effects),
            leaders()
                .into_iter()
                .map(|leader| (leader, Slot::new(6), cmd("A")))
                .collect::<Vec<_>>()
        );
        assert!(!replica.proposals().contains_key(&Slot::new(5)));
        assert_eq!(replica.proposals()[&Slot::new(6)], cmd("A"));
        assert_eq!(
            log.commands(),
            vec![cmd("1"), cmd("2"), cmd("3"), cmd("4"), cmd("B")]
        );
    }

    #[test]
    fn test_lost_slot_requeues_behind_waiting_requests() {
        let (replica, _) = replica();
        let mut replica = replica.with_window(1);
        deliver(&mut replica, client(), Body::Request(cmd("A")));
        deliver(&mut replica, client(), Body::Request(cmd("next")));
        assert_eq!(replica.requests(), &VecDeque::from([cmd("next")]));

        decide(&mut replica, 1, cmd("B"));
        // "next" is proposed into slot 2, "A" waits behind it
        assert_eq!(replica.proposals()[&Slot::new(2)], cmd("next"));
        assert_eq!(replica.requests(), &VecDeque::from([cmd("A")]));
    }

    #[test]
    fn test_window_bounds_outstanding_proposals() {
        let (mut replica, _) = replica();
        let mut sent = Vec::new();
        for id in 0..12 {
            let request = Body::Request(cmd(&id.to_string()));
            let effects = deliver(&mut replica, client(), request);
            sent.extend(proposals(&effects));
        }
        assert_eq!(replica.slot_in(), Slot::INITIAL.ahead(DEFAULT_WINDOW));
        assert_eq!(replica.requests().len(), 12 - 5);
        assert_eq!(sent.len(), 5 * leaders().len());

        // each decision frees exactly one slot
        let effects = decide(&mut replica, 1, cmd("0"));
        assert_eq!(
            proposals(&effects),
            leaders()
                .into_iter()
                .map(|leader| (leader, Slot::new(6), cmd("5")))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_out_of_order_decisions_execute_in_slot_order_once() {
        let (mut replica, log) = replica();
        decide(&mut replica, 3, cmd("c"));
        decide(&mut replica, 2, cmd("b"));
        assert!(log.entries().is_empty());
        assert_eq!(replica.slot_out(), Slot::INITIAL);

        // a duplicate decision for a pending slot changes nothing
        decide(&mut replica, 3, cmd("c"));
        decide(&mut replica, 1, cmd("a"));
        // the same command decided again at a later slot is skipped
        decide(&mut replica, 4, cmd("b"));
        decide(&mut replica, 5, cmd("d"));

        assert_eq!(replica.slot_out(), Slot::new(6));
        assert_eq!(
            log.entries(),
            vec![
                (Slot::new(1), cmd("a")),
                (Slot::new(2), cmd("b")),
                (Slot::new(3), cmd("c")),
                (Slot::new(5), cmd("d")),
            ]
        );
    }

    #[test]
    fn test_decided_slots_are_never_proposed_into() {
        let (mut replica, log) = replica();
        decide(&mut replica, 1, cmd("x"));
        assert_eq!(replica.slot_in(), Slot::new(2));
        decide(&mut replica, 2, cmd("y"));
        assert_eq!(replica.slot_out(), Slot::new(3));
        assert_eq!(replica.slot_in(), Slot::new(3));

        let effects = deliver(&mut replica, client(), Body::Request(cmd("c1")));
        assert_eq!(
            proposals(&effects),
            leaders()
                .into_iter()
                .map(|leader| (leader, Slot::new(3), cmd("c1")))
                .collect::<Vec<_>>()
        );
        assert_eq!(replica.slot_in(), Slot::new(4));
        assert_eq!(replica.proposals().keys().copied().collect::<Vec<_>>(), vec![Slot::new(3)]);

        // the request still reaches the log once its slot is decided
        decide(&mut replica, 3, cmd("c1"));
        assert!(replica.proposals().is_empty());
        assert_eq!(log.commands(), vec![cmd("x"), cmd("y"), cmd("c1")]);
    }

    #[test]
    fn test_decisions_ahead_of_proposals_are_skipped() {
        let (mut replica, _) = replica();
        deliver(&mut replica, client(), Body::Request(cmd("a")));
        // slots 2 and 3 are decided from other replicas' proposals
        decide(&mut replica, 2, cmd("b"));
        assert_eq!(replica.slot_in(), Slot::new(3));
        decide(&mut replica, 3, cmd("c"));
        assert_eq!(replica.slot_in(), Slot::new(4));
        assert_eq!(replica.slot_out(), Slot::INITIAL);

        let effects = deliver(&mut replica, client(), Body::Request(cmd("d")));
        assert_eq!(
            proposals(&effects)
                .into_iter()
                .map(|(_, slot, _)| slot)
                .collect::<Vec<_>>(),
            vec![Slot::new(4); leaders().len()]
        );
        assert_eq!(replica.slot_in(), Slot::new(5));
    }

    #[test]
    fn test_reconfiguration_takes_effect_after_window() {
        let (mut replica, log) = replica();
        let replacement = vec![Address::new(7, Role::Leader)];
        let reconfig = Command::reconfig("admin", "r1", replacement.clone());

        deliver(&mut replica, client(), Body::Request(reconfig.clone()));
        decide(&mut replica, 1, reconfig);
        // never handed to the state machine
        assert!(log.entries().is_empty());

        // slots 2..=5 still go to the old leaders
        for slot in 2..=5u64 {
            let id = slot.to_string();
            let effects = deliver(&mut replica, client(), Body::Request(cmd(&id)));
            let targets: Vec<Address> = proposals(&effects)
                .into_iter()
                .map(|(dest, ..)| dest)
                .collect();
            assert_eq!(targets, leaders(), "slot {slot}");
            decide(&mut replica, slot, cmd(&id));
        }

        // slot 6 = 1 + window: the new configuration applies
        let effects = deliver(&mut replica, client(), Body::Request(cmd("6")));
        assert_eq!(
            proposals(&effects),
            vec![(replacement[0], Slot::new(6), cmd("6"))]
        );
        assert_eq!(replica.leaders(), replacement.as_slice());
    }

    #[test]
    fn test_phase1_request_is_a_violation() {
        let (mut replica, _) = replica();
        let mut out = Outbox::new(replica.address());
        let result = replica.handle(
            Message::new(
                Address::new(0, Role::Scout),
                Body::Phase1Request {
                    ballot: crate::types::BallotNumber::new(0, leaders()[0]),
                },
            ),
            &mut out,
        );
        assert!(result.is_err());
    }
}
