//! Majority tracking shared by scouts and commanders

use std::collections::BTreeSet;

use tracing::trace;

use crate::types::Address;

/// The set of acceptors a scout or commander is still waiting on.
///
/// A majority is reached once fewer than half of all acceptors remain
/// unanswered, i.e. after `acceptors / 2 + 1` distinct replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quorum {
    waiting: BTreeSet<Address>,
    total: usize,
}

impl Quorum {
    #[must_use]
    pub fn new(acceptors: &[Address]) -> Self {
        let waiting: BTreeSet<Address> = acceptors.iter().copied().collect();
        Self {
            total: waiting.len(),
            waiting,
        }
    }

    #[must_use]
    pub fn is_waiting_on(&self, acceptor: Address) -> bool {
        self.waiting.contains(&acceptor)
    }

    /// Record a matching reply from `acceptor`. Returns `true` if a majority
    /// has now replied.
    pub fn record(&mut self, acceptor: Address) -> bool {
        self.waiting.remove(&acceptor);
        trace!(
            remaining = self.waiting.len(),
            quorum = self.threshold(),
            "tracking reply"
        );
        self.is_reached()
    }

    #[must_use]
    pub fn is_reached(&self) -> bool {
        self.waiting.len() * 2 < self.total
    }

    /// Number of distinct replies needed.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.total / 2 + 1
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn acceptors(n: u64) -> Vec<Address> {
        (0..n).map(|id| Address::new(id, Role::Acceptor)).collect()
    }

    #[test]
    fn test_majority_needs_floor_half_plus_one() {
        for n in 1..=7u64 {
            let all = acceptors(n);
            let mut quorum = Quorum::new(&all);
            let needed = usize::try_from(n / 2 + 1).unwrap();
            assert_eq!(quorum.threshold(), needed);

            for (i, acceptor) in all.iter().enumerate() {
                let reached = quorum.record(*acceptor);
                assert_eq!(reached, i + 1 >= needed, "n={n} replies={}", i + 1);
            }
        }
    }

    #[test]
    fn test_repeated_reply_counts_once() {
        let all = acceptors(3);
        let mut quorum = Quorum::new(&all);
        assert!(!quorum.record(all[0]));
        assert!(!quorum.record(all[0]));
        assert!(!quorum.is_waiting_on(all[0]));
        assert_eq!(quorum.remaining(), 2);
        assert!(quorum.record(all[1]));
    }
}
