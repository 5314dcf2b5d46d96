use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::Address;

/// Admission registry. Membership is the only state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist {
    admitted: BTreeSet<Address>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, who: &Address) -> bool {
        self.admitted.contains(who)
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Admit `add`, then revoke `remove`; an address in both lists ends up revoked.
    /// Returns the final flag for every address touched, in input order.
    pub fn apply(&mut self, add: &[Address], remove: &[Address]) -> Vec<(Address, bool)> {
        let mut touched = Vec::with_capacity(add.len() + remove.len());
        for a in add {
            self.admitted.insert(*a);
        }
        for r in remove {
            self.admitted.remove(r);
        }
        for a in add.iter().chain(remove.iter()) {
            if !touched.iter().any(|(t, _)| t == a) {
                touched.push((*a, self.admitted.contains(a)));
            }
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::addr;

    #[test]
    fn add_then_remove_restores_absence() {
        let mut wl = Whitelist::new();
        wl.apply(&[addr(1)], &[]);
        assert!(wl.contains(&addr(1)));
        wl.apply(&[], &[addr(1)]);
        assert!(!wl.contains(&addr(1)));
        assert!(wl.is_empty());
    }

    #[test]
    fn removal_wins_on_conflict() {
        let mut wl = Whitelist::new();
        let touched = wl.apply(&[addr(1), addr(2)], &[addr(2)]);
        assert!(wl.contains(&addr(1)));
        assert!(!wl.contains(&addr(2)));
        assert_eq!(touched, vec![(addr(1), true), (addr(2), false)]);
    }

    #[test]
    fn removing_unknown_is_noop() {
        let mut wl = Whitelist::new();
        let touched = wl.apply(&[], &[addr(9)]);
        assert_eq!(touched, vec![(addr(9), false)]);
        assert_eq!(wl.len(), 0);
    }
}
