use crate::address;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
struct Reservation {
    valid: bool,
    address: address,
}

/// LL reservations, at most one per processor.
#[derive(Debug, Clone)]
pub struct AtomicTab {
    entries: Vec<Reservation>,
}

impl AtomicTab {
    #[must_use]
    pub fn new(num_procs: usize) -> Self {
        Self {
            entries: vec![Reservation::default(); num_procs],
        }
    }

    /// Reserves `address` for `srcid`, replacing any older reservation.
    pub fn set(&mut self, srcid: usize, address: address) {
        self.entries[srcid] = Reservation {
            valid: true,
            address,
        };
    }

    #[must_use]
    pub fn is_atomic(&self, srcid: usize, address: address) -> bool {
        let entry = &self.entries[srcid];
        entry.valid && entry.address == address
    }

    /// Cancels every reservation of `address`.
    pub fn reset(&mut self, address: address) {
        for entry in &mut self.entries {
            if entry.address == address {
                entry.valid = false;
            }
        }
    }

    #[must_use]
    pub fn reservation(&self, srcid: usize) -> Option<address> {
        let entry = &self.entries[srcid];
        entry.valid.then_some(entry.address)
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicTab;

    #[test]
    fn test_reset_cancels_all_reservations_of_address() {
        let mut tab = AtomicTab::new(3);
        tab.set(0, 0x100);
        tab.set(1, 0x100);
        tab.set(2, 0x104);
        tab.reset(0x100);
        assert!(!tab.is_atomic(0, 0x100));
        assert!(!tab.is_atomic(1, 0x100));
        assert!(tab.is_atomic(2, 0x104));
    }

    #[test]
    fn test_new_reservation_replaces_old() {
        let mut tab = AtomicTab::new(1);
        tab.set(0, 0x100);
        tab.set(0, 0x200);
        assert!(!tab.is_atomic(0, 0x100));
        assert_eq!(tab.reservation(0), Some(0x200));
    }
}
