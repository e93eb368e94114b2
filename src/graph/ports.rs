//! # Realm-scoped port allocation.
//!
//! A realm declares ordered `[low, high]` ranges. They are flattened once into
//! an ascending set `P`, and ports are handed out strictly in order:
//!
//! ```text
//!   ranges  [[9000,9002],[9100,9100]]
//!   P       9000 9001 9002 9100
//!   calls   #1   #2   #3   #4   #5 → RangeExhausted
//! ```
//!
//! ## Rules
//! - No services in the realm yet (or no `last_port`) → `P[0]`.
//! - Otherwise the entry after `last_port`; a `last_port` outside `P` or past
//!   its end is exhausted. There is no wraparound.

use std::collections::BTreeSet;

use crate::resources::PortRange;

/// Flattened, ascending port set of one realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortAllocator {
    ports: Vec<u16>,
}

impl PortAllocator {
    /// Expands `ranges` into a deduplicated ascending set. Inverted ranges are empty.
    pub fn new(ranges: &[PortRange]) -> Self {
        let set: BTreeSet<u16> = ranges
            .iter()
            .flat_map(|PortRange(low, high)| *low..=*high)
            .collect();
        Self {
            ports: set.into_iter().collect(),
        }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Next port after `last_port`, or `None` when exhausted.
    pub fn next(&self, last_port: u16, has_services: bool) -> Option<u16> {
        if !has_services || last_port == 0 {
            return self.ports.first().copied();
        }
        let idx = self.ports.iter().position(|p| *p == last_port)?;
        self.ports.get(idx + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_and_sorts_ranges() {
        let a = PortAllocator::new(&[PortRange(9100, 9101), PortRange(9000, 9001), PortRange(9001, 9001)]);
        assert_eq!(a.ports(), &[9000, 9001, 9100, 9101]);
    }

    #[test]
    fn hands_out_ports_in_order_then_exhausts() {
        let a = PortAllocator::new(&[PortRange(9000, 9002)]);
        assert_eq!(a.next(0, false), Some(9000));
        assert_eq!(a.next(9000, true), Some(9001));
        assert_eq!(a.next(9001, true), Some(9002));
        assert_eq!(a.next(9002, true), None);
    }

    #[test]
    fn first_service_restarts_from_the_bottom() {
        let a = PortAllocator::new(&[PortRange(9000, 9002)]);
        assert_eq!(a.next(9001, false), Some(9000));
    }

    #[test]
    fn unknown_last_port_is_exhausted() {
        let a = PortAllocator::new(&[PortRange(9000, 9002)]);
        assert_eq!(a.next(8000, true), None);
    }

    #[test]
    fn empty_ranges_give_nothing() {
        let a = PortAllocator::new(&[PortRange(10, 5)]);
        assert_eq!(a.next(0, false), None);
    }
}
