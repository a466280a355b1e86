//! Fake-IP ring
//!
//! A cursor walks the inclusive range `[min, max]`. Every allocation binds the
//! slot under the cursor to a domain, overwriting whatever was bound there,
//! then advances the cursor (wrapping to `min` past `max`). There is no
//! domain-to-IP index: the ring is a fixed-capacity FIFO keyed by address.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Fixed-capacity ring of fake IPv4 addresses
#[derive(Debug, Clone)]
pub struct FakeIpRing {
    /// First address of the range
    min: u32,
    /// Last address of the range (inclusive)
    max: u32,
    /// Next slot to hand out
    cursor: u32,
    /// Slot -> bound domain
    slots: HashMap<u32, String>,
}

impl FakeIpRing {
    /// Create an empty ring over `[min, max]`
    ///
    /// The caller guarantees `min <= max`.
    #[must_use]
    pub fn new(min: Ipv4Addr, max: Ipv4Addr) -> Self {
        let min = u32::from(min);
        Self {
            min,
            max: u32::from(max),
            cursor: min,
            slots: HashMap::with_capacity(64),
        }
    }

    /// Bind the current slot to `domain` and advance the cursor
    pub fn allocate(&mut self, domain: &str) -> Ipv4Addr {
        let slot = self.cursor;
        self.slots.insert(slot, domain.to_string());
        self.cursor = if slot >= self.max { self.min } else { slot + 1 };
        Ipv4Addr::from(slot)
    }

    /// Domain currently bound to `ip`
    #[must_use]
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&str> {
        self.slots.get(&u32::from(ip)).map(String::as_str)
    }

    /// Total number of slots
    #[must_use]
    pub fn capacity(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }

    /// Number of slots currently bound
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no slot is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Raw cursor value
    #[must_use]
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// All bindings ordered by slot
    #[must_use]
    pub fn bindings(&self) -> Vec<(u32, String)> {
        let mut bindings: Vec<_> = self
            .slots
            .iter()
            .map(|(slot, domain)| (*slot, domain.clone()))
            .collect();
        bindings.sort_unstable_by_key(|(slot, _)| *slot);
        bindings
    }

    /// Replace the whole state with a restored one
    ///
    /// The caller guarantees every slot and the cursor lie within range.
    pub(crate) fn restore(&mut self, cursor: u32, slots: HashMap<u32, String>) {
        self.cursor = cursor;
        self.slots = slots;
    }
}
