//! Host port allocation for branches.
//!
//! Allocation is synchronous bookkeeping guarded by a plain `std::sync::Mutex`
//! rather than a `tokio::sync::Mutex`: nothing is held across an `.await`
//! point.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Assigns unique ports in `[start, end]` to branches, and reclaims them on
/// deletion. The used-port set is reconstructed from the registry on
/// startup so the allocator has no independent durable state.
pub struct PortAllocator {
    start: u16,
    end: u16,
    used: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Build an allocator over `[start, end]` with an initially empty
    /// used-set.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Build an allocator whose used-set is seeded from `ports`, for
    /// startup recovery (`BranchEngine::recover`).
    pub fn with_used_ports(start: u16, end: u16, ports: impl IntoIterator<Item = u16>) -> Self {
        let allocator = Self::new(start, end);
        allocator.used.lock().expect("lock poisoned").extend(ports);
        allocator
    }

    /// Reserve and return the lowest free port in the configured range.
    ///
    /// # Errors
    /// Returns [`Error::PortsExhausted`] if every port in range is taken.
    pub fn allocate(&self) -> Result<u16> {
        let mut used = self.used.lock().expect("lock poisoned");
        for candidate in self.start..=self.end {
            if !used.contains(&candidate) {
                used.insert(candidate);
                return Ok(candidate);
            }
        }
        Err(Error::PortsExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Return `port` to the free pool. Idempotent.
    pub fn release(&self, port: u16) {
        self.used.lock().expect("lock poisoned").remove(&port);
    }

    /// Mark `port` as used without consulting the free/used scan. Idempotent.
    /// Used during startup recovery to reserve ports already held by
    /// branches discovered in the registry.
    pub fn reserve(&self, port: u16) {
        self.used.lock().expect("lock poisoned").insert(port);
    }

    /// Number of ports currently held, for diagnostics/tests.
    pub fn in_use_count(&self) -> usize {
        self.used.lock().expect("lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_port_first() {
        let allocator = PortAllocator::new(8001, 8999);
        assert_eq!(allocator.allocate().unwrap(), 8001);
        assert_eq!(allocator.allocate().unwrap(), 8002);
    }

    #[test]
    fn release_makes_port_reusable() {
        let allocator = PortAllocator::new(8001, 8999);
        let port = allocator.allocate().unwrap();
        allocator.release(port);
        assert_eq!(allocator.allocate().unwrap(), port);
    }

    #[test]
    fn exhaustion_is_reported() {
        let allocator = PortAllocator::new(8001, 8002);
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        let err = allocator.allocate().unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { .. }));
    }

    #[test]
    fn seeds_used_set_on_recovery() {
        let allocator = PortAllocator::with_used_ports(8001, 8999, [8001, 8002]);
        assert_eq!(allocator.in_use_count(), 2);
        assert_eq!(allocator.allocate().unwrap(), 8003);
    }

    #[test]
    fn release_is_idempotent() {
        let allocator = PortAllocator::new(8001, 8999);
        allocator.release(8050);
        allocator.release(8050);
        assert_eq!(allocator.in_use_count(), 0);
    }

    #[test]
    fn reserve_prevents_reallocation() {
        let allocator = PortAllocator::new(8001, 8999);
        allocator.reserve(8001);
        assert_eq!(allocator.allocate().unwrap(), 8002);
    }
}
