// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bounded pool of dedicated guest addresses.
//!
//! A pure data-manipulation helper: it has no concurrency control of
//! its own and must only be touched while holding the owning
//! namespace's lock.

use crate::api::IP_POOL_SIZE;
use crate::api::IpCfg;
use crate::api::MAX_FRONTENDS;

/// A fixed-capacity pool of `(ip, netmask, mtu)` triples, plus the
/// one shared address that is always available and never allocated
/// out, and the per-slot allocation table that records which triple a
/// frontend slot currently owns.
///
/// Invariant: a triple recorded in `allocated[i]` is never
/// simultaneously present in `free`, so the number of triples in
/// circulation never exceeds what the backend registered.
#[derive(Debug)]
pub struct IpPool {
    free: [Option<IpCfg>; IP_POOL_SIZE],
    allocated: [Option<IpCfg>; MAX_FRONTENDS],
    shared: Option<IpCfg>,
}

impl Default for IpPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IpPool {
    pub const fn new() -> Self {
        Self {
            free: [None; IP_POOL_SIZE],
            allocated: [None; MAX_FRONTENDS],
            shared: None,
        }
    }

    /// Bulk-replace the free triples and shared address. The final
    /// entry of the payload is the shared address; wire records with
    /// an all-zeros address mark empty slots and become `None` here.
    ///
    /// Allocations already handed to slots are untouched: a backend
    /// reloading the pool after a restart must not disturb the
    /// addresses its frontends are already configured with.
    pub fn load(&mut self, entries: &[IpCfg; IP_POOL_SIZE + 1]) {
        for (slot, entry) in self.free.iter_mut().zip(entries.iter()) {
            *slot = if entry.is_empty() { None } else { Some(*entry) };
        }

        let shared = entries[IP_POOL_SIZE];
        self.shared = if shared.is_empty() { None } else { Some(shared) };
    }

    /// Wipe the pool: no free triples, no allocations, no shared
    /// address.
    pub fn reset(&mut self) {
        self.free = [None; IP_POOL_SIZE];
        self.allocated = [None; MAX_FRONTENDS];
        self.shared = None;
    }

    /// Start a fresh address epoch: discard the free triples and the
    /// shared address, but keep the per-slot allocations. Addresses
    /// already handed to frontends outlive a backend restart; only a
    /// full [`IpPool::reset`] revokes them.
    pub fn reset_free(&mut self) {
        self.free = [None; IP_POOL_SIZE];
        self.shared = None;
    }

    /// Remove and return the first free triple by index. Selection
    /// order is deterministic so callers (and tests) can predict
    /// which address a registration receives.
    pub fn take_one(&mut self) -> Option<IpCfg> {
        self.free.iter_mut().find(|slot| slot.is_some())?.take()
    }

    /// Insert a triple into the first empty pool slot. While the
    /// circulation invariant holds there is always one.
    pub fn give_back(&mut self, cfg: IpCfg) {
        if let Some(slot) = self.free.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(cfg);
        }
    }

    /// The triple currently owned by a frontend slot, if any.
    pub fn allocated(&self, slot: usize) -> Option<IpCfg> {
        self.allocated[slot]
    }

    /// Record `cfg` as owned by `slot`.
    pub fn assign(&mut self, slot: usize, cfg: IpCfg) {
        self.allocated[slot] = Some(cfg);
    }

    /// Return `slot`'s triple (if it holds one) to the free pool; the
    /// slot falls back to the shared address.
    pub fn release_slot(&mut self, slot: usize) {
        if let Some(cfg) = self.allocated[slot].take() {
            self.give_back(cfg);
        }
    }

    /// Drop `slot`'s allocation without returning it to the free
    /// pool. Used to roll back an allocation made earlier in the same
    /// critical section, paired with [`IpPool::give_back`].
    pub fn unassign(&mut self, slot: usize) -> Option<IpCfg> {
        self.allocated[slot].take()
    }

    /// The address a slot should actually use: its dedicated triple,
    /// or the shared address if it has none.
    pub fn effective(&self, slot: usize) -> Option<IpCfg> {
        self.allocated[slot].or(self.shared)
    }

    pub fn shared(&self) -> Option<IpCfg> {
        self.shared
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn num_free(&self) -> usize {
        self.free.iter().filter(|slot| slot.is_some()).count()
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn free_entries(&self) -> impl Iterator<Item = IpCfg> + '_ {
        self.free.iter().filter_map(|slot| *slot)
    }
}
