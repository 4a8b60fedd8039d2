// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-namespace registration state.
//!
//! A [`Namespace`] is plain data; the owning [`super::service::Broker`]
//! wraps each one in a `KMutex` and serializes every registry and
//! IP-pool mutation for a namespace under that lock.

use crate::api::BackendConnect;
use crate::api::DomainId;
use crate::api::Error;
use crate::api::FrontendConnect;
use crate::api::FrontendSlotSnapshot;
use crate::api::FrontendStatus;
use crate::api::MAX_FRONTENDS;
use crate::engine::ippool::IpPool;

/// Whether a backend is currently registered for the namespace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceState {
    Unregistered,
    Registered,
}

/// The backend's stored descriptor plus the authoritative identity of
/// the domain that registered it. Meaningful only while the namespace
/// is [`ServiceState::Registered`].
#[derive(Clone, Copy, Debug)]
pub struct BackendRecord {
    pub connect: BackendConnect,
    pub domid: DomainId,
}

/// One frontend slot. The owner is meaningful only while the status
/// is [`FrontendStatus::Active`].
#[derive(Clone, Copy, Debug)]
pub struct FrontendSlot {
    pub connect: FrontendConnect,
    pub owner: Option<DomainId>,
    pub status: FrontendStatus,
}

impl FrontendSlot {
    const DEAD: Self = Self {
        connect: FrontendConnect {
            tx_ring_ref: 0,
            rx_ring_ref: 0,
            event_channel: 0,
            features: 0,
        },
        owner: None,
        status: FrontendStatus::Dead,
    };

    fn snapshot(&self) -> FrontendSlotSnapshot {
        FrontendSlotSnapshot {
            connect: self.connect,
            domid: self.owner.map(|d| d.0).unwrap_or(0),
            status: self.status.into(),
        }
    }
}

/// One independent registry: backend registration, the fixed frontend
/// slot array, and the namespace's IP pool. Only namespace 0's pool
/// is ever loaded; the others stay empty.
pub struct Namespace {
    state: ServiceState,
    backend: Option<BackendRecord>,
    slots: [FrontendSlot; MAX_FRONTENDS],
    pool: IpPool,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub const fn new() -> Self {
        Self {
            state: ServiceState::Unregistered,
            backend: None,
            slots: [FrontendSlot::DEAD; MAX_FRONTENDS],
            pool: IpPool::new(),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn pool(&self) -> &IpPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut IpPool {
        &mut self.pool
    }

    /// Reset the namespace: backend unregistered, every frontend
    /// dead, pool wiped.
    pub fn cleanup(&mut self) {
        self.state = ServiceState::Unregistered;
        self.backend = None;
        for slot in &mut self.slots {
            slot.owner = None;
            slot.status = FrontendStatus::Dead;
        }
        self.pool.reset();
    }

    /// Install (or overwrite) the backend registration. The caller's
    /// hypervisor-supplied identity is recorded, never anything from
    /// the descriptor.
    pub fn set_backend(&mut self, connect: BackendConnect, caller: DomainId) {
        self.backend = Some(BackendRecord { connect, domid: caller });
        self.state = ServiceState::Registered;
    }

    /// Unregister the backend. Only the domain that registered it may
    /// do so.
    pub fn clear_backend(&mut self, caller: DomainId) -> Result<(), Error> {
        if self.state != ServiceState::Registered {
            return Err(Error::NotRegistered);
        }

        // Unwrap safety: Registered implies a backend record.
        if self.backend.unwrap().domid != caller {
            return Err(Error::PermissionDenied);
        }

        self.state = ServiceState::Unregistered;
        Ok(())
    }

    /// The backend descriptor as handed back by `QueryBackend`. A
    /// namespace that never saw a registration reports a zeroed
    /// record; the caller is expected to check registration state out
    /// of band.
    pub fn backend_connect(&self) -> BackendConnect {
        self.backend.map(|rec| rec.connect).unwrap_or_default()
    }

    /// Find the caller's active slot, if it has one. At most one slot
    /// per domain is ever active, so the first match is the only one.
    pub fn active_slot(&self, caller: DomainId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.status == FrontendStatus::Active && slot.owner == Some(caller)
        })
    }

    /// Commit a frontend registration into `slot`.
    pub fn activate_slot(
        &mut self,
        slot: usize,
        caller: DomainId,
        connect: FrontendConnect,
    ) {
        self.slots[slot] = FrontendSlot {
            connect,
            owner: Some(caller),
            status: FrontendStatus::Active,
        };
    }

    /// A copy of the whole slot array, dead slots included; the
    /// backend inspects status itself.
    pub fn snapshot(&self) -> [FrontendSlotSnapshot; MAX_FRONTENDS] {
        core::array::from_fn(|i| self.slots[i].snapshot())
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn slot(&self, idx: usize) -> &FrontendSlot {
        &self.slots[idx]
    }
}
