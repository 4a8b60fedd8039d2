// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lock-free port ownership tables.
//!
//! Ports are bound far more often, and at far finer granularity, than
//! the coarse registry operations, so the tables take no lock at all:
//! each entry is a single atomic word manipulated with acquire/release
//! load and compare-exchange. Entries are independent; no operation
//! needs multi-entry atomicity.

use crate::api::DomainId;
use crate::api::EPHEMERAL_PORT_FIRST;
use crate::api::Error;
use crate::api::Ipv4Addr;
use crate::api::Protocol;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

const NUM_PORTS: usize = 1 << 16;

// A free entry packs an all-ones owner, so the all-ones domain id is
// reserved: the hypervisor never assigns it to a real domain.
const FREE: u64 = (u32::MAX as u64) << 32;

fn encode(dom: DomainId, ip: Ipv4Addr) -> u64 {
    debug_assert!(dom.0 != u32::MAX);
    ((dom.0 as u64) << 32) | u64::from(u32::from(ip))
}

fn decode(word: u64) -> Option<(DomainId, Ipv4Addr)> {
    if word == FREE {
        return None;
    }

    let dom = DomainId((word >> 32) as u32);
    let ip = Ipv4Addr::from(word as u32);
    Some((dom, ip))
}

/// The port table for one transport protocol: 65536 entries, each
/// either free or `(owner domain, owner ip)`.
pub struct PortMap {
    entries: Vec<AtomicU64>,
}

impl Default for PortMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PortMap {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(NUM_PORTS);
        entries.resize_with(NUM_PORTS, || AtomicU64::new(FREE));
        Self { entries }
    }

    /// Claim a port for `(dom, ip)`.
    ///
    /// A non-zero `port` asks for that exact port: rebinding a port
    /// the caller already owns is idempotent and succeeds without
    /// touching the entry; a port owned by anyone else (including one
    /// lost to a racing claim) fails with [`Error::AddressInUse`].
    ///
    /// Port 0 asks for an ephemeral port: the range starting at
    /// [`EPHEMERAL_PORT_FIRST`] is scanned in port order and the
    /// first successfully claimed entry is returned, or
    /// [`Error::AddressExhausted`] if the whole range is taken.
    pub fn bind(
        &self,
        dom: DomainId,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<u16, Error> {
        if port == 0 {
            return self.bind_ephemeral(dom, ip);
        }

        let entry = &self.entries[usize::from(port)];
        let old = entry.load(Ordering::Acquire);

        if let Some((owner, _)) = decode(old) {
            if owner == dom {
                // Already bound by this domain.
                return Ok(port);
            }
            return Err(Error::AddressInUse);
        }

        entry
            .compare_exchange(
                FREE,
                encode(dom, ip),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map(|_| port)
            .map_err(|_| Error::AddressInUse)
    }

    fn bind_ephemeral(
        &self,
        dom: DomainId,
        ip: Ipv4Addr,
    ) -> Result<u16, Error> {
        for port in EPHEMERAL_PORT_FIRST..=u16::MAX {
            let entry = &self.entries[usize::from(port)];

            if entry.load(Ordering::Acquire) != FREE {
                continue;
            }

            if entry
                .compare_exchange(
                    FREE,
                    encode(dom, ip),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(port);
            }
        }

        crate::engine::err!("no free ephemeral port for {}", dom);
        Err(Error::AddressExhausted)
    }

    /// Release a port unconditionally. There is no ownership check:
    /// this is only reachable from callers that just claimed the
    /// entry themselves and need to hand it back (report-back fault
    /// compensation).
    pub fn unbind(&self, port: u16) {
        self.entries[usize::from(port)].store(FREE, Ordering::Release);
    }

    /// The current owner of a port, if any.
    pub fn owner(&self, port: u16) -> Option<(DomainId, Ipv4Addr)> {
        decode(self.entries[usize::from(port)].load(Ordering::Acquire))
    }

    /// Mark every entry free.
    pub fn wipe(&self) {
        for entry in &self.entries {
            entry.store(FREE, Ordering::Release);
        }
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn num_bound(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.load(Ordering::Acquire) != FREE)
            .count()
    }
}

/// One [`PortMap`] per transport protocol. The TCP and UDP port
/// number spaces are logically independent, so they never contend.
pub struct PortTables {
    tcp: PortMap,
    udp: PortMap,
}

impl Default for PortTables {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTables {
    pub fn new() -> Self {
        Self { tcp: PortMap::new(), udp: PortMap::new() }
    }

    pub fn get(&self, proto: Protocol) -> &PortMap {
        match proto {
            Protocol::TCP => &self.tcp,
            Protocol::UDP => &self.udp,
        }
    }

    pub fn wipe(&self) {
        self.tcp.wipe();
        self.udp.wipe();
    }
}
