// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hypercall surface of the broker.
//!
//! Two entry points mirror the two hypercalls: [`Broker::service_op`]
//! for registry operations and [`Broker::port_bind`] for port claims.
//! Registry operations hold the target namespace's lock for their
//! whole duration; a port bind only takes the lock long enough to
//! look up the caller's address, then works lock-free against the
//! port tables.

use crate::api::DomainId;
use crate::api::Error;
use crate::api::FrontendConnect;
use crate::api::IP_POOL_SIZE;
use crate::api::IpCfg;
use crate::api::MAX_FRONTENDS;
use crate::api::NUM_NAMESPACES;
use crate::api::Protocol;
use crate::api::ServiceCmd;
use crate::ddi::sync::KMutex;
use crate::engine::portmap::PortTables;
use crate::engine::registry::Namespace;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// A guest memory transfer failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CopyError;

impl From<CopyError> for Error {
    fn from(_: CopyError) -> Self {
        Error::CopyFault
    }
}

/// The contract the hypercall transport provides: all-or-nothing
/// movement of one fixed-layout record between the guest-supplied
/// buffer and the broker. A failed transfer has no partial effect
/// observable on either side.
pub trait GuestXfer {
    /// Read one `T` from the guest buffer.
    fn read<T: FromBytes>(&mut self) -> Result<T, CopyError>;

    /// Write one `T` back to the guest buffer.
    fn write<T: IntoBytes + Immutable>(
        &mut self,
        val: &T,
    ) -> Result<(), CopyError>;
}

/// The owned state of the whole broker: one lock-guarded
/// [`Namespace`] per sysid, the shared TCP/UDP port tables, and the
/// global next-slot counter.
///
/// The counter spans namespaces: per-namespace ordering comes from
/// the namespace lock, and the value is only ever advanced past a
/// slot that some namespace has committed.
pub struct Broker {
    namespaces: [KMutex<Namespace>; NUM_NAMESPACES],
    ports: PortTables,
    next_slot: AtomicU32,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            namespaces: core::array::from_fn(|_| {
                KMutex::new(Namespace::new())
            }),
            ports: PortTables::new(),
            next_slot: AtomicU32::new(0),
        }
    }

    /// The registry hypercall. The namespace id is validated before
    /// any lock is taken; the rest of the operation runs under the
    /// namespace's lock.
    pub fn service_op(
        &self,
        op: u32,
        namespace: usize,
        caller: DomainId,
        xfer: &mut impl GuestXfer,
    ) -> Result<(), Error> {
        if namespace >= NUM_NAMESPACES {
            return Err(Error::OutOfRange);
        }

        let cmd = ServiceCmd::try_from(op).map_err(|_| Error::Unsupported)?;

        match cmd {
            ServiceCmd::Cleanup => {
                self.cleanup(namespace);
                Ok(())
            }
            ServiceCmd::RegisterBackend => {
                self.register_backend(namespace, caller, xfer)
            }
            ServiceCmd::RegisterIpPool => {
                self.register_ip_pool(namespace, xfer)
            }
            ServiceCmd::UnregisterBackend => {
                self.namespaces[namespace].lock().clear_backend(caller)
            }
            ServiceCmd::RegisterFrontend => {
                self.register_frontend(namespace, caller, false, xfer)
            }
            ServiceCmd::RegisterFrontendDynamic => {
                self.register_frontend(namespace, caller, true, xfer)
            }
            ServiceCmd::FetchIp => self.fetch_ip(namespace, caller, xfer),
            ServiceCmd::QueryBackend => {
                let connect = self.namespaces[namespace].lock().backend_connect();
                Ok(xfer.write(&connect)?)
            }
            ServiceCmd::FetchFrontends | ServiceCmd::Reconnect => {
                let snap = self.namespaces[namespace].lock().snapshot();
                Ok(xfer.write(&snap)?)
            }
        }
    }

    /// Full reset of the service. The target namespace's registry is
    /// reset under its lock; the IP pool, the next-slot counter, and
    /// both port tables are global and are wiped regardless of which
    /// namespace the call named.
    fn cleanup(&self, namespace: usize) {
        crate::engine::dbg!("service cleanup (ns {})", namespace);

        self.namespaces[namespace].lock().cleanup();

        if namespace != 0 {
            self.namespaces[0].lock().pool_mut().reset();
        }

        self.next_slot.store(0, Ordering::Relaxed);
        self.ports.wipe();
    }

    fn register_backend(
        &self,
        namespace: usize,
        caller: DomainId,
        xfer: &mut impl GuestXfer,
    ) -> Result<(), Error> {
        let mut ns = self.namespaces[namespace].lock();

        // A new backend epoch gets a fresh set of assignable
        // addresses; triples already handed to frontends stay with
        // their slots so reconnecting frontends keep their address.
        // The reset precedes the descriptor read, so a faulted read
        // still leaves the free list cleared; the backend retries
        // the whole registration anyway.
        if namespace == 0 {
            ns.pool_mut().reset_free();
        }

        let connect = xfer.read()?;
        ns.set_backend(connect, caller);
        Ok(())
    }

    fn register_ip_pool(
        &self,
        namespace: usize,
        xfer: &mut impl GuestXfer,
    ) -> Result<(), Error> {
        // Only the primary namespace carries addresses; the other
        // pools stay empty.
        if namespace != 0 {
            return Err(Error::OutOfRange);
        }

        // The payload carries IP_POOL_SIZE assignable triples plus
        // the trailing shared address.
        let entries: [IpCfg; IP_POOL_SIZE + 1] = xfer.read()?;
        self.namespaces[namespace].lock().pool_mut().load(&entries);
        Ok(())
    }

    /// The slot-assignment algorithm.
    ///
    /// A caller that already holds an active slot gets the same slot
    /// back (reconnect); otherwise the candidate is the next unused
    /// index, committed only if the whole registration succeeds. A
    /// dynamic registration takes a pool address for the slot if it
    /// has none; a static one releases whatever the slot held,
    /// falling back to the shared address. The guest descriptor is
    /// read only after that bookkeeping, and a faulted read returns
    /// any address just taken before the error is surfaced.
    fn register_frontend(
        &self,
        namespace: usize,
        caller: DomainId,
        dynamic: bool,
        xfer: &mut impl GuestXfer,
    ) -> Result<(), Error> {
        let mut ns = self.namespaces[namespace].lock();

        let reused = ns.active_slot(caller);
        let slot = match reused {
            Some(idx) => idx,
            None => {
                let next = self.next_slot.load(Ordering::Relaxed) as usize;
                if next >= MAX_FRONTENDS {
                    crate::engine::err!("frontend slot table full");
                    return Err(Error::CapacityExceeded);
                }
                next
            }
        };

        let mut provisional = false;
        if dynamic {
            if ns.pool().allocated(slot).is_none() {
                let cfg = ns
                    .pool_mut()
                    .take_one()
                    .ok_or(Error::AddressExhausted)?;
                ns.pool_mut().assign(slot, cfg);
                provisional = true;
            }
        } else {
            ns.pool_mut().release_slot(slot);
        }

        let connect: FrontendConnect = match xfer.read() {
            Ok(c) => c,
            Err(_) => {
                // Roll back: the address taken above goes back to
                // the pool before the fault is surfaced.
                if provisional {
                    if let Some(cfg) = ns.pool_mut().unassign(slot) {
                        ns.pool_mut().give_back(cfg);
                    }
                }
                return Err(Error::CopyFault);
            }
        };

        ns.activate_slot(slot, caller, connect);

        if reused.is_none() {
            self.next_slot.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }

    fn fetch_ip(
        &self,
        namespace: usize,
        caller: DomainId,
        xfer: &mut impl GuestXfer,
    ) -> Result<(), Error> {
        let cfg = {
            let ns = self.namespaces[namespace].lock();
            let slot = ns.active_slot(caller).ok_or(Error::NotFound)?;
            ns.pool().effective(slot).unwrap_or_default()
        };

        Ok(xfer.write(&cfg)?)
    }

    /// The port-bind hypercall. Restricted to the primary namespace.
    ///
    /// The requested port travels through the guest cell in both
    /// directions: 0 asks for an ephemeral port, and the granted port
    /// is written back through the same cell. If that write-back
    /// faults the claim is released again, so the caller never leaks
    /// a port it could not learn about.
    pub fn port_bind(
        &self,
        namespace: usize,
        caller: DomainId,
        protocol: u8,
        xfer: &mut impl GuestXfer,
    ) -> Result<(), Error> {
        if namespace != 0 {
            return Err(Error::OutOfRange);
        }

        let requested: u16 = xfer.read()?;
        let proto =
            Protocol::try_from(protocol).map_err(|_| Error::Unsupported)?;

        // Only long enough to learn the caller's effective address;
        // the scan below must not extend the lock hold time.
        let ip = {
            let ns = self.namespaces[namespace].lock();
            let slot = ns.active_slot(caller).ok_or(Error::NotFound)?;
            ns.pool().effective(slot).unwrap_or_default().addr
        };

        let table = self.ports.get(proto);
        let granted = table.bind(caller, ip, requested)?;
        crate::engine::dbg!("{} port {} bound to {} ({})", proto, granted, caller, ip);

        if xfer.write(&granted).is_err() {
            table.unbind(granted);
            return Err(Error::CopyFault);
        }

        Ok(())
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn ports(&self) -> &PortTables {
        &self.ports
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn namespace(&self, idx: usize) -> crate::ddi::sync::KMutexGuard<'_, Namespace> {
        self.namespaces[idx].lock()
    }

    #[cfg(any(feature = "test-help", test))]
    pub fn next_slot(&self) -> u32 {
        self.next_slot.load(Ordering::Relaxed)
    }
}

/// An in-memory [`GuestXfer`] with injectable faults, standing in for
/// the hypercall transport during testing.
#[cfg(any(feature = "test-help", test))]
pub struct TestXfer {
    buf: alloc::vec::Vec<u8>,
    fail_read: bool,
    fail_write: bool,
}

#[cfg(any(feature = "test-help", test))]
impl TestXfer {
    /// A transfer buffer seeded with `val`, as a guest would supply.
    pub fn of<T: IntoBytes + Immutable>(val: &T) -> Self {
        Self {
            buf: val.as_bytes().to_vec(),
            fail_read: false,
            fail_write: false,
        }
    }

    /// An empty buffer, for operations that only write back.
    pub fn empty() -> Self {
        Self {
            buf: alloc::vec::Vec::new(),
            fail_read: false,
            fail_write: false,
        }
    }

    pub fn fail_read(mut self) -> Self {
        self.fail_read = true;
        self
    }

    pub fn fail_write(mut self) -> Self {
        self.fail_write = true;
        self
    }

    /// Decode the buffer's current contents, i.e. what the guest
    /// would observe after the call.
    pub fn value<T: FromBytes>(&self) -> T {
        T::read_from_bytes(&self.buf).unwrap()
    }
}

#[cfg(any(feature = "test-help", test))]
impl GuestXfer for TestXfer {
    fn read<T: FromBytes>(&mut self) -> Result<T, CopyError> {
        if self.fail_read {
            return Err(CopyError);
        }

        let bytes =
            self.buf.get(..core::mem::size_of::<T>()).ok_or(CopyError)?;
        T::read_from_bytes(bytes).map_err(|_| CopyError)
    }

    fn write<T: IntoBytes + Immutable>(
        &mut self,
        val: &T,
    ) -> Result<(), CopyError> {
        if self.fail_write {
            return Err(CopyError);
        }

        self.buf = val.as_bytes().to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::BackendConnect;
    use crate::api::FrontendSlotSnapshot;
    use crate::api::FrontendStatus;
    use crate::api::PROTO_TCP;

    const BACKEND: DomainId = DomainId(10);
    const GUEST: DomainId = DomainId(20);

    fn cfg(last: u8) -> IpCfg {
        IpCfg::new(
            [10, 0, 0, last].into(),
            [255, 255, 255, 0].into(),
            1500,
        )
    }

    fn pool_payload(n: usize) -> [IpCfg; IP_POOL_SIZE + 1] {
        let mut entries = [IpCfg::default(); IP_POOL_SIZE + 1];
        for (i, entry) in entries.iter_mut().take(n).enumerate() {
            *entry = cfg(i as u8 + 1);
        }
        entries[IP_POOL_SIZE] = cfg(200);
        entries
    }

    fn broker_with_pool(n: usize) -> Broker {
        let broker = Broker::new();
        let mut xfer = TestXfer::of(&BackendConnect::default());
        broker
            .service_op(ServiceCmd::RegisterBackend as u32, 0, BACKEND, &mut xfer)
            .unwrap();
        let mut xfer = TestXfer::of(&pool_payload(n));
        broker
            .service_op(ServiceCmd::RegisterIpPool as u32, 0, BACKEND, &mut xfer)
            .unwrap();
        broker
    }

    fn register_frontend(
        broker: &Broker,
        dom: DomainId,
        dynamic: bool,
    ) -> Result<(), Error> {
        let op = if dynamic {
            ServiceCmd::RegisterFrontendDynamic
        } else {
            ServiceCmd::RegisterFrontend
        };
        let mut xfer = TestXfer::of(&FrontendConnect::default());
        broker.service_op(op as u32, 0, dom, &mut xfer)
    }

    #[test]
    fn bad_namespace_is_rejected_before_anything_else() {
        let broker = Broker::new();
        let mut xfer = TestXfer::empty().fail_read();
        assert_eq!(
            broker.service_op(
                ServiceCmd::Cleanup as u32,
                NUM_NAMESPACES,
                GUEST,
                &mut xfer
            ),
            Err(Error::OutOfRange)
        );
    }

    #[test]
    fn unknown_op_is_unsupported() {
        let broker = Broker::new();
        let mut xfer = TestXfer::empty();
        assert_eq!(
            broker.service_op(999, 0, GUEST, &mut xfer),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn copy_fault_during_frontend_register_rolls_back_pool() {
        let broker = broker_with_pool(2);

        let mut xfer = TestXfer::of(&FrontendConnect::default()).fail_read();
        assert_eq!(
            broker.service_op(
                ServiceCmd::RegisterFrontendDynamic as u32,
                0,
                GUEST,
                &mut xfer
            ),
            Err(Error::CopyFault)
        );

        // The address taken for the provisional slot is back in the
        // pool and the slot was never activated.
        let ns = broker.namespace(0);
        assert_eq!(ns.pool().num_free(), 2);
        assert_eq!(ns.active_slot(GUEST), None);
        drop(ns);
        assert_eq!(broker.next_slot(), 0);
    }

    #[test]
    fn exhausted_pool_does_not_consume_slot() {
        let broker = broker_with_pool(0);

        assert_eq!(
            register_frontend(&broker, GUEST, true),
            Err(Error::AddressExhausted)
        );
        assert_eq!(broker.next_slot(), 0);

        // Refill the pool; the same caller now lands in slot 0.
        let mut xfer = TestXfer::of(&pool_payload(1));
        broker
            .service_op(ServiceCmd::RegisterIpPool as u32, 0, BACKEND, &mut xfer)
            .unwrap();
        register_frontend(&broker, GUEST, true).unwrap();
        assert_eq!(broker.namespace(0).active_slot(GUEST), Some(0));
        assert_eq!(broker.next_slot(), 1);
    }

    #[test]
    fn reconnect_reuses_slot() {
        let broker = broker_with_pool(2);

        register_frontend(&broker, GUEST, true).unwrap();
        register_frontend(&broker, GUEST, true).unwrap();
        register_frontend(&broker, GUEST, true).unwrap();

        let ns = broker.namespace(0);
        assert_eq!(ns.active_slot(GUEST), Some(0));
        // The reconnects neither advanced the counter nor took a
        // second address.
        assert_eq!(ns.pool().num_free(), 1);
        drop(ns);
        assert_eq!(broker.next_slot(), 1);
    }

    #[test]
    fn static_register_releases_dynamic_address() {
        let broker = broker_with_pool(1);

        register_frontend(&broker, GUEST, true).unwrap();
        assert_eq!(broker.namespace(0).pool().num_free(), 0);

        register_frontend(&broker, GUEST, false).unwrap();
        let ns = broker.namespace(0);
        assert_eq!(ns.pool().num_free(), 1);
        assert_eq!(ns.pool().allocated(0), None);
        // The slot now answers with the shared address.
        assert_eq!(ns.pool().effective(0), Some(cfg(200)));
    }

    #[test]
    fn capacity_check_applies_to_new_slots_only() {
        let broker = broker_with_pool(0);

        for i in 0..MAX_FRONTENDS {
            register_frontend(&broker, DomainId(100 + i as u32), false)
                .unwrap();
        }

        assert_eq!(
            register_frontend(&broker, DomainId(999), false),
            Err(Error::CapacityExceeded)
        );

        // A domain that already holds a slot may still reconnect.
        register_frontend(&broker, DomainId(100), false).unwrap();
        assert_eq!(broker.namespace(0).active_slot(DomainId(100)), Some(0));
    }

    #[test]
    fn fetch_ip_returns_dedicated_then_shared() {
        let broker = broker_with_pool(1);

        register_frontend(&broker, GUEST, true).unwrap();
        let mut xfer = TestXfer::empty();
        broker
            .service_op(ServiceCmd::FetchIp as u32, 0, GUEST, &mut xfer)
            .unwrap();
        assert_eq!(xfer.value::<IpCfg>(), cfg(1));

        let other = DomainId(21);
        register_frontend(&broker, other, false).unwrap();
        let mut xfer = TestXfer::empty();
        broker
            .service_op(ServiceCmd::FetchIp as u32, 0, other, &mut xfer)
            .unwrap();
        assert_eq!(xfer.value::<IpCfg>(), cfg(200));

        let mut xfer = TestXfer::empty();
        assert_eq!(
            broker.service_op(
                ServiceCmd::FetchIp as u32,
                0,
                DomainId(99),
                &mut xfer
            ),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn fetch_frontends_snapshot() {
        let broker = broker_with_pool(0);
        register_frontend(&broker, GUEST, false).unwrap();

        let mut xfer = TestXfer::empty();
        broker
            .service_op(ServiceCmd::FetchFrontends as u32, 0, BACKEND, &mut xfer)
            .unwrap();
        let snap: [FrontendSlotSnapshot; MAX_FRONTENDS] = xfer.value();
        assert_eq!(snap[0].domid, GUEST.0);
        assert_eq!(snap[0].status, u32::from(FrontendStatus::Active));
        assert_eq!(snap[1].status, u32::from(FrontendStatus::Dead));
    }

    #[test]
    fn port_bind_report_fault_releases_port() {
        let broker = broker_with_pool(1);
        register_frontend(&broker, GUEST, true).unwrap();

        let mut xfer = TestXfer::of(&8080u16).fail_write();
        assert_eq!(
            broker.port_bind(0, GUEST, PROTO_TCP, &mut xfer),
            Err(Error::CopyFault)
        );
        assert_eq!(broker.ports().get(Protocol::TCP).owner(8080), None);
    }

    #[test]
    fn port_bind_requires_registration_and_primary_namespace() {
        let broker = broker_with_pool(1);

        let mut xfer = TestXfer::of(&8080u16);
        assert_eq!(
            broker.port_bind(1, GUEST, PROTO_TCP, &mut xfer),
            Err(Error::OutOfRange)
        );

        let mut xfer = TestXfer::of(&8080u16);
        assert_eq!(
            broker.port_bind(0, GUEST, PROTO_TCP, &mut xfer),
            Err(Error::NotFound)
        );

        register_frontend(&broker, GUEST, true).unwrap();
        let mut xfer = TestXfer::of(&8080u16);
        assert_eq!(
            broker.port_bind(0, GUEST, 42, &mut xfer),
            Err(Error::Unsupported)
        );

        let mut xfer = TestXfer::of(&8080u16);
        broker.port_bind(0, GUEST, PROTO_TCP, &mut xfer).unwrap();
        assert_eq!(xfer.value::<u16>(), 8080);
        assert_eq!(
            broker.ports().get(Protocol::TCP).owner(8080),
            Some((GUEST, cfg(1).addr))
        );
    }

    #[test]
    fn backend_reregistration_keeps_frontend_addresses() {
        let broker = broker_with_pool(2);
        register_frontend(&broker, GUEST, true).unwrap();

        let mut xfer = TestXfer::of(&BackendConnect::default());
        broker
            .service_op(ServiceCmd::RegisterBackend as u32, 0, BACKEND, &mut xfer)
            .unwrap();

        // Fresh epoch: the unassigned triple and the shared address
        // are gone, but the frontend keeps what it was given.
        let ns = broker.namespace(0);
        assert_eq!(ns.pool().num_free(), 0);
        assert_eq!(ns.pool().shared(), None);
        assert_eq!(ns.pool().allocated(0), Some(cfg(1)));
        drop(ns);

        let mut xfer = TestXfer::empty();
        broker
            .service_op(ServiceCmd::FetchIp as u32, 0, GUEST, &mut xfer)
            .unwrap();
        assert_eq!(xfer.value::<IpCfg>(), cfg(1));

        // Until the new backend loads a pool, there is nothing for a
        // second dynamic frontend to take.
        assert_eq!(
            register_frontend(&broker, DomainId(21), true),
            Err(Error::AddressExhausted)
        );
    }

    #[test]
    fn ip_pool_load_is_primary_namespace_only() {
        let broker = Broker::new();
        let mut xfer = TestXfer::of(&pool_payload(1));
        assert_eq!(
            broker.service_op(
                ServiceCmd::RegisterIpPool as u32,
                1,
                BACKEND,
                &mut xfer
            ),
            Err(Error::OutOfRange)
        );
        assert_eq!(broker.namespace(1).pool().num_free(), 0);
    }

    #[test]
    fn cleanup_wipes_everything() {
        let broker = broker_with_pool(2);
        register_frontend(&broker, GUEST, true).unwrap();
        let mut xfer = TestXfer::of(&0u16);
        broker.port_bind(0, GUEST, PROTO_TCP, &mut xfer).unwrap();

        let mut xfer = TestXfer::empty();
        broker
            .service_op(ServiceCmd::Cleanup as u32, 0, BACKEND, &mut xfer)
            .unwrap();

        let ns = broker.namespace(0);
        assert_eq!(ns.active_slot(GUEST), None);
        assert_eq!(ns.pool().num_free(), 0);
        assert_eq!(ns.pool().shared(), None);
        drop(ns);
        assert_eq!(broker.next_slot(), 0);
        assert_eq!(broker.ports().get(Protocol::TCP).num_bound(), 0);
    }
}
