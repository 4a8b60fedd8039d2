// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection descriptors exchanged between guests and the broker.
//!
//! The broker never interprets the ring/event-channel contents of
//! these records; it stores them, stamps them with the authoritative
//! caller identity, and hands them back out on query.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// The hypervisor-assigned identity of a guest domain.
///
/// This is the only caller identity the broker trusts; it is supplied
/// by the domain subsystem, never by the guest payload.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct DomainId(pub u32);

impl Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dom{}", self.0)
    }
}

/// The backend's connection descriptor: the shared rings and event
/// channel a frontend needs in order to attach to the network
/// service. Opaque to the broker.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
    Serialize,
)]
#[repr(C)]
pub struct BackendConnect {
    pub tx_ring_ref: u32,
    pub rx_ring_ref: u32,
    pub event_channel: u32,
    pub features: u32,
}

/// A frontend's connection descriptor. Opaque to the broker, copied
/// verbatim into the frontend's slot on registration.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
    Serialize,
)]
#[repr(C)]
pub struct FrontendConnect {
    pub tx_ring_ref: u32,
    pub rx_ring_ref: u32,
    pub event_channel: u32,
    pub features: u32,
}

/// The lifecycle status of a frontend slot.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum FrontendStatus {
    Dead = 0,
    Active = 1,
}

pub const FRONTEND_DEAD: u32 = FrontendStatus::Dead as u32;
pub const FRONTEND_ACTIVE: u32 = FrontendStatus::Active as u32;

impl From<FrontendStatus> for u32 {
    fn from(status: FrontendStatus) -> u32 {
        status as u32
    }
}

/// One entry of the snapshot handed back by `FetchFrontends` and
/// `Reconnect`: the stored descriptor plus the slot's owner and
/// status. The owner field is meaningful only when the status is
/// [`FRONTEND_ACTIVE`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
    Serialize,
)]
#[repr(C)]
pub struct FrontendSlotSnapshot {
    pub connect: FrontendConnect,
    pub domid: u32,
    pub status: u32,
}
