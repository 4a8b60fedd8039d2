// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The API shared between the in-hypervisor network broker and its
//! callers: command codes, the error taxonomy, and the fixed-layout
//! records that cross the guest/hypervisor boundary.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod cmd;
pub mod connect;
pub mod ip;

pub use cmd::*;
pub use connect::*;
pub use ip::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment. Currently we attach no
/// semantic meaning to the number other than as a means to verify
/// that a control-plane caller and the hypervisor are compiled for
/// the same API.
pub const API_VERSION: u64 = 3;

/// The number of independent registry namespaces ("sysids") the
/// broker serves. Namespace 0 is the primary namespace: it is the
/// only one that carries an IP pool and the only one port binds may
/// target.
pub const NUM_NAMESPACES: usize = 3;

/// The maximum number of concurrently registered frontends. A
/// frontend's slot index is stable across reconnects and indexes the
/// IP allocation table.
pub const MAX_FRONTENDS: usize = 8;

/// The number of dedicated addresses the IP pool can hold. The
/// `REGISTER_IP_POOL` payload carries one additional trailing entry:
/// the shared address.
pub const IP_POOL_SIZE: usize = 8;

/// The first port of the ephemeral range scanned when a bind requests
/// port 0. The range runs through 65535 inclusive.
pub const EPHEMERAL_PORT_FIRST: u16 = 49152;
