// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NetBroker: the in-hypervisor broker for shared network identity.
//!
//! Guest domains share one upstream network identity, mediated by a
//! trusted backend domain. This crate is the bookkeeping core that
//! keeps them honest: a per-namespace registry of backend and
//! frontend registrations, a bounded pool of dedicated IP addresses,
//! and a pair of lock-free TCP/UDP port tables.
//!
//! The hypercall transport (guest buffer marshalling) and the domain
//! scheduler are collaborators, reached only through the
//! [`engine::service::GuestXfer`] trait and the explicit caller
//! identity passed into every operation.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub use netbroker_api as api;

pub mod ddi;
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
