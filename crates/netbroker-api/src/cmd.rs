// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub type c_int = i32;

pub const EPERM: c_int = 1;
pub const ENOENT: c_int = 2;
pub const EAGAIN: c_int = 11;
pub const EFAULT: c_int = 14;
pub const EINVAL: c_int = 22;
pub const ENFILE: c_int = 23;
pub const ENOTSUP: c_int = 48;
pub const EADDRINUSE: c_int = 125;
pub const EADDRNOTAVAIL: c_int = 126;

/// A registry service operation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum ServiceCmd {
    Cleanup = 0,                 // full reset of the service
    RegisterBackend = 1,         // register the backend for a namespace
    RegisterIpPool = 2,          // bulk-replace the IP pool contents
    UnregisterBackend = 3,       // unregister the namespace's backend
    RegisterFrontend = 4,        // register a frontend (shared address)
    RegisterFrontendDynamic = 5, // register a frontend (pool address)
    FetchIp = 6,                 // fetch the caller's effective address
    QueryBackend = 7,            // fetch the backend record
    FetchFrontends = 8,          // fetch the frontend slot array
    Reconnect = 9,               // alias of FetchFrontends
}

impl TryFrom<u32> for ServiceCmd {
    type Error = ();

    fn try_from(num: u32) -> Result<Self, Self::Error> {
        match num {
            0 => Ok(Self::Cleanup),
            1 => Ok(Self::RegisterBackend),
            2 => Ok(Self::RegisterIpPool),
            3 => Ok(Self::UnregisterBackend),
            4 => Ok(Self::RegisterFrontend),
            5 => Ok(Self::RegisterFrontendDynamic),
            6 => Ok(Self::FetchIp),
            7 => Ok(Self::QueryBackend),
            8 => Ok(Self::FetchFrontends),
            9 => Ok(Self::Reconnect),
            _ => Err(()),
        }
    }
}

/// The ways a broker operation can fail. Every error is surfaced
/// synchronously to the calling guest; none are fatal to the broker
/// itself.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Error {
    /// The namespace id does not name a registry.
    OutOfRange,

    /// A guest memory transfer failed. Transfers are all-or-nothing;
    /// any resource provisionally reserved before the fault has been
    /// released again.
    CopyFault,

    /// The namespace has no registered backend.
    NotRegistered,

    /// The caller is not the domain that registered the backend.
    PermissionDenied,

    /// The frontend slot table is full.
    CapacityExceeded,

    /// No dedicated IP (or no ephemeral port) remains.
    AddressExhausted,

    /// The explicitly requested port is owned by another domain.
    AddressInUse,

    /// The caller has no active frontend registration.
    NotFound,

    /// Unknown operation code or transport protocol.
    Unsupported,
}

impl Error {
    /// Convert to an errno value for the hypercall ABI.
    pub fn to_errno(self) -> c_int {
        match self {
            Self::OutOfRange => EINVAL,
            Self::CopyFault => EFAULT,
            Self::NotRegistered => EAGAIN,
            Self::PermissionDenied => EPERM,
            Self::CapacityExceeded => ENFILE,
            Self::AddressExhausted => EADDRNOTAVAIL,
            Self::AddressInUse => EADDRINUSE,
            Self::NotFound => ENOENT,
            Self::Unsupported => ENOTSUP,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Self::OutOfRange => "namespace id out of range",
            Self::CopyFault => "guest memory transfer failed",
            Self::NotRegistered => "no backend registered",
            Self::PermissionDenied => "caller does not own the backend",
            Self::CapacityExceeded => "frontend slot table full",
            Self::AddressExhausted => "no free address",
            Self::AddressInUse => "port owned by another domain",
            Self::NotFound => "no active registration for caller",
            Self::Unsupported => "unknown operation or protocol",
        };

        write!(f, "{}", msg)
    }
}
