// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// An IPv4 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    FromBytes,
    Hash,
    Immutable,
    IntoBytes,
    KnownLayout,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Unaligned,
)]
#[repr(C)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 4] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.bytes())
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let octets: Vec<u8> = val
            .split('.')
            .map(|s| s.parse().map_err(|e| format!("{e}")))
            .collect::<result::Result<Vec<u8>, _>>()?;

        if octets.len() != 4 {
            return Err(format!("malformed ip: {val}"));
        }

        Ok(Self { inner: [octets[0], octets[1], octets[2], octets[3]] })
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3],
        )
    }
}

// There's no reason to view an Ipv4Addr as its raw array, so just
// present it in a human-friendly manner.
impl Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv4Addr {{ inner: {self} }}")
    }
}

/// One assignable address: the IP itself, its netmask, and the MTU
/// the frontend should configure. This is the record the backend
/// loads the pool with and the record a frontend reads back with
/// `FetchIp`.
///
/// On the wire an all-zeros address marks an empty pool slot; inside
/// the broker empty slots are `None` and this sentinel never appears.
#[derive(
    Clone,
    Copy,
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
pub struct IpCfg {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: u32,
}

impl IpCfg {
    pub const fn new(addr: Ipv4Addr, netmask: Ipv4Addr, mtu: u32) -> Self {
        Self { addr, netmask, mtu }
    }

    /// Does this record mark an empty pool slot?
    pub fn is_empty(&self) -> bool {
        self.addr == Ipv4Addr::ANY_ADDR
    }
}

impl Debug for IpCfg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{} mtu {}", self.addr, self.netmask, self.mtu)
    }
}

pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;

/// A transport protocol with its own port number space.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum Protocol {
    TCP = PROTO_TCP,
    UDP = PROTO_UDP,
}

impl TryFrom<u8> for Protocol {
    type Error = ();

    fn try_from(proto: u8) -> Result<Self, Self::Error> {
        match proto {
            PROTO_TCP => Ok(Self::TCP),
            PROTO_UDP => Ok(Self::UDP),
            _ => Err(()),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
        }
    }
}
