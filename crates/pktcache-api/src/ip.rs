// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::cmp::Ordering;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The number of bytes in an IPv4 address.
pub const IPV4_ALEN: usize = 4;

/// The number of bytes in an IPv6 address.
pub const IPV6_ALEN: usize = 16;

/// Check that a prefix length is valid for an address of `alen`
/// bytes.
///
/// A `None` mask means "no mask" and is always accepted for a known
/// address length.
pub fn netmask_check(alen: usize, mask: Option<u8>) -> Result<(), String> {
    let max = match alen {
        IPV4_ALEN => 32,
        IPV6_ALEN => 128,
        _ => return Err(format!("bad address length: {alen}")),
    };

    match mask {
        Some(len) if len > max => {
            Err(format!("bad netmask for {}-byte address: {len}", alen))
        }

        _ => Ok(()),
    }
}

/// The network-order mask byte covering bits `[8 * i, 8 * i + 8)` of a
/// prefix of length `len`.
fn mask_byte(i: usize, len: u8) -> u8 {
    let start = i * 8;
    let len = usize::from(len);
    if len >= start + 8 {
        0xFF
    } else if len <= start {
        0
    } else {
        0xFF << (8 - (len - start))
    }
}

fn apply_mask<const N: usize>(mut bytes: [u8; N], len: u8) -> [u8; N] {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b &= mask_byte(i, len);
    }
    bytes
}

fn or_host<const N: usize>(
    mut bytes: [u8; N],
    len: u8,
    other: &[u8; N],
) -> [u8; N] {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b |= other[i] & !mask_byte(i, len);
    }
    bytes
}

fn mix_words(bytes: &[u8]) -> u32 {
    bytes.chunks_exact(4).fold(0, |acc, w| {
        acc ^ u32::from_be_bytes([w[0], w[1], w[2], w[3]])
    })
}

/// An IPv4 or IPv6 address.
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
pub enum IpAddr {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
}

impl IpAddr {
    /// The length of this address in bytes.
    pub const fn alen(&self) -> usize {
        match self {
            IpAddr::Ip4(_) => IPV4_ALEN,
            IpAddr::Ip6(_) => IPV6_ALEN,
        }
    }

    /// The address in network order.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IpAddr::Ip4(ip4) => &ip4[..],
            IpAddr::Ip6(ip6) => &ip6[..],
        }
    }

    /// Build an address from its network-order bytes, which must be
    /// exactly 4 or 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            IPV4_ALEN => {
                let mut ip4 = [0u8; IPV4_ALEN];
                ip4.copy_from_slice(bytes);
                Some(Self::Ip4(ip4.into()))
            }

            IPV6_ALEN => {
                let mut ip6 = [0u8; IPV6_ALEN];
                ip6.copy_from_slice(bytes);
                Some(Self::Ip6(ip6.into()))
            }

            _ => None,
        }
    }

    /// Return the address with every bit past the first `len` cleared.
    pub fn mask(self, len: u8) -> Self {
        match self {
            IpAddr::Ip4(ip4) => IpAddr::Ip4(ip4.mask(len)),
            IpAddr::Ip6(ip6) => IpAddr::Ip6(ip6.mask(len)),
        }
    }

    /// OR the host part of `other`, as defined by a prefix of length
    /// `len`, into this address. A zero length ORs in all of `other`.
    ///
    /// Addresses of different families are returned unchanged.
    pub fn or_host(self, len: u8, other: &IpAddr) -> Self {
        match (self, other) {
            (IpAddr::Ip4(a), IpAddr::Ip4(b)) => IpAddr::Ip4(a.or_host(len, b)),
            (IpAddr::Ip6(a), IpAddr::Ip6(b)) => IpAddr::Ip6(a.or_host(len, b)),
            _ => self,
        }
    }

    /// Compare two addresses after applying an optional mask to each.
    ///
    /// Addresses of the same family compare bytewise in network
    /// order; IPv4 sorts before IPv6.
    pub fn cmp_masked(
        &self,
        mask: Option<u8>,
        other: &IpAddr,
        other_mask: Option<u8>,
    ) -> Ordering {
        let a = mask.map_or(*self, |len| self.mask(len));
        let b = other_mask.map_or(*other, |len| other.mask(len));
        a.cmp(&b)
    }

    /// XOR every 32-bit word of both addresses into a single value,
    /// for use as a cheap symmetric hash.
    pub fn mix(&self, other: &IpAddr) -> u32 {
        mix_words(self.as_bytes()) ^ mix_words(other.as_bytes())
    }
}

impl From<Ipv4Addr> for IpAddr {
    fn from(ipv4: Ipv4Addr) -> Self {
        IpAddr::Ip4(ipv4)
    }
}

impl From<Ipv6Addr> for IpAddr {
    fn from(ipv6: Ipv6Addr) -> Self {
        IpAddr::Ip6(ipv6)
    }
}

impl From<core::net::IpAddr> for IpAddr {
    fn from(ip: core::net::IpAddr) -> Self {
        match ip {
            core::net::IpAddr::V4(ipv4) => Self::Ip4(ipv4.into()),
            core::net::IpAddr::V6(ipv6) => Self::Ip6(ipv6.into()),
        }
    }
}

impl From<IpAddr> for core::net::IpAddr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::Ip4(ipv4) => Self::V4(ipv4.into()),
            IpAddr::Ip6(ipv6) => Self::V6(ipv6.into()),
        }
    }
}

impl From<IpAddr> for smoltcp::wire::IpAddress {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::Ip4(ipv4) => Self::Ipv4(ipv4.into()),
            IpAddr::Ip6(ipv6) => Self::Ipv6(ipv6.into()),
        }
    }
}

impl Default for IpAddr {
    fn default() -> Self {
        IpAddr::Ip4(Default::default())
    }
}

impl fmt::Display for IpAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpAddr::Ip4(ip4) => write!(f, "{ip4}"),
            IpAddr::Ip6(ip6) => write!(f, "{ip6}"),
        }
    }
}

impl FromStr for IpAddr {
    type Err = String;
    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        if let Ok(ipv4) = val.parse::<Ipv4Addr>() {
            Ok(ipv4.into())
        } else {
            val.parse::<Ipv6Addr>()
                .map(IpAddr::Ip6)
                .map_err(|_| String::from("Invalid IP address"))
        }
    }
}

/// An IPv4 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(C)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 4] };
    pub const LOCAL_BCAST: Self = Self { inner: [255; 4] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }

    /// Return the address after applying the network mask. Lengths
    /// of 32 or more leave the address unchanged.
    pub fn mask(self, len: u8) -> Self {
        Self { inner: apply_mask(self.inner, len) }
    }

    /// OR the host part of `other` into this address.
    pub fn or_host(self, len: u8, other: &Self) -> Self {
        Self { inner: or_host(self.inner, len, &other.inner) }
    }
}

impl From<core::net::Ipv4Addr> for Ipv4Addr {
    fn from(ip4: core::net::Ipv4Addr) -> Self {
        Self { inner: ip4.octets() }
    }
}

impl From<Ipv4Addr> for core::net::Ipv4Addr {
    fn from(ip4: Ipv4Addr) -> Self {
        Self::from(ip4.inner)
    }
}

impl From<smoltcp::wire::Ipv4Address> for Ipv4Addr {
    fn from(ip: smoltcp::wire::Ipv4Address) -> Self {
        Self { inner: ip.0 }
    }
}

impl From<Ipv4Addr> for smoltcp::wire::Ipv4Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip.inner)
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.bytes())
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        val.parse::<core::net::Ipv4Addr>()
            .map(Self::from)
            .map_err(|_| format!("malformed ip: {val}"))
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

impl AsRef<[u8]> for Ipv4Addr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for Ipv4Addr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// An IPv6 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(C)]
pub struct Ipv6Addr {
    inner: [u8; 16],
}

impl Ipv6Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 16] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 16] {
        self.inner
    }

    /// Build an address from eight host-order 16-bit segments.
    pub const fn from_const(words: [u16; 8]) -> Self {
        let mut inner = [0u8; 16];
        let mut i = 0;
        while i < 8 {
            let [hi, lo] = words[i].to_be_bytes();
            inner[i * 2] = hi;
            inner[i * 2 + 1] = lo;
            i += 1;
        }
        Self { inner }
    }

    /// The eight 16-bit segments of the address, in host order.
    pub fn segments(&self) -> [u16; 8] {
        let mut words = [0u16; 8];
        for (i, w) in words.iter_mut().enumerate() {
            *w = u16::from_be_bytes([self.inner[i * 2], self.inner[i * 2 + 1]]);
        }
        words
    }

    /// Return the address after applying the network mask. Lengths
    /// of 128 or more leave the address unchanged.
    pub fn mask(self, len: u8) -> Self {
        Self { inner: apply_mask(self.inner, len) }
    }

    /// OR the host part of `other` into this address.
    pub fn or_host(self, len: u8, other: &Self) -> Self {
        Self { inner: or_host(self.inner, len, &other.inner) }
    }
}

impl fmt::Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", core::net::Ipv6Addr::from(self.inner))
    }
}

impl Debug for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv6Addr {{ inner: {self} }}")
    }
}

impl From<core::net::Ipv6Addr> for Ipv6Addr {
    fn from(ip6: core::net::Ipv6Addr) -> Self {
        Self { inner: ip6.octets() }
    }
}

impl From<Ipv6Addr> for core::net::Ipv6Addr {
    fn from(ip6: Ipv6Addr) -> Self {
        Self::from(ip6.inner)
    }
}

impl From<smoltcp::wire::Ipv6Address> for Ipv6Addr {
    fn from(ip: smoltcp::wire::Ipv6Address) -> Self {
        Self { inner: ip.0 }
    }
}

impl From<Ipv6Addr> for smoltcp::wire::Ipv6Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self(ip.inner)
    }
}

impl From<[u8; 16]> for Ipv6Addr {
    fn from(bytes: [u8; 16]) -> Ipv6Addr {
        Ipv6Addr { inner: bytes }
    }
}

impl From<[u16; 8]> for Ipv6Addr {
    fn from(words: [u16; 8]) -> Ipv6Addr {
        Self::from_const(words)
    }
}

impl From<Ipv6Addr> for u128 {
    fn from(ip: Ipv6Addr) -> u128 {
        u128::from_be_bytes(ip.bytes())
    }
}

impl From<u128> for Ipv6Addr {
    fn from(i: u128) -> Ipv6Addr {
        Self::from(i.to_be_bytes())
    }
}

impl FromStr for Ipv6Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        val.parse::<core::net::Ipv6Addr>()
            .map(Self::from)
            .map_err(|_| String::from("Invalid IPv6 address"))
    }
}

impl AsRef<[u8]> for Ipv6Addr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for Ipv6Addr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
