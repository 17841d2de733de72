// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet-header cache.
//!
//! A [`PacketCache`] records where a packet's network and transport
//! headers live so that later matching and rewriting need not parse
//! them again. It holds offsets rather than slices: every cached
//! reference is stamped with the buffer generation it was taken
//! against, and is only dereferenced while that generation is still
//! current.
//!
//! # Relocation
//!
//! Caching a header means asking the buffer to make it contiguous,
//! which may relocate packet data. [`PacketCache::cache_all()`]
//! restarts from the top whenever that happens after a reference was
//! recorded, so that on return every reference is current. Code which
//! later asks the buffer for more contiguous bytes (the TCP option
//! scanner, for example) must call [`PacketCache::recache()`]
//! afterwards if the buffer reports a relocation; see
//! [`PacketCache::ensure_fresh()`].

use super::buf::PacketBuf;
use super::cache_fmterr_probe;
use super::cache_relocated_probe;
use super::dbg;
use super::headers::EtherHdrRaw;
use super::headers::IPV4_HDR_VER_SHIFT;
use super::headers::IPV4_VERSION;
use super::headers::IPV6_VERSION;
use super::headers::IcmpHdrRaw;
use super::headers::Ipv4HdrRaw;
use super::headers::Ipv6ExtRaw;
use super::headers::Ipv6FragRaw;
use super::headers::Ipv6HdrRaw;
use super::headers::RawHeader;
use super::headers::TcpHdrRaw;
use super::headers::UdpHdrRaw;
use super::recache_probe;
use crate::api::FlowKey;
use crate::api::IPV4_ALEN;
use crate::api::IPV6_ALEN;
use crate::api::IpAddr;
use crate::api::Which;
use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;
use smoltcp::wire::IpProtocol;

/// The ICMP header bytes guaranteed to be cached: enough to reach the
/// Echo identifier.
pub const ICMP_MINLEN: usize = 8;

bitflags! {
    /// What has been found in, and cached from, a packet.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct CacheFlags: u32 {
        const IP4 = 1 << 0;
        const IP6 = 1 << 1;
        /// The datagram is a fragment; its transport header was not
        /// looked at.
        const IPFRAG = 1 << 2;
        const LAYER4 = 1 << 3;
        const TCP = 1 << 4;
        const UDP = 1 << 5;
        /// ICMPv4 or ICMPv6.
        const ICMP = 1 << 6;
        const LAYER2 = 1 << 7;
        /// The packet is malformed or truncated.
        const FMTERR = 1 << 8;

        const IP46 = Self::IP4.bits() | Self::IP6.bits();
    }
}

/// A reference to a contiguous region of the packet buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HdrRef {
    off: usize,
    len: usize,
    generation: u64,
}

impl HdrRef {
    pub(super) const fn new(off: usize, len: usize, generation: u64) -> Self {
        Self { off, len, generation }
    }

    /// The absolute offset of the region.
    pub fn off(&self) -> usize {
        self.off
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// The buffer generation this reference was taken against.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The cached network header. The reference covers the whole IPv4
/// header, options included, or the fixed IPv6 header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum L3Hdr {
    V4(HdrRef),
    V6(HdrRef),
}

impl L3Hdr {
    pub fn hdr_ref(&self) -> &HdrRef {
        match self {
            Self::V4(r) | Self::V6(r) => r,
        }
    }
}

/// The cached transport header. The reference covers the fixed part
/// of the header only; TCP options are fetched on demand.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum L4Hdr {
    #[default]
    None,
    Tcp(HdrRef),
    Udp(HdrRef),
    Icmp4(HdrRef),
    Icmp6(HdrRef),
}

impl L4Hdr {
    pub fn hdr_ref(&self) -> Option<&HdrRef> {
        match self {
            Self::None => None,
            Self::Tcp(r) | Self::Udp(r) | Self::Icmp4(r) | Self::Icmp6(r) => {
                Some(r)
            }
        }
    }
}

/// The header cache for a single packet.
///
/// The cache borrows the packet buffer for its whole lifetime; all
/// reads and writes of cached headers go through it.
pub struct PacketCache<'a, B: PacketBuf> {
    pub(super) nbuf: &'a mut B,
    info: CacheFlags,
    /// Where the network header starts.
    l3_off: usize,
    hlen: usize,
    alen: usize,
    proto: u8,
    ips: [Option<HdrRef>; 2],
    l3: Option<L3Hdr>,
    l4: L4Hdr,
    ether: Option<EtherHdrRaw>,
}

impl<'a, B: PacketBuf> PacketCache<'a, B> {
    /// Create an empty cache over `nbuf`. The network header is
    /// expected at the buffer's current offset.
    pub fn new(nbuf: &'a mut B) -> Self {
        let l3_off = nbuf.offset();
        Self {
            nbuf,
            info: CacheFlags::empty(),
            l3_off,
            hlen: 0,
            alen: 0,
            proto: 0,
            ips: [None; 2],
            l3: None,
            l4: L4Hdr::None,
            ether: None,
        }
    }

    pub fn info(&self) -> CacheFlags {
        self.info
    }

    /// Whether every flag in `flags` is set.
    pub fn is_cached(&self, flags: CacheFlags) -> bool {
        self.info.contains(flags)
    }

    /// The length of the network header, IPv6 extension headers
    /// included. For a fragment or malformed packet this is as far as
    /// parsing got.
    pub fn hlen(&self) -> usize {
        self.hlen
    }

    /// The address length: 4 for IPv4, 16 for IPv6.
    pub fn alen(&self) -> usize {
        self.alen
    }

    /// The transport protocol: the final next-header value for IPv6.
    pub fn proto(&self) -> IpProtocol {
        IpProtocol::from(self.proto)
    }

    pub fn l3(&self) -> Option<&L3Hdr> {
        self.l3.as_ref()
    }

    pub fn l4(&self) -> &L4Hdr {
        &self.l4
    }

    pub fn l3_off(&self) -> usize {
        self.l3_off
    }

    /// Where the transport header starts, if the network header is
    /// cached.
    pub fn l4_off(&self) -> Option<usize> {
        self.l3.map(|_| self.l3_off + self.hlen)
    }

    pub fn nbuf(&self) -> &B {
        self.nbuf
    }

    /// Direct access to the buffer, bypassing the cache.
    #[cfg(any(feature = "test-help", test))]
    pub fn nbuf_mut(&mut self) -> &mut B {
        self.nbuf
    }

    /// The link-layer header copied by [`Self::cache_ether()`].
    pub fn ether(&self) -> Option<&EtherHdrRaw> {
        self.ether.as_ref()
    }

    /// A reference to the source or destination address.
    pub fn addr_ref(&self, which: Which) -> Option<&HdrRef> {
        self.ips[which.idx()].as_ref()
    }

    /// The bytes of the source or destination address.
    pub fn addr(&self, which: Which) -> Option<&[u8]> {
        let r = self.ips[which.idx()]?;
        self.bytes(&r)
    }

    pub fn ip(&self, which: Which) -> Option<IpAddr> {
        self.addr(which).and_then(IpAddr::from_slice)
    }

    pub fn ipv4_hdr(&self) -> Option<&Ipv4HdrRaw> {
        match self.l3 {
            Some(L3Hdr::V4(r)) => self.hdr(&r),
            _ => None,
        }
    }

    pub fn ipv6_hdr(&self) -> Option<&Ipv6HdrRaw> {
        match self.l3 {
            Some(L3Hdr::V6(r)) => self.hdr(&r),
            _ => None,
        }
    }

    pub fn tcp_hdr(&self) -> Option<&TcpHdrRaw> {
        match self.l4 {
            L4Hdr::Tcp(r) => self.hdr(&r),
            _ => None,
        }
    }

    pub fn udp_hdr(&self) -> Option<&UdpHdrRaw> {
        match self.l4 {
            L4Hdr::Udp(r) => self.hdr(&r),
            _ => None,
        }
    }

    /// The ICMPv4 or ICMPv6 header.
    pub fn icmp_hdr(&self) -> Option<&IcmpHdrRaw> {
        match self.l4 {
            L4Hdr::Icmp4(r) | L4Hdr::Icmp6(r) => self.hdr(&r),
            _ => None,
        }
    }

    /// The TCP or UDP port.
    pub fn port(&self, which: Which) -> Option<u16> {
        match self.l4 {
            L4Hdr::Tcp(_) => self.tcp_hdr().map(|tcp| tcp.port(which)),
            L4Hdr::Udp(_) => self.udp_hdr().map(|udp| udp.port(which)),
            _ => None,
        }
    }

    /// Summarize the packet's addressing, if its network header is
    /// cached.
    pub fn flow_key(&self) -> Option<FlowKey> {
        let src = self.ip(Which::Src)?;
        let dst = self.ip(Which::Dst)?;
        let ports = [
            self.port(Which::Src).unwrap_or(0),
            self.port(Which::Dst).unwrap_or(0),
        ];
        Some(FlowKey { proto: self.proto, src, dst, ports })
    }

    /// Whether any cached reference predates the buffer's current
    /// generation.
    pub fn is_stale(&self) -> bool {
        let current = self.nbuf.generation();
        self.l3
            .iter()
            .map(L3Hdr::hdr_ref)
            .chain(self.l4.hdr_ref())
            .chain(self.ips.iter().flatten())
            .any(|r| r.generation != current)
    }

    pub(super) fn bytes(&self, r: &HdrRef) -> Option<&[u8]> {
        debug_assert_eq!(
            r.generation,
            self.nbuf.generation(),
            "stale header reference"
        );
        self.nbuf.slice(r.off, r.len)
    }

    pub(super) fn bytes_mut(&mut self, r: &HdrRef) -> Option<&mut [u8]> {
        debug_assert_eq!(
            r.generation,
            self.nbuf.generation(),
            "stale header reference"
        );
        self.nbuf.slice_mut(r.off, r.len)
    }

    pub(super) fn hdr<H: RawHeader>(&self, r: &HdrRef) -> Option<&H> {
        self.bytes(r).and_then(H::from_prefix)
    }

    pub(super) fn hdr_mut<H: RawHeader>(
        &mut self,
        r: &HdrRef,
    ) -> Option<&mut H> {
        self.bytes_mut(r).and_then(H::from_prefix_mut)
    }

    fn mint(&self, off: usize, len: usize) -> HdrRef {
        HdrRef::new(off, len, self.nbuf.generation())
    }

    /// Make the header at `off` contiguous and return a copy of it.
    fn fetch<H: RawHeader + Clone>(&mut self, off: usize) -> Option<H> {
        self.nbuf
            .advance(off, H::SIZE)
            .and_then(|bytes| H::from_prefix(bytes))
            .cloned()
    }

    /// Copy the link-layer header from the start of the buffer. The
    /// network header is then expected right after it.
    ///
    /// Must be called before the network header is cached.
    pub fn cache_ether(&mut self) -> CacheFlags {
        debug_assert!(
            !self.info.intersects(CacheFlags::IP46),
            "link layer cached after network layer"
        );

        let Some(ether) = self.fetch::<EtherHdrRaw>(0) else {
            self.info |= CacheFlags::FMTERR;
            return CacheFlags::FMTERR;
        };

        // A copy is kept, so a relocation here invalidates nothing.
        self.nbuf.clear_relocated();
        self.l3_off = EtherHdrRaw::SIZE;
        let _ = self.nbuf.advance(self.l3_off, 0);
        self.ether = Some(ether);
        self.info |= CacheFlags::LAYER2;
        CacheFlags::LAYER2
    }

    /// Cache the IPv4 or IPv6 header at the buffer's current offset,
    /// walking any IPv6 extension headers.
    ///
    /// Returns an empty set for anything other than IPv4 or IPv6. An
    /// IPv6 packet must carry at least the first two bytes of the
    /// header ending its chain.
    pub fn cache_ip(&mut self) -> CacheFlags {
        let Some(&first) = self.nbuf.dataptr().first() else {
            return CacheFlags::empty();
        };

        let flags = match first >> IPV4_HDR_VER_SHIFT {
            IPV4_VERSION => self.cache_ip4(),
            IPV6_VERSION => self.cache_ip6(),
            _ => CacheFlags::empty(),
        };

        self.info |= flags;
        flags
    }

    fn cache_ip4(&mut self) -> CacheFlags {
        let off = self.nbuf.offset();
        let Some(ip) = self.fetch::<Ipv4HdrRaw>(off) else {
            return CacheFlags::FMTERR;
        };

        // Retrieve the complete header, options included.
        let hlen = ip.hdr_len();
        if hlen < Ipv4HdrRaw::SIZE || self.nbuf.advance(off, hlen).is_none() {
            return CacheFlags::FMTERR;
        }

        let mut flags = CacheFlags::IP4;
        if ip.is_fragment() {
            flags |= CacheFlags::IPFRAG;
        }

        self.l3_off = off;
        self.hlen = hlen;
        self.alen = IPV4_ALEN;
        self.proto = ip.proto;
        self.l3 = Some(L3Hdr::V4(self.mint(off, hlen)));
        self.ips = [
            Some(self.mint(off + Ipv4HdrRaw::SRC_OFFSET, IPV4_ALEN)),
            Some(self.mint(off + Ipv4HdrRaw::DST_OFFSET, IPV4_ALEN)),
        ];
        flags
    }

    fn cache_ip6(&mut self) -> CacheFlags {
        let off = self.nbuf.offset();
        let Some(ip6) = self.fetch::<Ipv6HdrRaw>(off) else {
            return CacheFlags::FMTERR;
        };

        // Jumbograms are not handled.
        let mut flags = CacheFlags::IP6;
        let mut proto = ip6.next_hdr;
        let mut hlen = Ipv6HdrRaw::SIZE;
        let mut frag_seen = false;
        self.hlen = hlen;

        // Every step moves at least 8 bytes further into the packet,
        // and a fetch past its end fails, so the walk terminates.
        loop {
            // The header that ends the chain must be there too, even
            // when it is not one we go on to cache.
            if self.nbuf.advance(off + hlen, Ipv6ExtRaw::SIZE).is_none() {
                return CacheFlags::FMTERR;
            }

            let step = match IpProtocol::from(proto) {
                IpProtocol::HopByHop
                | IpProtocol::Ipv6Opts
                | IpProtocol::Ipv6Route => self
                    .fetch::<Ipv6ExtRaw>(off + hlen)
                    .map(|ext| (ext.next_hdr, ext.hdr_len())),

                IpProtocol::Ipv6Frag => {
                    if frag_seen {
                        return CacheFlags::FMTERR;
                    }
                    frag_seen = true;

                    match self.fetch::<Ipv6FragRaw>(off + hlen) {
                        // RFC 6946: skip atomic fragments.
                        Some(frag) if frag.is_atomic() => {
                            Some((frag.next_hdr, Ipv6FragRaw::SIZE))
                        }
                        Some(_) => {
                            flags |= CacheFlags::IPFRAG;
                            break;
                        }
                        None => None,
                    }
                }

                _ => break,
            };

            let Some((next, len)) = step else {
                return CacheFlags::FMTERR;
            };
            proto = next;
            hlen += len;
            self.hlen = hlen;
        }

        // The walk moved the cursor. Put it back on the fixed header,
        // which stays contiguous even if the walk relocated data.
        let _ = self.nbuf.advance(off, 0);

        self.l3_off = off;
        self.alen = IPV6_ALEN;
        self.proto = proto;
        self.l3 = Some(L3Hdr::V6(self.mint(off, Ipv6HdrRaw::SIZE)));
        self.ips = [
            Some(self.mint(off + Ipv6HdrRaw::SRC_OFFSET, IPV6_ALEN)),
            Some(self.mint(off + Ipv6HdrRaw::DST_OFFSET, IPV6_ALEN)),
        ];
        flags
    }

    /// Cache the transport header following a network header already
    /// cached by [`Self::cache_ip()`].
    ///
    /// Fragments and packets without a network header yield an empty
    /// set, as do protocols other than TCP, UDP, ICMP and ICMPv6.
    pub fn cache_l4(&mut self) -> CacheFlags {
        if !self.info.intersects(CacheFlags::IP46)
            || self.info.contains(CacheFlags::IPFRAG)
        {
            return CacheFlags::empty();
        }

        let flags = self.cache_ulp();
        self.info |= flags;
        flags
    }

    fn cache_ulp(&mut self) -> CacheFlags {
        let off = self.l3_off + self.hlen;

        let (l4, flags) = match IpProtocol::from(self.proto) {
            IpProtocol::Tcp => match self.fetch::<TcpHdrRaw>(off) {
                Some(tcp) if tcp.hdr_len() >= TcpHdrRaw::SIZE => (
                    L4Hdr::Tcp(self.mint(off, TcpHdrRaw::SIZE)),
                    CacheFlags::TCP,
                ),
                _ => return CacheFlags::FMTERR,
            },

            IpProtocol::Udp => match self.fetch::<UdpHdrRaw>(off) {
                Some(_) => (
                    L4Hdr::Udp(self.mint(off, UdpHdrRaw::SIZE)),
                    CacheFlags::UDP,
                ),
                None => return CacheFlags::FMTERR,
            },

            IpProtocol::Icmp => match self.nbuf.advance(off, ICMP_MINLEN) {
                Some(_) => (
                    L4Hdr::Icmp4(self.mint(off, ICMP_MINLEN)),
                    CacheFlags::ICMP,
                ),
                None => return CacheFlags::FMTERR,
            },

            IpProtocol::Icmpv6 => match self.fetch::<IcmpHdrRaw>(off) {
                Some(_) => (
                    L4Hdr::Icmp6(self.mint(off, IcmpHdrRaw::SIZE)),
                    CacheFlags::ICMP,
                ),
                None => return CacheFlags::FMTERR,
            },

            _ => return CacheFlags::empty(),
        };

        self.l4 = l4;
        flags | CacheFlags::LAYER4
    }

    fn clear_layers(&mut self) {
        self.l3 = None;
        self.l4 = L4Hdr::None;
        self.ips = [None; 2];
    }

    /// Cache the network header at the start of the packet (or after
    /// the link-layer header) and, unless the packet is a fragment,
    /// the transport header.
    ///
    /// On return every cached reference is current with respect to
    /// the buffer. A malformed packet yields [`CacheFlags::FMTERR`]
    /// alone, and nothing is left cached.
    pub fn cache_all(&mut self) -> CacheFlags {
        let mut attempt = 0;

        loop {
            self.nbuf.clear_relocated();
            self.info &= CacheFlags::LAYER2;
            self.clear_layers();
            if self.nbuf.advance(self.l3_off, 0).is_none() {
                return self.finish(CacheFlags::FMTERR);
            }

            let mut flags = self.cache_ip();
            if !flags.intersects(CacheFlags::IP46)
                || flags.intersects(CacheFlags::IPFRAG | CacheFlags::FMTERR)
            {
                return self.finish(flags);
            }

            let l4flags = self.cache_ulp();
            if l4flags.contains(CacheFlags::FMTERR) {
                return self.finish(CacheFlags::FMTERR);
            }

            // Making the transport header contiguous moved data out
            // from under the network header references: start over.
            if self.nbuf.was_relocated() && self.is_stale() {
                attempt += 1;
                dbg!("cache_all: buffer relocated, attempt {}", attempt);
                cache_relocated_probe(attempt);
                continue;
            }

            flags |= l4flags;
            return self.finish(flags);
        }
    }

    fn finish(&mut self, flags: CacheFlags) -> CacheFlags {
        self.nbuf.clear_relocated();
        let _ = self.nbuf.advance(self.l3_off, 0);

        if flags.contains(CacheFlags::FMTERR) {
            self.clear_layers();
            dbg!(
                "cache_all: malformed packet: hlen {} proto {}",
                self.hlen,
                self.proto
            );
            cache_fmterr_probe(self.info, self.hlen, self.proto);
        }

        self.info = (self.info & CacheFlags::LAYER2) | flags;
        flags
    }

    /// Rebuild the cache from scratch after the buffer relocated its
    /// data.
    ///
    /// A packet that was well formed before cannot lose a layer by
    /// being recached: the bytes have moved, not changed.
    pub fn recache(&mut self) {
        let mflags = self.info & (CacheFlags::IP46 | CacheFlags::LAYER4);
        self.nbuf.reset();
        let flags = self.cache_all();

        debug_assert!(
            flags.contains(mflags),
            "recache lost layers: {mflags:?} -> {flags:?}"
        );
        debug_assert!(!self.nbuf.was_relocated());
        recache_probe(self.nbuf.generation(), flags);
    }

    /// Recache if the buffer relocated data since the cache was built.
    /// Returns whether it did.
    pub fn ensure_fresh(&mut self) -> bool {
        if self.nbuf.was_relocated() || self.is_stale() {
            self.recache();
            return true;
        }
        false
    }

    /// Run `op`, recaching and running it again for as long as it
    /// leaves the buffer relocated.
    ///
    /// `op` must be safe to repeat: it may only have ensured
    /// contiguity and read, never written, before the relocation.
    pub fn with_fresh<T>(&mut self, mut op: impl FnMut(&mut Self) -> T) -> T {
        loop {
            let res = op(self);
            if !self.nbuf.was_relocated() {
                return res;
            }
            self.recache();
        }
    }
}
