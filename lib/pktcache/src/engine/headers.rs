// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Raw, on-the-wire header layouts.
//!
//! Each of these is a zerocopy view over network-order bytes. They
//! are unaligned so that they can be laid over any offset in a
//! packet segment.

use pktcache_api::Which;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_VERSION: u8 = 4;
pub const IPV6_VERSION: u8 = 6;

/// Reserved fragment flag.
pub const IP_RF: u16 = 0x8000;
/// Don't fragment.
pub const IP_DF: u16 = 0x4000;

pub const IP6F_OFF_MASK: u16 = 0xFFF8;
pub const IP6F_MORE_FRAG: u16 = 0x0001;

pub const ETHER_ADDR_LEN: usize = 6;

/// A header type which may be laid over a byte slice.
pub trait RawHeader:
    FromBytes + IntoBytes + Immutable + KnownLayout + Unaligned + Sized
{
    const SIZE: usize = core::mem::size_of::<Self>();

    /// View the start of `src` as this header.
    #[inline]
    fn from_prefix(src: &[u8]) -> Option<&Self> {
        Self::ref_from_prefix(src).ok().map(|(hdr, _)| hdr)
    }

    /// View the start of `src` as this header, mutably.
    #[inline]
    fn from_prefix_mut(src: &mut [u8]) -> Option<&mut Self> {
        Self::mut_from_prefix(src).ok().map(|(hdr, _)| hdr)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct EtherHdrRaw {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub ether_type: [u8; 2],
}

impl RawHeader for EtherHdrRaw {}

impl EtherHdrRaw {
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

/// Note: For now we keep this unaligned to be safe.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl RawHeader for Ipv4HdrRaw {}

impl Ipv4HdrRaw {
    pub const SRC_OFFSET: usize = 12;
    pub const DST_OFFSET: usize = 16;

    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> IPV4_HDR_VER_SHIFT
    }

    /// The header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4
    }

    pub fn total_len(&self) -> usize {
        usize::from(u16::from_be_bytes(self.total_len))
    }

    pub fn frag_and_flags(&self) -> u16 {
        u16::from_be_bytes(self.frag_and_flags)
    }

    /// Whether this datagram is a fragment: either the fragment
    /// offset or the more-fragments flag is set.
    pub fn is_fragment(&self) -> bool {
        self.frag_and_flags() & !(IP_DF | IP_RF) != 0
    }

    pub fn csum(&self) -> u16 {
        u16::from_be_bytes(self.csum)
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv6HdrRaw {
    pub vsn_class_flow: [u8; 4],
    pub payload_len: [u8; 2],
    pub next_hdr: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl RawHeader for Ipv6HdrRaw {}

impl Ipv6HdrRaw {
    pub const SRC_OFFSET: usize = 8;
    pub const DST_OFFSET: usize = 24;

    pub fn payload_len(&self) -> usize {
        usize::from(u16::from_be_bytes(self.payload_len))
    }
}

/// The leading two bytes shared by the Hop-by-Hop, Destination Options
/// and Routing extension headers.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv6ExtRaw {
    pub next_hdr: u8,
    /// Length in 8-octet units, not counting the first 8 octets.
    pub len: u8,
}

impl RawHeader for Ipv6ExtRaw {}

impl Ipv6ExtRaw {
    /// The full length of this extension header in bytes.
    pub fn hdr_len(&self) -> usize {
        (usize::from(self.len) + 1) * 8
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct Ipv6FragRaw {
    pub next_hdr: u8,
    pub reserved: u8,
    pub offlg: [u8; 2],
    pub ident: [u8; 4],
}

impl RawHeader for Ipv6FragRaw {}

impl Ipv6FragRaw {
    /// The fragment offset, in bytes.
    pub fn frag_off(&self) -> u16 {
        u16::from_be_bytes(self.offlg) & IP6F_OFF_MASK
    }

    pub fn more_frags(&self) -> bool {
        u16::from_be_bytes(self.offlg) & IP6F_MORE_FRAG != 0
    }

    /// An "atomic fragment" (RFC 6946): a fragment header on a packet
    /// that was never actually fragmented.
    pub fn is_atomic(&self) -> bool {
        self.frag_off() == 0 && !self.more_frags()
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub win: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

impl RawHeader for TcpHdrRaw {}

impl TcpHdrRaw {
    /// The data offset field, in 32-bit words.
    pub fn data_off(&self) -> u8 {
        self.offset >> 4
    }

    /// The header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.data_off()) * 4
    }

    pub fn port(&self, which: Which) -> u16 {
        match which {
            Which::Src => u16::from_be_bytes(self.src_port),
            Which::Dst => u16::from_be_bytes(self.dst_port),
        }
    }

    pub fn set_port(&mut self, which: Which, port: u16) {
        match which {
            Which::Src => self.src_port = port.to_be_bytes(),
            Which::Dst => self.dst_port = port.to_be_bytes(),
        }
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes(self.seq)
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes(self.ack)
    }

    pub fn win(&self) -> u16 {
        u16::from_be_bytes(self.win)
    }

    pub fn csum(&self) -> u16 {
        u16::from_be_bytes(self.csum)
    }

    pub fn set_csum(&mut self, csum: u16) {
        self.csum = csum.to_be_bytes();
    }
}

#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub len: [u8; 2],
    pub csum: [u8; 2],
}

impl RawHeader for UdpHdrRaw {}

impl UdpHdrRaw {
    pub fn port(&self, which: Which) -> u16 {
        match which {
            Which::Src => u16::from_be_bytes(self.src_port),
            Which::Dst => u16::from_be_bytes(self.dst_port),
        }
    }

    pub fn set_port(&mut self, which: Which, port: u16) {
        match which {
            Which::Src => self.src_port = port.to_be_bytes(),
            Which::Dst => self.dst_port = port.to_be_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        usize::from(u16::from_be_bytes(self.len))
    }

    pub fn csum(&self) -> u16 {
        u16::from_be_bytes(self.csum)
    }

    pub fn set_csum(&mut self, csum: u16) {
        self.csum = csum.to_be_bytes();
    }
}

/// The fixed part of an ICMPv4 or ICMPv6 message. Both versions share
/// this 8-byte layout.
#[repr(C)]
#[derive(
    Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct IcmpHdrRaw {
    pub msg_type: u8,
    pub msg_code: u8,
    pub csum: [u8; 2],
    pub rest_of_hdr: [u8; 4],
}

impl RawHeader for IcmpHdrRaw {}

impl IcmpHdrRaw {
    /// The identifier of an Echo message.
    pub fn echo_id(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_hdr[0], self.rest_of_hdr[1]])
    }

    pub fn csum(&self) -> u16 {
        u16::from_be_bytes(self.csum)
    }
}
