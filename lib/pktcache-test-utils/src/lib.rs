// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet builders and checksum checks for tests.
//!
//! Packets are plain byte vectors with valid checksums, so that tests
//! can cut them into segments however they like.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub use pktcache_api::IpAddr;
pub use pktcache_api::Ipv4Addr;
pub use pktcache_api::Ipv6Addr;
use smoltcp::wire::Icmpv4Packet;
use smoltcp::wire::Icmpv6Packet;
use smoltcp::wire::IpAddress;
use smoltcp::wire::IpProtocol;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv6Packet;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::UdpPacket;

pub const SRC_IP4: Ipv4Addr = Ipv4Addr::from_const([10, 0, 0, 1]);
pub const DST_IP4: Ipv4Addr = Ipv4Addr::from_const([10, 0, 0, 2]);
pub const SRC_IP6: Ipv6Addr =
    Ipv6Addr::from_const([0xfd00, 0, 0, 0, 0, 0, 0, 1]);
pub const DST_IP6: Ipv6Addr =
    Ipv6Addr::from_const([0xfd00, 0, 0, 0, 0, 0, 0, 2]);

pub const SPORT: u16 = 4444;
pub const DPORT: u16 = 80;

pub const TCP_SEQ: u32 = 0x0102_0304;
pub const TCP_ACK: u32 = 0x0A0B_0C0D;
pub const TCP_WIN: u16 = 64240;

const IP4_HDR_LEN: usize = 20;
const IP6_HDR_LEN: usize = 40;
const TCP_HDR_LEN: usize = 20;
const UDP_HDR_LEN: usize = 8;
const TCP_ACK_FLAG: u8 = 0x10;
const ICMP4_ECHO_REQUEST: u8 = 8;
const ICMP6_ECHO_REQUEST: u8 = 128;
const IP4_DF: u8 = 0x40;
const HOP_LIMIT: u8 = 64;

/// An IPv6 extension header.
///
/// The options and routing headers carry their Hdr Ext Len: the
/// header is `(len + 1) * 8` bytes long. A fragment header is always
/// 8 bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ipv6Ext {
    HopByHop(u8),
    DestOpts(u8),
    Routing(u8),
    /// `offset` is in 8-octet units.
    Fragment {
        offset: u16,
        more: bool,
    },
}

impl Ipv6Ext {
    pub fn proto(&self) -> IpProtocol {
        match self {
            Self::HopByHop(_) => IpProtocol::HopByHop,
            Self::DestOpts(_) => IpProtocol::Ipv6Opts,
            Self::Routing(_) => IpProtocol::Ipv6Route,
            Self::Fragment { .. } => IpProtocol::Ipv6Frag,
        }
    }

    /// The length of the emitted header in bytes.
    pub fn hdr_len(&self) -> usize {
        match self {
            Self::HopByHop(len) | Self::DestOpts(len) | Self::Routing(len) => {
                (usize::from(*len) + 1) * 8
            }
            Self::Fragment { .. } => 8,
        }
    }

    fn emit(&self, next: IpProtocol, out: &mut Vec<u8>) {
        let next = u8::from(next);
        match self {
            // PadN options fill the rest of the header.
            Self::HopByHop(len) | Self::DestOpts(len) => {
                out.extend_from_slice(&[next, *len]);
                let mut left = self.hdr_len() - 2;
                while left > 0 {
                    if left == 1 {
                        // Pad1
                        out.push(0);
                        break;
                    }
                    let pad = (left - 2).min(usize::from(u8::MAX));
                    out.extend_from_slice(&[1, pad as u8]);
                    out.resize(out.len() + pad, 0);
                    left -= pad + 2;
                }
            }

            // Type 0, no segments left.
            Self::Routing(len) => {
                out.extend_from_slice(&[next, *len, 0, 0]);
                out.resize(out.len() + self.hdr_len() - 4, 0);
            }

            Self::Fragment { offset, more } => {
                let offlg = (offset << 3) | u16::from(*more);
                out.extend_from_slice(&[next, 0]);
                out.extend_from_slice(&offlg.to_be_bytes());
                out.extend_from_slice(&0x17u32.to_be_bytes());
            }
        }
    }
}

/// The length of an extension header chain.
pub fn ext_len(exts: &[Ipv6Ext]) -> usize {
    exts.iter().map(Ipv6Ext::hdr_len).sum()
}

/// A TCP segment with the ACK flag set and a zero checksum. `opts`
/// must be a multiple of four bytes.
pub fn tcp_segment(sport: u16, dport: u16, opts: &[u8], body: &[u8]) -> Vec<u8> {
    assert!(opts.len() % 4 == 0 && opts.len() <= 40, "bad TCP options");

    let hdr_len = TCP_HDR_LEN + opts.len();
    let mut seg = Vec::with_capacity(hdr_len + body.len());
    seg.extend_from_slice(&sport.to_be_bytes());
    seg.extend_from_slice(&dport.to_be_bytes());
    seg.extend_from_slice(&TCP_SEQ.to_be_bytes());
    seg.extend_from_slice(&TCP_ACK.to_be_bytes());
    seg.push(((hdr_len / 4) as u8) << 4);
    seg.push(TCP_ACK_FLAG);
    seg.extend_from_slice(&TCP_WIN.to_be_bytes());
    // Checksum and urgent pointer.
    seg.extend_from_slice(&[0; 4]);
    seg.extend_from_slice(opts);
    seg.extend_from_slice(body);
    seg
}

/// A UDP datagram with a zero checksum.
pub fn udp_datagram(sport: u16, dport: u16, body: &[u8]) -> Vec<u8> {
    let len = (UDP_HDR_LEN + body.len()) as u16;
    let mut dgram = Vec::with_capacity(usize::from(len));
    dgram.extend_from_slice(&sport.to_be_bytes());
    dgram.extend_from_slice(&dport.to_be_bytes());
    dgram.extend_from_slice(&len.to_be_bytes());
    dgram.extend_from_slice(&[0; 2]);
    dgram.extend_from_slice(body);
    dgram
}

/// An Echo message of the given ICMP type, with a zero checksum.
pub fn icmp_echo(msg_type: u8, ident: u16, seq: u16) -> Vec<u8> {
    let mut msg = vec![msg_type, 0, 0, 0];
    msg.extend_from_slice(&ident.to_be_bytes());
    msg.extend_from_slice(&seq.to_be_bytes());
    msg.extend_from_slice(b"ping");
    msg
}

/// Wrap `ulp` in an IPv4 header with DF set, filling in the IP and
/// transport checksums.
pub fn ip4_pkt(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: IpProtocol,
    ulp: &[u8],
) -> Vec<u8> {
    let total = (IP4_HDR_LEN + ulp.len()) as u16;
    let mut pkt = Vec::with_capacity(usize::from(total));
    pkt.extend_from_slice(&[0x45, 0]);
    pkt.extend_from_slice(&total.to_be_bytes());
    pkt.extend_from_slice(&[0x12, 0x34, IP4_DF, 0]);
    pkt.extend_from_slice(&[HOP_LIMIT, u8::from(proto), 0, 0]);
    pkt.extend_from_slice(&src.bytes());
    pkt.extend_from_slice(&dst.bytes());
    pkt.extend_from_slice(ulp);

    Ipv4Packet::new_unchecked(&mut pkt[..]).fill_checksum();
    fill_ulp_csum(&mut pkt, IP4_HDR_LEN, proto);
    pkt
}

/// Wrap `ulp` in an IPv6 header followed by `exts`, filling in the
/// transport checksum.
pub fn ip6_pkt(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    exts: &[Ipv6Ext],
    proto: IpProtocol,
    ulp: &[u8],
) -> Vec<u8> {
    let mut chain = Vec::with_capacity(exts.len() * 8);
    for (i, ext) in exts.iter().enumerate() {
        let next = exts.get(i + 1).map(Ipv6Ext::proto).unwrap_or(proto);
        ext.emit(next, &mut chain);
    }
    let first = exts.first().map(Ipv6Ext::proto).unwrap_or(proto);

    let plen = (chain.len() + ulp.len()) as u16;
    let mut pkt = Vec::with_capacity(IP6_HDR_LEN + usize::from(plen));
    pkt.extend_from_slice(&[0x60, 0, 0, 0]);
    pkt.extend_from_slice(&plen.to_be_bytes());
    pkt.extend_from_slice(&[u8::from(first), HOP_LIMIT]);
    pkt.extend_from_slice(&src.bytes());
    pkt.extend_from_slice(&dst.bytes());
    pkt.extend_from_slice(&chain);
    pkt.extend_from_slice(ulp);

    fill_ulp_csum(&mut pkt, IP6_HDR_LEN + chain.len(), proto);
    pkt
}

pub fn tcp4(opts: &[u8], body: &[u8]) -> Vec<u8> {
    let seg = tcp_segment(SPORT, DPORT, opts, body);
    ip4_pkt(SRC_IP4, DST_IP4, IpProtocol::Tcp, &seg)
}

pub fn udp4(body: &[u8]) -> Vec<u8> {
    let dgram = udp_datagram(SPORT, DPORT, body);
    ip4_pkt(SRC_IP4, DST_IP4, IpProtocol::Udp, &dgram)
}

pub fn icmp4_echo(ident: u16, seq: u16) -> Vec<u8> {
    let msg = icmp_echo(ICMP4_ECHO_REQUEST, ident, seq);
    ip4_pkt(SRC_IP4, DST_IP4, IpProtocol::Icmp, &msg)
}

pub fn tcp6(exts: &[Ipv6Ext], opts: &[u8], body: &[u8]) -> Vec<u8> {
    let seg = tcp_segment(SPORT, DPORT, opts, body);
    ip6_pkt(SRC_IP6, DST_IP6, exts, IpProtocol::Tcp, &seg)
}

pub fn udp6(exts: &[Ipv6Ext], body: &[u8]) -> Vec<u8> {
    let dgram = udp_datagram(SPORT, DPORT, body);
    ip6_pkt(SRC_IP6, DST_IP6, exts, IpProtocol::Udp, &dgram)
}

pub fn icmp6_echo(exts: &[Ipv6Ext], ident: u16, seq: u16) -> Vec<u8> {
    let msg = icmp_echo(ICMP6_ECHO_REQUEST, ident, seq);
    ip6_pkt(SRC_IP6, DST_IP6, exts, IpProtocol::Icmpv6, &msg)
}

/// Insert IPv4 options after the fixed header, updating the header
/// length, total length and header checksum.
pub fn insert_ip4_options(pkt: &mut Vec<u8>, opts: &[u8]) {
    assert!(opts.len() % 4 == 0 && opts.len() <= 40, "bad IPv4 options");

    let ihl = (IP4_HDR_LEN + opts.len()) / 4;
    pkt.splice(IP4_HDR_LEN..IP4_HDR_LEN, opts.iter().copied());
    pkt[0] = 0x40 | ihl as u8;
    let total = pkt.len() as u16;
    pkt[2..4].copy_from_slice(&total.to_be_bytes());

    let mut ip = Ipv4Packet::new_unchecked(&mut pkt[..]);
    ip.set_checksum(0);
    ip.fill_checksum();
}

fn ip_addrs(pkt: &[u8]) -> (IpAddress, IpAddress) {
    match pkt[0] >> 4 {
        4 => {
            let ip = Ipv4Packet::new_unchecked(pkt);
            (IpAddress::Ipv4(ip.src_addr()), IpAddress::Ipv4(ip.dst_addr()))
        }

        6 => {
            let ip6 = Ipv6Packet::new_unchecked(pkt);
            (IpAddress::Ipv6(ip6.src_addr()), IpAddress::Ipv6(ip6.dst_addr()))
        }

        v => panic!("not an IP packet: version {v}"),
    }
}

/// Compute the transport checksum of the message at `l4_off`, which
/// runs to the end of `pkt`.
pub fn fill_ulp_csum(pkt: &mut [u8], l4_off: usize, proto: IpProtocol) {
    let (src, dst) = ip_addrs(pkt);
    let ulp = &mut pkt[l4_off..];

    match proto {
        IpProtocol::Tcp => {
            TcpPacket::new_unchecked(ulp).fill_checksum(&src, &dst)
        }
        IpProtocol::Udp => {
            UdpPacket::new_unchecked(ulp).fill_checksum(&src, &dst)
        }
        IpProtocol::Icmp => Icmpv4Packet::new_unchecked(ulp).fill_checksum(),
        IpProtocol::Icmpv6 => {
            Icmpv6Packet::new_unchecked(ulp).fill_checksum(&src, &dst)
        }
        _ => {}
    }
}

pub fn ip4_csum_ok(pkt: &[u8]) -> bool {
    Ipv4Packet::new_unchecked(pkt).verify_checksum()
}

/// Verify the transport checksum of the message at `l4_off`.
pub fn ulp_csum_ok(pkt: &[u8], l4_off: usize, proto: IpProtocol) -> bool {
    let (src, dst) = ip_addrs(pkt);
    let ulp = &pkt[l4_off..];

    match proto {
        IpProtocol::Tcp => {
            TcpPacket::new_unchecked(ulp).verify_checksum(&src, &dst)
        }
        IpProtocol::Udp => {
            UdpPacket::new_unchecked(ulp).verify_checksum(&src, &dst)
        }
        IpProtocol::Icmp => Icmpv4Packet::new_unchecked(ulp).verify_checksum(),
        IpProtocol::Icmpv6 => {
            Icmpv6Packet::new_unchecked(ulp).verify_checksum(&src, &dst)
        }
        p => panic!("no checksum for {p}"),
    }
}
