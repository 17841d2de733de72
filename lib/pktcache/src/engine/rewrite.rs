// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! In-place header rewriting: addresses, ports, NAPT and NPTv6.
//!
//! Every rewrite goes through the cached header references. The
//! checksum fixups are incremental, and read the field being replaced,
//! so they must run before the field is overwritten:
//! [`PacketCache::napt_rewrite()`] does this in the right order.
//!
//! Rewriting the address of an ICMPv6 message leaves its checksum,
//! which covers the pseudo-header, for the caller to fix.

use super::buf::PacketBuf;
use super::cache::CacheFlags;
use super::cache::L3Hdr;
use super::cache::L4Hdr;
use super::cache::PacketCache;
use super::checksum::Checksum;
use super::checksum::addr_cksum;
use super::checksum::fixup16;
use super::dbg;
use super::err;
use super::headers::Ipv4HdrRaw;
use super::headers::TcpHdrRaw;
use super::headers::UdpHdrRaw;
use super::rewrite_fail_probe;
use crate::api::IPV6_ALEN;
use crate::api::IpAddr;
use crate::api::Ipv6Addr;
use crate::api::Which;

/// The prefix length up to which NPTv6 adjusts the word right after
/// a /48.
const NPT66_SHORT_PREFIX: u8 = 48;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RewriteError {
    #[error("header not cached")]
    NotCached,

    #[error("rewrite not supported for protocol {proto}")]
    Unsupported { proto: u8 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Compute the NPTv6 adjustment for translating addresses under the
/// `internal` prefix to the `external` prefix, both `len` bits long.
///
/// Passing the result to [`PacketCache::npt66_rewrite()`] leaves the
/// one's complement sum of the address, and so every checksum covering
/// it, unchanged (RFC 6296 section 3.2). Translating back uses the
/// complement of the adjustment.
pub fn npt66_adjustment(
    internal: &Ipv6Addr,
    external: &Ipv6Addr,
    len: u8,
) -> u16 {
    let mut sum = Checksum::compute(&internal.mask(len).bytes());
    sum.sub_bytes(&external.mask(len).bytes());
    sum.finalize()
}

fn read_words(bytes: &[u8]) -> [u16; 8] {
    let mut words = [0u16; 8];
    for (w, b) in words.iter_mut().zip(bytes.chunks_exact(2)) {
        *w = u16::from_be_bytes([b[0], b[1]]);
    }
    words
}

impl<B: PacketBuf> PacketCache<'_, B> {
    fn proto_num(&self) -> u8 {
        u8::from(self.proto())
    }

    fn rewrite_failed(&self, op: &str, err: &RewriteError) {
        rewrite_fail_probe(op, self.proto_num(), err);
        match err {
            RewriteError::NotCached => {
                err!("{} on uncached packet", op);
            }
            _ => {
                dbg!("{} failed: {}", op, err);
            }
        }
    }

    /// Overwrite the source or destination address.
    ///
    /// No checksum is updated; see [`Self::rewrite_cksums()`].
    pub fn rewrite_addr(
        &mut self,
        which: Which,
        addr: &IpAddr,
    ) -> Result<(), RewriteError> {
        let r = *self.addr_ref(which).ok_or(RewriteError::NotCached)?;
        let new = addr.as_bytes();
        if new.len() != r.len() {
            return Err(RewriteError::InvalidArgument(
                "address family mismatch",
            ));
        }

        let bytes = self.bytes_mut(&r).ok_or(RewriteError::NotCached)?;
        bytes.copy_from_slice(new);
        Ok(())
    }

    /// Overwrite the source or destination TCP or UDP port.
    pub fn rewrite_port(
        &mut self,
        which: Which,
        port: u16,
    ) -> Result<(), RewriteError> {
        let l4 = *self.l4();
        match l4 {
            L4Hdr::Tcp(r) => {
                let tcp = self
                    .hdr_mut::<TcpHdrRaw>(&r)
                    .ok_or(RewriteError::NotCached)?;
                tcp.set_port(which, port);
            }

            L4Hdr::Udp(r) => {
                let udp = self
                    .hdr_mut::<UdpHdrRaw>(&r)
                    .ok_or(RewriteError::NotCached)?;
                udp.set_port(which, port);
            }

            _ => {
                return Err(RewriteError::Unsupported {
                    proto: self.proto_num(),
                });
            }
        }

        Ok(())
    }

    /// Fix up the checksums affected by changing the source or
    /// destination address to `addr` and, when `port` is nonzero, the
    /// port to `port`.
    ///
    /// This reads the current address and port, so it must be called
    /// before either is rewritten. A UDP checksum of zero means none
    /// was computed, and is left alone. ICMP checksums do not cover
    /// the addresses.
    pub fn rewrite_cksums(
        &mut self,
        which: Which,
        addr: &IpAddr,
        port: u16,
    ) -> Result<(), RewriteError> {
        let alen = self.alen();
        let mut old = [0u8; IPV6_ALEN];
        let cur = self.addr(which).ok_or(RewriteError::NotCached)?;
        old[..cur.len()].copy_from_slice(cur);

        let old = &old[..alen];
        let new = addr.as_bytes();
        if new.len() != alen {
            return Err(RewriteError::InvalidArgument(
                "address family mismatch",
            ));
        }

        if let Some(L3Hdr::V4(r)) = self.l3().copied() {
            let ip = self
                .hdr_mut::<Ipv4HdrRaw>(&r)
                .ok_or(RewriteError::NotCached)?;
            ip.csum = addr_cksum(ip.csum(), old, new).to_be_bytes();
        }

        let l4 = *self.l4();
        match l4 {
            L4Hdr::Tcp(r) => {
                let tcp = self
                    .hdr_mut::<TcpHdrRaw>(&r)
                    .ok_or(RewriteError::NotCached)?;
                let mut csum = addr_cksum(tcp.csum(), old, new);
                if port != 0 {
                    csum = fixup16(csum, tcp.port(which), port);
                }
                tcp.set_csum(csum);
            }

            L4Hdr::Udp(r) => {
                let udp = self
                    .hdr_mut::<UdpHdrRaw>(&r)
                    .ok_or(RewriteError::NotCached)?;
                if udp.csum() == 0 {
                    return Ok(());
                }
                let mut csum = addr_cksum(udp.csum(), old, new);
                if port != 0 {
                    csum = fixup16(csum, udp.port(which), port);
                }
                udp.set_csum(csum);
            }

            _ => {}
        }

        Ok(())
    }

    /// Translate the source or destination address and, when `port` is
    /// nonzero, the port, keeping every checksum valid.
    ///
    /// ICMP has no ports, and a port given for it is ignored. For any
    /// protocol other than TCP, UDP and ICMP a nonzero port fails with
    /// [`RewriteError::Unsupported`], after the address has been
    /// translated.
    pub fn napt_rewrite(
        &mut self,
        which: Which,
        addr: &IpAddr,
        port: u16,
    ) -> Result<(), RewriteError> {
        let res = self.napt(which, addr, port);
        if let Err(e) = &res {
            self.rewrite_failed("napt", e);
        }
        res
    }

    fn napt(
        &mut self,
        which: Which,
        addr: &IpAddr,
        port: u16,
    ) -> Result<(), RewriteError> {
        self.rewrite_cksums(which, addr, port)?;
        self.rewrite_addr(which, addr)?;
        if port == 0 {
            return Ok(());
        }

        let l4 = *self.l4();
        match l4 {
            L4Hdr::Tcp(_) | L4Hdr::Udp(_) => self.rewrite_port(which, port),
            L4Hdr::Icmp4(_) | L4Hdr::Icmp6(_) => Ok(()),
            L4Hdr::None => {
                Err(RewriteError::Unsupported { proto: self.proto_num() })
            }
        }
    }

    /// Replace the first `len` bits of the source or destination
    /// address with `prefix`, adding `adj` to one word of the address
    /// outside the prefix (RFC 6296).
    ///
    /// With an adjustment from [`npt66_adjustment()`] the translation
    /// is checksum neutral. No checksum is touched here.
    ///
    /// On error the address is left untouched.
    pub fn npt66_rewrite(
        &mut self,
        which: Which,
        prefix: &Ipv6Addr,
        len: u8,
        adj: u16,
    ) -> Result<(), RewriteError> {
        let res = self.npt66(which, prefix, len, adj);
        if let Err(e) = &res {
            self.rewrite_failed("npt66", e);
        }
        res
    }

    fn npt66(
        &mut self,
        which: Which,
        prefix: &Ipv6Addr,
        len: u8,
        adj: u16,
    ) -> Result<(), RewriteError> {
        if !self.is_cached(CacheFlags::IP6) {
            return Err(RewriteError::InvalidArgument("not an IPv6 packet"));
        }

        if len > 128 {
            return Err(RewriteError::InvalidArgument("prefix length"));
        }

        let r = *self.addr_ref(which).ok_or(RewriteError::NotCached)?;
        let bytes = self.bytes_mut(&r).ok_or(RewriteError::NotCached)?;
        let mut words = read_words(bytes);

        let word = if len <= NPT66_SHORT_PREFIX {
            // The subnet 0xffff cannot be translated.
            if words[3] == 0xFFFF {
                return Err(RewriteError::InvalidArgument(
                    "reserved subnet 0xffff",
                ));
            }
            3
        } else {
            let host = &words[4..];
            if host.iter().all(|&w| w == 0) || host.iter().all(|&w| w == 0xFFFF)
            {
                return Err(RewriteError::InvalidArgument(
                    "reserved interface identifier",
                ));
            }

            (4..8).find(|&i| words[i] != 0xFFFF).ok_or(
                RewriteError::InvalidArgument("no adjustable word"),
            )?
        };

        let pref = prefix.segments();
        let full = usize::from(len / 16);
        words[..full].copy_from_slice(&pref[..full]);

        let rem = len % 16;
        if rem != 0 {
            let mask = !(0xFFFF_u16 >> rem);
            words[full] = (pref[full] & mask) | (words[full] & !mask);
        }

        let mut sum = u32::from(words[word]) + u32::from(adj);
        while sum >> 16 != 0 {
            sum = (sum >> 16) + (sum & 0xFFFF);
        }
        // RFC 1071: prefer +0 to -0.
        words[word] = if sum == 0xFFFF { 0 } else { sum as u16 };

        for (b, w) in bytes.chunks_exact_mut(2).zip(words) {
            b.copy_from_slice(&w.to_be_bytes());
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Ipv4Addr;
    use crate::engine::buf::SegBuf;
    use pktcache_test_utils::*;
    use smoltcp::wire::IpProtocol;

    const NEW_IP4: Ipv4Addr = Ipv4Addr::from_const([192, 168, 1, 9]);
    const NEW_IP6: Ipv6Addr =
        Ipv6Addr::from_const([0x2001, 0xdb8, 0, 0, 0, 0, 0xa, 0xb]);

    fn csums_ok(pkt: &[u8], l4_off: usize, proto: IpProtocol) -> bool {
        (pkt[0] >> 4 == 6 || ip4_csum_ok(pkt)) && ulp_csum_ok(pkt, l4_off, proto)
    }

    #[test]
    fn rewrite_addr_needs_cache_and_family() {
        let mut buf = SegBuf::copy(tcp4(&[], &[]));
        let mut cache = PacketCache::new(&mut buf);
        assert_eq!(
            cache.rewrite_addr(Which::Src, &NEW_IP4.into()),
            Err(RewriteError::NotCached)
        );

        cache.cache_all();
        assert_eq!(
            cache.rewrite_addr(Which::Src, &NEW_IP6.into()),
            Err(RewriteError::InvalidArgument("address family mismatch"))
        );
        assert_eq!(
            cache.rewrite_cksums(Which::Src, &NEW_IP6.into(), 0),
            Err(RewriteError::InvalidArgument("address family mismatch"))
        );
        assert!(csums_ok(&cache.nbuf().copy_all(), 20, IpProtocol::Tcp));

        cache.rewrite_addr(Which::Dst, &NEW_IP4.into()).unwrap();
        assert_eq!(cache.ip(Which::Dst), Some(NEW_IP4.into()));
        assert_eq!(cache.ip(Which::Src), Some(SRC_IP4.into()));
    }

    #[test]
    fn rewrite_port_tcp_udp_only() {
        let mut buf = SegBuf::copy(udp4(b"x"));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.rewrite_port(Which::Src, 9999).unwrap();
        assert_eq!(cache.port(Which::Src), Some(9999));
        assert_eq!(cache.port(Which::Dst), Some(DPORT));

        let mut buf = SegBuf::copy(icmp4_echo(1, 1));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        assert_eq!(
            cache.rewrite_port(Which::Src, 9999),
            Err(RewriteError::Unsupported { proto: 1 })
        );
    }

    // Fixing up the checksums for an address change gives the same
    // result as computing them afresh over the rewritten packet.
    #[test]
    fn cksums_match_recompute() {
        let v4 = [
            (tcp4(&[], b"tcp payload"), IpProtocol::Tcp),
            (udp4(b"udp payload"), IpProtocol::Udp),
        ];

        for (pkt, proto) in v4 {
            for which in [Which::Src, Which::Dst] {
                let mut buf = SegBuf::copy(&pkt);
                let mut cache = PacketCache::new(&mut buf);
                cache.cache_all();
                cache.rewrite_cksums(which, &NEW_IP4.into(), 0).unwrap();
                cache.rewrite_addr(which, &NEW_IP4.into()).unwrap();
                assert!(csums_ok(&cache.nbuf().copy_all(), 20, proto));
            }
        }

        let v6 = [
            (tcp6(&[Ipv6Ext::HopByHop(0)], &[], b"tcp"), IpProtocol::Tcp),
            (udp6(&[Ipv6Ext::DestOpts(0)], b"udp"), IpProtocol::Udp),
        ];

        for (pkt, proto) in v6 {
            for which in [Which::Src, Which::Dst] {
                let mut buf = SegBuf::copy(&pkt);
                let mut cache = PacketCache::new(&mut buf);
                cache.cache_all();
                cache.rewrite_cksums(which, &NEW_IP6.into(), 0).unwrap();
                cache.rewrite_addr(which, &NEW_IP6.into()).unwrap();
                assert!(csums_ok(&cache.nbuf().copy_all(), 48, proto));
            }
        }
    }

    #[test]
    fn zero_udp_checksum_stays_zero() {
        let mut pkt = udp4(b"no checksum");
        pkt[26..28].copy_from_slice(&[0, 0]);

        let mut buf = SegBuf::copy(&pkt);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.napt_rewrite(Which::Src, &NEW_IP4.into(), 1024).unwrap();

        let out = cache.nbuf().copy_all();
        assert_eq!(&out[26..28], &[0, 0]);
        assert!(ip4_csum_ok(&out));
        assert_eq!(cache.port(Which::Src), Some(1024));
    }

    #[test]
    fn napt_tcp4() {
        let mut buf = SegBuf::copy(tcp4(&[], b"hello"));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.napt_rewrite(Which::Src, &NEW_IP4.into(), 5555).unwrap();

        let key = cache.flow_key().unwrap();
        assert_eq!(key.src, NEW_IP4.into());
        assert_eq!(key.port(Which::Src), 5555);
        assert_eq!(key.port(Which::Dst), DPORT);
        assert!(csums_ok(&cache.nbuf().copy_all(), 20, IpProtocol::Tcp));
    }

    #[test]
    fn napt_udp6_dst() {
        let mut buf = SegBuf::copy(udp6(&[], b"hello"));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.napt_rewrite(Which::Dst, &NEW_IP6.into(), 53).unwrap();
        assert_eq!(cache.ip(Which::Dst), Some(NEW_IP6.into()));
        assert_eq!(cache.port(Which::Dst), Some(53));
        assert!(csums_ok(&cache.nbuf().copy_all(), 40, IpProtocol::Udp));
    }

    // Rewriting the address before fixing up the checksums computes the
    // delta from the new address to itself, leaving the checksums
    // stale.
    #[test]
    fn napt_order_matters() {
        let pkt = tcp4(&[], b"hello");

        let mut buf = SegBuf::copy(&pkt);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.rewrite_addr(Which::Src, &NEW_IP4.into()).unwrap();
        cache.rewrite_cksums(Which::Src, &NEW_IP4.into(), 0).unwrap();
        let naive = cache.nbuf().copy_all();
        assert!(!ip4_csum_ok(&naive));
        assert!(!ulp_csum_ok(&naive, 20, IpProtocol::Tcp));

        let mut buf = SegBuf::copy(&pkt);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.napt_rewrite(Which::Src, &NEW_IP4.into(), 0).unwrap();
        let good = cache.nbuf().copy_all();
        assert!(csums_ok(&good, 20, IpProtocol::Tcp));
        assert_ne!(naive, good);
        // Only the checksums differ.
        assert_eq!(naive[12..20], good[12..20]);
    }

    #[test]
    fn napt_icmp_ignores_port() {
        let pkt = icmp4_echo(42, 1);
        let mut buf = SegBuf::copy(&pkt);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.napt_rewrite(Which::Src, &NEW_IP4.into(), 4000).unwrap();

        let out = cache.nbuf().copy_all();
        assert!(ip4_csum_ok(&out));
        assert!(ulp_csum_ok(&out, 20, IpProtocol::Icmp));
        assert_eq!(out[20..], pkt[20..]);
    }

    #[test]
    fn napt_other_protocol() {
        let pkt = ip4_pkt(SRC_IP4, DST_IP4, IpProtocol::Unknown(47), &[0; 8]);

        let mut buf = SegBuf::copy(&pkt);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        assert_eq!(
            cache.napt_rewrite(Which::Dst, &NEW_IP4.into(), 80),
            Err(RewriteError::Unsupported { proto: 47 })
        );
        // The address is translated regardless.
        assert_eq!(cache.ip(Which::Dst), Some(NEW_IP4.into()));
        assert!(ip4_csum_ok(&cache.nbuf().copy_all()));

        let mut buf = SegBuf::copy(&pkt);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        assert_eq!(cache.napt_rewrite(Which::Dst, &NEW_IP4.into(), 0), Ok(()));
    }

    #[test]
    fn napt_after_relocation() {
        let pkt = tcp4(&[], b"0123456789");
        let mut buf = SegBuf::split(&pkt, &[40, 44]);
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();

        assert!(cache.nbuf_mut().advance(38, 8).is_some());
        assert!(cache.ensure_fresh());
        cache.napt_rewrite(Which::Dst, &NEW_IP4.into(), 8080).unwrap();
        assert!(csums_ok(&cache.nbuf().copy_all(), 20, IpProtocol::Tcp));
    }

    fn npt66_pkt(src: Ipv6Addr) -> Vec<u8> {
        let seg = tcp_segment(SPORT, DPORT, &[], b"npt");
        ip6_pkt(src, DST_IP6, &[], IpProtocol::Tcp, &seg)
    }

    const INTERNAL: Ipv6Addr =
        Ipv6Addr::from_const([0x2001, 0xdb8, 0x1, 0x2, 0, 0, 0, 1]);
    const EXTERNAL: Ipv6Addr =
        Ipv6Addr::from_const([0xfd01, 0x203, 0x405, 0, 0, 0, 0, 0]);

    #[test]
    fn npt66_slash56() {
        let adj = npt66_adjustment(&INTERNAL, &EXTERNAL, 56);
        assert_eq!(adj, 0x2AB0);

        let mut buf = SegBuf::copy(npt66_pkt(INTERNAL));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.npt66_rewrite(Which::Src, &EXTERNAL, 56, adj).unwrap();

        let Some(IpAddr::Ip6(out)) = cache.ip(Which::Src) else {
            panic!("expected an IPv6 source");
        };
        // Prefix from the external address, the low 8 bits of word 3
        // kept, word 4 adjusted.
        assert_eq!(
            out.segments(),
            [0xfd01, 0x203, 0x405, 0x0002, 0x2AB0, 0, 0, 1]
        );
        assert_eq!(out.mask(56), EXTERNAL.mask(56));

        // The adjustment keeps the TCP checksum valid.
        assert!(ulp_csum_ok(&cache.nbuf().copy_all(), 40, IpProtocol::Tcp));

        // And translating back restores the original address.
        cache.npt66_rewrite(Which::Src, &INTERNAL, 56, !adj).unwrap();
        assert_eq!(cache.ip(Which::Src), Some(INTERNAL.into()));
    }

    #[test]
    fn npt66_adjustment_folds() {
        let mut buf = SegBuf::copy(npt66_pkt(INTERNAL));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();

        // 0 + 0xffff is -0, written as +0.
        cache.npt66_rewrite(Which::Src, &EXTERNAL, 64, 0xFFFF).unwrap();
        let Some(IpAddr::Ip6(out)) = cache.ip(Which::Src) else {
            panic!("expected an IPv6 source");
        };
        assert_eq!(out.segments()[..5], [0xfd01, 0x203, 0x405, 0, 0]);

        // 0xfff0 + 0x0020 carries around.
        let src = Ipv6Addr::from_const([0x2001, 0xdb8, 1, 2, 0xFFF0, 0, 0, 1]);
        let mut buf = SegBuf::copy(npt66_pkt(src));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.npt66_rewrite(Which::Src, &EXTERNAL, 64, 0x0020).unwrap();
        let Some(IpAddr::Ip6(out)) = cache.ip(Which::Src) else {
            panic!("expected an IPv6 source");
        };
        assert_eq!(out.segments()[4], 0x0011);
    }

    #[test]
    fn npt66_short_prefix_uses_word3() {
        let adj = npt66_adjustment(&INTERNAL, &EXTERNAL, 48);
        let mut buf = SegBuf::copy(npt66_pkt(INTERNAL));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.npt66_rewrite(Which::Src, &EXTERNAL, 48, adj).unwrap();

        let Some(IpAddr::Ip6(out)) = cache.ip(Which::Src) else {
            panic!("expected an IPv6 source");
        };
        assert_eq!(out.segments()[..3], [0xfd01, 0x203, 0x405]);
        assert_ne!(out.segments()[3], 0x0002);
        assert_eq!(out.segments()[4..], [0, 0, 0, 1]);
        assert!(ulp_csum_ok(&cache.nbuf().copy_all(), 40, IpProtocol::Tcp));
    }

    #[test]
    fn npt66_skips_ffff_words() {
        let src =
            Ipv6Addr::from_const([0x2001, 0xdb8, 1, 2, 0xFFFF, 0xFFFF, 7, 1]);
        let adj = npt66_adjustment(&src, &EXTERNAL, 64);
        let mut buf = SegBuf::copy(npt66_pkt(src));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        cache.npt66_rewrite(Which::Src, &EXTERNAL, 64, adj).unwrap();

        let Some(IpAddr::Ip6(out)) = cache.ip(Which::Src) else {
            panic!("expected an IPv6 source");
        };
        assert_eq!(out.segments()[4..6], [0xFFFF, 0xFFFF]);
        assert_ne!(out.segments()[6], 7);
        assert!(ulp_csum_ok(&cache.nbuf().copy_all(), 40, IpProtocol::Tcp));
    }

    #[test]
    fn npt66_rejects() {
        let cases = [
            // Subnet 0xffff under a /48.
            (
                Ipv6Addr::from_const([0x2001, 0xdb8, 1, 0xFFFF, 0, 0, 0, 1]),
                48,
            ),
            // All-zero interface identifier.
            (Ipv6Addr::from_const([0x2001, 0xdb8, 1, 2, 0, 0, 0, 0]), 56),
            // All-ones interface identifier.
            (
                Ipv6Addr::from_const([
                    0x2001, 0xdb8, 1, 2, 0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF,
                ]),
                64,
            ),
            // Longer than an address.
            (INTERNAL, 129),
        ];

        for (src, len) in cases {
            let pkt = npt66_pkt(src);
            let mut buf = SegBuf::copy(&pkt);
            let mut cache = PacketCache::new(&mut buf);
            cache.cache_all();
            let res = cache.npt66_rewrite(Which::Src, &EXTERNAL, len, 0x1234);
            assert!(
                matches!(res, Err(RewriteError::InvalidArgument(_))),
                "{src} /{len}: {res:?}"
            );
            assert_eq!(cache.nbuf().copy_all(), pkt);
        }

        let mut buf = SegBuf::copy(tcp4(&[], &[]));
        let mut cache = PacketCache::new(&mut buf);
        cache.cache_all();
        assert_eq!(
            cache.npt66_rewrite(Which::Src, &EXTERNAL, 56, 0),
            Err(RewriteError::InvalidArgument("not an IPv6 packet"))
        );
    }
}
