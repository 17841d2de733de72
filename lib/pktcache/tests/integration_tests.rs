// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests.
//!
//! These run whole cache-then-rewrite pipelines over packets built by
//! `pktcache-test-utils`, cut into segments at every interesting
//! offset. Whatever the segmentation, the rewritten bytes must be the
//! same, and every checksum must verify against a full recomputation.

use itertools::Itertools;
use pktcache::api::FlowKey;
use pktcache::api::IpAddr;
use pktcache::api::Ipv4Addr;
use pktcache::api::Ipv6Addr;
use pktcache::api::Which;
use pktcache::engine::CacheFlags;
use pktcache::engine::L4Hdr;
use pktcache::engine::PacketBuf;
use pktcache::engine::PacketCache;
use pktcache::engine::RewriteError;
use pktcache::engine::SegBuf;
use pktcache::engine::rewrite::npt66_adjustment;
use pktcache_test_utils::*;
use smoltcp::wire::IpProtocol;
use std::sync::atomic::Ordering;

// If we are running `cargo test`, then make sure to
// register the USDT probes before running any tests.
#[cfg(test)]
#[ctor::ctor]
fn register_usdt() {
    usdt::register_probes().unwrap();
}

const NAT_IP4: Ipv4Addr = Ipv4Addr::from_const([76, 76, 21, 21]);
const NAT_IP6: Ipv6Addr =
    Ipv6Addr::from_const([0x2001, 0xdb8, 0xbeef, 0, 0, 0, 0, 0x21]);
const NAT_PORT: u16 = 3001;

struct Case {
    name: &'static str,
    pkt: Vec<u8>,
    proto: IpProtocol,
    l4_off: usize,
    nat_ip: IpAddr,
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            name: "tcp4",
            pkt: tcp4(&[2, 4, 5, 0xB4], b"GET / HTTP/1.1\r\n"),
            proto: IpProtocol::Tcp,
            l4_off: 20,
            nat_ip: NAT_IP4.into(),
        },
        Case {
            name: "udp4",
            pkt: udp4(b"dns query"),
            proto: IpProtocol::Udp,
            l4_off: 20,
            nat_ip: NAT_IP4.into(),
        },
        Case {
            name: "icmp4",
            pkt: icmp4_echo(7, 1),
            proto: IpProtocol::Icmp,
            l4_off: 20,
            nat_ip: NAT_IP4.into(),
        },
        Case {
            name: "tcp6",
            pkt: tcp6(
                &[Ipv6Ext::HopByHop(1), Ipv6Ext::Routing(0)],
                &[1, 2, 4, 5, 0xB4, 1, 1, 0],
                b"payload",
            ),
            proto: IpProtocol::Tcp,
            l4_off: 64,
            nat_ip: NAT_IP6.into(),
        },
        Case {
            name: "udp6",
            pkt: udp6(
                &[
                    Ipv6Ext::DestOpts(2),
                    Ipv6Ext::Fragment { offset: 0, more: false },
                ],
                b"payload",
            ),
            proto: IpProtocol::Udp,
            l4_off: 72,
            nat_ip: NAT_IP6.into(),
        },
    ]
}

fn csums_ok(pkt: &[u8], l4_off: usize, proto: IpProtocol) -> bool {
    let l3_ok = pkt[0] >> 4 == 6 || ip4_csum_ok(pkt);
    l3_ok && ulp_csum_ok(pkt, l4_off, proto)
}

fn snat(buf: &mut SegBuf, nat_ip: &IpAddr) -> FlowKey {
    let mut cache = PacketCache::new(buf);
    let flags = cache.cache_all();
    assert!(flags.contains(CacheFlags::LAYER4), "flags: {flags:?}");
    cache.napt_rewrite(Which::Src, nat_ip, NAT_PORT).unwrap();
    cache.clamp_mss(1200);
    cache.flow_key().unwrap()
}

// Source NAT gives the same bytes whether the packet arrives in one
// segment or cut in two or three anywhere.
#[test]
fn snat_is_segmentation_independent() {
    for case in cases() {
        let mut whole = SegBuf::copy(&case.pkt);
        let key = snat(&mut whole, &case.nat_ip);
        let expected = whole.copy_all();
        assert!(
            csums_ok(&expected, case.l4_off, case.proto),
            "{}: bad checksums",
            case.name
        );
        assert_eq!(key.src, case.nat_ip);

        let len = case.pkt.len();
        let cuts = (1..len)
            .map(|c| vec![c])
            .chain((1..len).step_by(3).combinations(2));

        for cut in cuts {
            let mut buf = SegBuf::split(&case.pkt, &cut);
            let seg_key = snat(&mut buf, &case.nat_ip);
            assert_eq!(seg_key, key, "{} cut at {cut:?}", case.name);
            assert_eq!(
                buf.copy_all(),
                expected,
                "{} cut at {cut:?}",
                case.name
            );
        }
    }
}

#[test]
fn snat_reverses_to_original() {
    let pkt = tcp4(&[], b"round trip");
    let mut buf = SegBuf::split(&pkt, &[10, 30]);
    let mut cache = PacketCache::new(&mut buf);
    cache.cache_all();
    let orig = cache.flow_key().unwrap();

    cache.napt_rewrite(Which::Src, &NAT_IP4.into(), NAT_PORT).unwrap();
    assert_ne!(cache.nbuf().copy_all(), pkt);

    // Translating back restores the original bytes, checksums
    // included.
    cache
        .napt_rewrite(Which::Src, &orig.src, orig.port(Which::Src))
        .unwrap();
    assert_eq!(cache.flow_key(), Some(orig));
    assert_eq!(cache.nbuf().copy_all(), pkt);
}

#[test]
fn dnat_reply_mirrors_flow() {
    let mut buf = SegBuf::copy(udp4(b"reply"));
    let mut cache = PacketCache::new(&mut buf);
    cache.cache_all();
    let key = cache.flow_key().unwrap();

    cache.napt_rewrite(Which::Dst, &NAT_IP4.into(), NAT_PORT).unwrap();
    let natted = cache.flow_key().unwrap();
    assert_eq!(natted.src, key.src);
    assert_eq!(natted.dst, IpAddr::from(NAT_IP4));
    assert_eq!(natted.mirror().port(Which::Src), NAT_PORT);
    assert!(csums_ok(&cache.nbuf().copy_all(), 20, IpProtocol::Udp));
}

// Whatever the order of the extension headers, a checksum-neutral
// prefix translation leaves the transport checksum valid.
#[test]
fn npt66_over_extension_permutations() {
    let internal =
        Ipv6Addr::from_const([0xfd00, 0x1122, 0x3344, 0x5566, 0, 0, 0, 1]);
    let external = Ipv6Addr::from_const([0x2001, 0xdb8, 0x99, 0, 0, 0, 0, 0]);

    let exts =
        [Ipv6Ext::HopByHop(0), Ipv6Ext::DestOpts(3), Ipv6Ext::Routing(1)];
    for perm in exts.iter().copied().permutations(exts.len()) {
        for len in [48, 52, 56, 60, 64] {
            let seg = tcp_segment(SPORT, DPORT, &[], b"prefix");
            let pkt = ip6_pkt(internal, DST_IP6, &perm, IpProtocol::Tcp, &seg);
            let l4_off = 40 + ext_len(&perm);

            let mut buf = SegBuf::split(&pkt, &[9, l4_off + 3]);
            let mut cache = PacketCache::new(&mut buf);
            cache.cache_all();

            let adj = npt66_adjustment(&internal, &external, len);
            cache.npt66_rewrite(Which::Src, &external, len, adj).unwrap();
            let Some(IpAddr::Ip6(out)) = cache.ip(Which::Src) else {
                panic!("expected an IPv6 source");
            };
            assert_eq!(out.mask(len), external.mask(len), "/{len} {perm:?}");
            let out = cache.nbuf().copy_all();
            assert!(ulp_csum_ok(&out, l4_off, IpProtocol::Tcp));

            cache.npt66_rewrite(Which::Src, &internal, len, !adj).unwrap();
            assert_eq!(cache.nbuf().copy_all(), pkt, "/{len} {perm:?}");
        }
    }
}

// A truncated packet either parses as far as it goes or is flagged
// malformed with nothing cached: never a layer claimed beyond the
// bytes present.
#[test]
fn truncation_never_claims_partial_layers() {
    for case in cases() {
        for len in 0..case.pkt.len() {
            let mut buf = SegBuf::split(&case.pkt[..len], &[len / 2]);
            let mut cache = PacketCache::new(&mut buf);
            let flags = cache.cache_all();

            if flags.contains(CacheFlags::FMTERR) {
                let name = case.name;
                assert_eq!(flags, CacheFlags::FMTERR, "{name} len {len}");
                assert!(cache.l3().is_none());
                assert_eq!(*cache.l4(), L4Hdr::None);
                assert!(cache.flow_key().is_none());
                continue;
            }

            if flags.contains(CacheFlags::LAYER4) {
                assert!(!flags.contains(CacheFlags::IPFRAG));
                assert!(len >= case.l4_off + 8, "{} len {len}", case.name);
            }
            assert!(!cache.is_stale());
        }
    }
}

#[test]
fn fragments_translate_addresses_only() {
    let exts = [Ipv6Ext::Fragment { offset: 0, more: true }];
    let pkt = tcp6(&exts, &[], b"first fragment");
    let mut buf = SegBuf::copy(&pkt);
    let mut cache = PacketCache::new(&mut buf);
    assert_eq!(cache.cache_all(), CacheFlags::IP6 | CacheFlags::IPFRAG);

    cache.napt_rewrite(Which::Src, &NAT_IP6.into(), 0).unwrap();
    assert_eq!(cache.ip(Which::Src), Some(NAT_IP6.into()));
    assert_eq!(
        cache.napt_rewrite(Which::Src, &NAT_IP6.into(), NAT_PORT),
        Err(RewriteError::Unsupported { proto: 44 })
    );
    assert!(cache.fetch_tcpopts().is_none());
}

#[test]
fn ether_frame_pipeline() {
    let mut frame = vec![0xA8, 0x40, 0x25, 0, 0, 1, 0xA8, 0x40, 0x25, 0, 0, 2];
    frame.extend_from_slice(&0x86DDu16.to_be_bytes());
    frame.extend_from_slice(&tcp6(&[], &[2, 4, 0x23, 0x28], b"jumbo"));

    let mut buf = SegBuf::split(&frame, &[6, 20, 60]);
    let mut cache = PacketCache::new(&mut buf);
    assert_eq!(cache.cache_ether(), CacheFlags::LAYER2);
    assert_eq!(cache.ether().unwrap().ether_type(), 0x86DD);
    let flags = cache.cache_all();
    assert!(flags.contains(CacheFlags::TCP));
    assert!(cache.info().contains(CacheFlags::LAYER2));

    // An MSS of 9000 is clamped.
    assert!(cache.clamp_mss(8960));
    assert!(cache.info().contains(CacheFlags::LAYER2 | CacheFlags::TCP));

    let out = cache.nbuf().copy_all();
    assert_eq!(&out[..14], &frame[..14]);
    assert!(ulp_csum_ok(&out[14..], 40, IpProtocol::Tcp));
}

#[test]
fn debug_messages_are_harmless() {
    pktcache::PKTCACHE_DEBUG.store(true, Ordering::Relaxed);

    let mut pkt = tcp4(&[], &[]);
    pkt[0] = 0x44;
    let mut buf = SegBuf::copy(&pkt);
    let mut cache = PacketCache::new(&mut buf);
    assert_eq!(cache.cache_all(), CacheFlags::FMTERR);
    assert_eq!(
        cache.napt_rewrite(Which::Src, &NAT_IP4.into(), 0),
        Err(RewriteError::NotCached)
    );

    pktcache::PKTCACHE_DEBUG.store(false, Ordering::Relaxed);
}

#[test]
fn cache_over_generic_buffer() {
    fn cached_proto<B: PacketBuf>(buf: &mut B) -> Option<u8> {
        let mut cache = PacketCache::new(buf);
        cache.cache_all();
        cache.flow_key().map(|k| k.proto)
    }

    let mut buf = SegBuf::split(udp6(&[], b"x"), &[3]);
    assert_eq!(cached_proto(&mut buf), Some(17));
    assert!(buf.generation() > 0);
}
