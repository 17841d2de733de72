// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A packet-header cache and rewrite engine.
//!
//! Given a packet held in a (possibly segmented) buffer, the engine
//! locates and validates the IPv4/IPv6 header, walks any IPv6
//! extension headers, and caches the transport header when it is TCP,
//! UDP, ICMP or ICMPv6. The cached view then backs in-place rewrites:
//! addresses, ports, the TCP MSS option, NAPT and NPTv6 translation,
//! with every affected checksum fixed up incrementally.
//!
//! Buffers may relocate their data when asked to make a region
//! contiguous. The cache detects this and rebuilds itself; see
//! [`engine::cache::PacketCache::recache()`].
#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![allow(non_camel_case_types)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

extern crate alloc;

#[macro_use]
extern crate cfg_if;

use core::sync::atomic::AtomicBool;

pub mod api;
pub mod engine;

/// When set, the engine's debug messages are printed.
///
/// Only has an effect in `std` builds; error messages are always
/// printed there.
pub static PKTCACHE_DEBUG: AtomicBool = AtomicBool::new(false);

// ================================================================
// DTrace USDT Provider
//
// Allowing us to use USDT to trace the cache and rewrite paths when
// running in std/test.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod pktcache_provider {
    fn cache__fmterr(info: u32, hlen: u64, proto: u8) {}
    fn cache__relocated(attempt: u64) {}
    fn recache(generation: u64, info: u32) {}
    fn rewrite__fail(op: &str, proto: u8, err: &str) {}
}
