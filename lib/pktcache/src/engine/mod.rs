// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The cache and rewrite engine.
pub mod buf;
pub mod cache;
pub mod checksum;
pub mod headers;
pub mod rewrite;
pub mod tcp;

pub use buf::PacketBuf;
pub use buf::SegBuf;
pub use cache::CacheFlags;
pub use cache::HdrRef;
pub use cache::L3Hdr;
pub use cache::L4Hdr;
pub use cache::PacketCache;
pub use checksum::addr_cksum;
pub use checksum::fixup16;
pub use checksum::fixup32;
pub use rewrite::RewriteError;
pub use tcp::MssRewrite;
pub use tcp::MssRewrites;
pub use tcp::TcpOpts;
pub use tcp::TcpSaw;

cfg_if! {
    if #[cfg(feature = "std")] {
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {
                if $crate::PKTCACHE_DEBUG.load(::core::sync::atomic::Ordering::Relaxed) {
                    println!($s);
                }
            };
            ($s:tt, $($arg:tt)*) => {
                if $crate::PKTCACHE_DEBUG.load(::core::sync::atomic::Ordering::Relaxed) {
                    println!($s, $($arg)*);
                }
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {
                println!(concat!("ERROR: ", $s));
            };
            ($s:tt, $($arg:tt)*) => {
                println!(concat!("ERROR: ", $s), $($arg)*);
            };
        }
    } else {
        // Without std there is nowhere to print to. Still evaluate the
        // format so that arguments are type checked and used.
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {};
            ($s:tt, $($arg:tt)*) => {
                let _ = ::core::format_args!($s, $($arg)*);
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {};
            ($s:tt, $($arg:tt)*) => {
                let _ = ::core::format_args!($s, $($arg)*);
            };
        }
    }
}

pub use dbg_macro as dbg;
pub use err_macro as err;

pub fn cache_fmterr_probe(info: CacheFlags, hlen: usize, proto: u8) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let hlen = hlen as u64;
            crate::pktcache_provider::cache__fmterr!(
                || (info.bits(), hlen, proto)
            );
        } else {
            let (_, _, _) = (info, hlen, proto);
        }
    }
}

pub fn cache_relocated_probe(attempt: u64) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::pktcache_provider::cache__relocated!(|| attempt);
        } else {
            let _ = attempt;
        }
    }
}

pub fn recache_probe(generation: u64, info: CacheFlags) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::pktcache_provider::recache!(|| (generation, info.bits()));
        } else {
            let (_, _) = (generation, info);
        }
    }
}

pub fn rewrite_fail_probe(op: &str, proto: u8, err: &RewriteError) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            use std::string::ToString;
            crate::pktcache_provider::rewrite__fail!(
                || (op, proto, err.to_string())
            );
        } else {
            let (_, _, _) = (op, proto, err);
        }
    }
}
