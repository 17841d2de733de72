// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod ip;

pub use ip::*;

/// Selects the source or destination half of a packet's addressing,
/// both for IP addresses and for transport ports.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Which {
    Src = 0,
    Dst = 1,
}

impl Which {
    /// The index of this side in a `[src, dst]` pair.
    pub const fn idx(self) -> usize {
        self as usize
    }

    /// The opposite side.
    pub const fn other(self) -> Self {
        match self {
            Which::Src => Which::Dst,
            Which::Dst => Which::Src,
        }
    }
}

impl core::str::FromStr for Which {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "src" => Ok(Which::Src),
            "dst" => Ok(Which::Dst),
            _ => Err(format!("invalid address side: {}", s)),
        }
    }
}

impl Display for Which {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Which::Src => "SRC",
            Which::Dst => "DST",
        };

        write!(f, "{}", s)
    }
}
