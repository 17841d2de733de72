// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

pub use pktcache_api::*;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use smoltcp::wire::IpProtocol;

/// The addressing summary of a cached packet: its protocol, both IP
/// addresses and, for TCP and UDP, both ports.
///
/// ICMP and other protocols carry zero ports.
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
pub struct FlowKey {
    pub proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub ports: [u16; 2],
}

impl FlowKey {
    pub fn ip(&self, which: Which) -> IpAddr {
        match which {
            Which::Src => self.src,
            Which::Dst => self.dst,
        }
    }

    pub fn port(&self, which: Which) -> u16 {
        self.ports[which.idx()]
    }

    /// Swap source and destination, both addresses and ports.
    pub fn mirror(self) -> Self {
        Self {
            proto: self.proto,
            src: self.dst,
            dst: self.src,
            ports: [self.ports[1], self.ports[0]],
        }
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let proto = IpProtocol::from(self.proto);
        match proto {
            IpProtocol::Tcp | IpProtocol::Udp => write!(
                f,
                "{proto}:{}:{}:{}:{}",
                self.src, self.ports[0], self.dst, self.ports[1]
            ),
            _ => write!(f, "{proto}:{}:{}", self.src, self.dst),
        }
    }
}
