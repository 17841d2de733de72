// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP option scanning and MSS rewriting.
//!
//! The options are parsed best effort: a malformed option ends the
//! scan rather than failing it, leaving whatever was found before it.

use super::buf::PacketBuf;
use super::cache::L4Hdr;
use super::cache::PacketCache;
use super::checksum::fixup16;
use super::headers::Ipv6HdrRaw;
use super::headers::RawHeader;
use super::headers::TcpHdrRaw;

pub const TCPOPT_EOL: u8 = 0;
pub const TCPOPT_NOP: u8 = 1;
pub const TCPOPT_MAXSEG: u8 = 2;
pub const TCPOPT_WINDOW: u8 = 3;

pub const TCPOLEN_MAXSEG: usize = 4;
pub const TCPOLEN_WINDOW: usize = 3;

/// The most option bytes a TCP header can carry.
pub const MAX_TCPOPTLEN: usize = 40;

/// The largest window scale shift allowed by RFC 7323.
pub const TCP_MAX_WINSHIFT: u8 = 14;

/// The most MSS options an option region can hold.
const MAX_MSS_OPTS: usize = MAX_TCPOPTLEN / TCPOLEN_MAXSEG;

/// Walk an option region, yielding `(kind, position, length)` for each
/// well-formed option.
struct TcpOptIter<'o> {
    opts: &'o [u8],
    pos: usize,
}

impl<'o> TcpOptIter<'o> {
    fn new(opts: &'o [u8]) -> Self {
        Self { opts, pos: 0 }
    }
}

impl Iterator for TcpOptIter<'_> {
    type Item = (u8, usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.pos;
        let kind = *self.opts.get(pos)?;

        let len = match kind {
            TCPOPT_EOL => None,
            TCPOPT_NOP => Some(1),
            _ => {
                let remain = self.opts.len() - pos;
                self.opts
                    .get(pos + 1)
                    .map(|&len| usize::from(len))
                    .filter(|&len| (2..=remain).contains(&len))
            }
        };

        let Some(len) = len else {
            self.pos = self.opts.len();
            return None;
        };

        self.pos += len;
        Some((kind, pos, len))
    }
}

fn be16(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// The options of interest found in a TCP header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpOpts {
    /// The last well-formed MSS option.
    pub mss: Option<u16>,
    /// The window scale shift, clamped to [`TCP_MAX_WINSHIFT`].
    pub wscale: Option<u8>,
}

impl TcpOpts {
    pub fn parse(opts: &[u8]) -> Self {
        let mut res = Self::default();

        for (kind, pos, len) in TcpOptIter::new(opts) {
            match (kind, len) {
                (TCPOPT_MAXSEG, TCPOLEN_MAXSEG) => {
                    res.mss = be16(opts, pos + 2);
                }

                (TCPOPT_WINDOW, TCPOLEN_WINDOW) => {
                    res.wscale = opts
                        .get(pos + 2)
                        .map(|&shift| shift.min(TCP_MAX_WINSHIFT));
                }

                _ => {}
            }
        }

        res
    }
}

fn is_mss(&(kind, _, len): &(u8, usize, usize)) -> bool {
    kind == TCPOPT_MAXSEG && len == TCPOLEN_MAXSEG
}

/// Overwrite the value of the MSS option whose value starts at `val`,
/// returning the checksum delta. Nothing is written if the 16-bit
/// words covering the value are not all in `opts`.
fn write_mss(opts: &mut [u8], val: usize, mss: u16) -> Option<MssRewrite> {
    if val % 2 == 0 {
        let old = be16(opts, val)?;
        opts[val..val + 2].copy_from_slice(&mss.to_be_bytes());
        return Some(MssRewrite::Aligned { old, new: mss });
    }

    let old = [be16(opts, val - 1)?, be16(opts, val + 1)?];
    opts[val..val + 2].copy_from_slice(&mss.to_be_bytes());
    let new = [
        u16::from_be_bytes([opts[val - 1], opts[val]]),
        u16::from_be_bytes([opts[val + 1], opts[val + 2]]),
    ];
    Some(MssRewrite::Straddled { old, new })
}

/// The checksum delta of an MSS rewrite.
///
/// The checksum sums 16-bit words aligned on the start of the TCP
/// header. When the MSS value begins at an odd offset, its two bytes
/// fall in two different words, and both must be fixed up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MssRewrite {
    Aligned { old: u16, new: u16 },
    Straddled { old: [u16; 2], new: [u16; 2] },
}

impl MssRewrite {
    /// Apply this rewrite to the TCP checksum `cksum`.
    pub fn fixup(&self, cksum: u16) -> u16 {
        match *self {
            Self::Aligned { old, new } => fixup16(cksum, old, new),
            Self::Straddled { old, new } => {
                let cksum = fixup16(cksum, old[0], new[0]);
                fixup16(cksum, old[1], new[1])
            }
        }
    }
}

/// The rewrites made to every MSS option of a segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MssRewrites {
    rewrites: [MssRewrite; MAX_MSS_OPTS],
    len: usize,
}

impl Default for MssRewrites {
    fn default() -> Self {
        let noop = MssRewrite::Aligned { old: 0, new: 0 };
        Self { rewrites: [noop; MAX_MSS_OPTS], len: 0 }
    }
}

impl MssRewrites {
    fn push(&mut self, rw: MssRewrite) {
        if let Some(slot) = self.rewrites.get_mut(self.len) {
            *slot = rw;
            self.len += 1;
        }
    }

    pub fn as_slice(&self) -> &[MssRewrite] {
        &self.rewrites[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Apply every rewrite to the TCP checksum `cksum`.
    pub fn fixup(&self, cksum: u16) -> u16 {
        self.as_slice().iter().fold(cksum, |ck, rw| rw.fixup(ck))
    }
}

/// Sequence-space values of a TCP segment, in host order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcpSaw {
    pub seq: u32,
    pub ack: u32,
    pub win: u16,
    /// The payload length, from the IP length fields.
    pub data_len: usize,
}

impl<B: PacketBuf> PacketCache<'_, B> {
    /// The absolute offset and length of the TCP option region, if the
    /// cached TCP header has one.
    fn tcpopts_region(&self) -> Option<(usize, usize)> {
        let L4Hdr::Tcp(r) = *self.l4() else {
            return None;
        };

        let cnt = self.tcp_hdr()?.hdr_len() - TcpHdrRaw::SIZE;
        if cnt == 0 {
            return None;
        }
        debug_assert!(cnt <= MAX_TCPOPTLEN);
        Some((r.off() + TcpHdrRaw::SIZE, cnt))
    }

    /// Make the option region contiguous and run `scan` over it.
    ///
    /// If making it contiguous relocated the buffer, the cache is
    /// rebuilt and the scan run again. The cursor is left on the
    /// network header.
    fn scan_tcpopts<T>(
        &mut self,
        mut scan: impl FnMut(&[u8]) -> Option<T>,
    ) -> Option<T> {
        let (off, cnt) = self.tcpopts_region()?;
        let res = self.with_fresh(|c| {
            let opts = c.nbuf.advance(off, cnt)?;
            scan(&*opts)
        });
        let _ = self.nbuf.advance(self.l3_off(), 0);
        res
    }

    /// Fetch the MSS and window scale options.
    ///
    /// Returns `None` when the packet is not TCP, carries no options,
    /// or its options are truncated.
    pub fn fetch_tcpopts(&mut self) -> Option<TcpOpts> {
        self.scan_tcpopts(|opts| Some(TcpOpts::parse(opts)))
    }

    /// Overwrite the value of every MSS option with `mss`.
    ///
    /// The TCP checksum is left alone; apply the returned
    /// [`MssRewrites`] to it. Returns `None` if there is no MSS option.
    pub fn set_mss(&mut self, mss: u16) -> Option<MssRewrites> {
        self.rewrite_mss(|_| Some(mss))
    }

    /// Lower every MSS option advertising more than `max` to `max`,
    /// fixing up the TCP checksum. Returns whether the packet was
    /// changed.
    pub fn clamp_mss(&mut self, max: u16) -> bool {
        let rewrites = self.rewrite_mss(|old| (old > max).then_some(max));
        let Some(rewrites) = rewrites.filter(|rw| !rw.is_empty()) else {
            return false;
        };

        let L4Hdr::Tcp(r) = *self.l4() else {
            return false;
        };

        match self.hdr_mut::<TcpHdrRaw>(&r) {
            Some(tcp) => {
                tcp.set_csum(rewrites.fixup(tcp.csum()));
                true
            }
            None => false,
        }
    }

    /// Replace the value of each MSS option for which `new` returns a
    /// value. Returns `None` if there is no MSS option.
    fn rewrite_mss(
        &mut self,
        mut new: impl FnMut(u16) -> Option<u16>,
    ) -> Option<MssRewrites> {
        let (off, cnt) = self.tcpopts_region()?;

        // Locate the options first. Only reads are repeated if the
        // buffer relocates, never the writes.
        let (found, nfound) = self.scan_tcpopts(|opts| {
            let mut found = [0usize; MAX_MSS_OPTS];
            let mut nfound = 0;
            let positions = TcpOptIter::new(opts).filter(is_mss);
            for (slot, (_, pos, _)) in found.iter_mut().zip(positions) {
                *slot = pos;
                nfound += 1;
            }
            (nfound > 0).then_some((found, nfound))
        })?;

        let opts = self.nbuf.slice_mut(off, cnt)?;
        let mut rewrites = MssRewrites::default();

        for &pos in &found[..nfound] {
            let val = pos + 2;
            let Some(old) = be16(opts, val) else {
                continue;
            };
            let Some(mss) = new(old) else {
                continue;
            };
            if let Some(rw) = write_mss(opts, val, mss) {
                rewrites.push(rw);
            }
        }

        Some(rewrites)
    }

    /// Fetch SEQ, ACK and WIN, and compute the payload length.
    ///
    /// Returns `None` if the packet is not TCP, or if its IP length
    /// field is too small to hold the headers.
    pub fn tcp_saw(&self) -> Option<TcpSaw> {
        let tcp = self.tcp_hdr()?;
        let thlen = tcp.hdr_len();

        let data_len = if let Some(ip) = self.ipv4_hdr() {
            ip.total_len().checked_sub(self.hlen())?.checked_sub(thlen)?
        } else {
            let ip6 = self.ipv6_hdr()?;
            let ext_len = self.hlen() - Ipv6HdrRaw::SIZE;
            ip6.payload_len().checked_sub(ext_len)?.checked_sub(thlen)?
        };

        Some(TcpSaw {
            seq: tcp.seq(),
            ack: tcp.ack(),
            win: tcp.win(),
            data_len,
        })
    }
}
