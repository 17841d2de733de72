// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Internet checksum arithmetic.
//!
//! The rewrite paths never recompute a checksum over the whole
//! packet. Instead, when a field changes they fold the difference
//! between the old and new field values into the checksum already
//! stored in the header, as described by RFC 1624:
//!
//! ```text
//! HC' = ~(~HC + ~m + m')
//! ```
//!
//! where `HC` is the stored checksum, `m` the old field value and
//! `m'` the new one. [`fixup16()`] applies this to a 16-bit field,
//! [`fixup32()`] to a 32-bit one, and [`addr_cksum()`] to a whole IPv4
//! or IPv6 address.
//!
//! # Byte order
//!
//! Every 16-bit quantity passed to or returned from this module is a
//! host-order value read from network-order bytes with
//! `u16::from_be_bytes()`, and should be written back with
//! `to_be_bytes()`. The one's complement sum is indifferent to the
//! byte order it is computed in (RFC 1071 section 1.B) so long as reads and
//! writes agree.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1141 Incremental Updating of the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

/// Fold a 32-bit accumulator down to 16 bits with end-around carry.
#[inline]
fn fold(mut sum: u32) -> u16 {
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;
    sum as u16
}

/// Update the checksum `cksum` for a 16-bit field that changes from
/// `old` to `new`.
///
/// A stored checksum of `0xFFFF` cannot be produced by a sender
/// computing over real data, and fixing it up is not reversible:
/// `fixup16(0xFFFF, x, x)` yields `0x0000`.
pub fn fixup16(cksum: u16, old: u16, new: u16) -> u16 {
    let sum = u32::from(!cksum) + u32::from(!old) + u32::from(new);
    !fold(sum)
}

/// Update the checksum `cksum` for a 32-bit field that changes from
/// `old` to `new`.
pub fn fixup32(cksum: u16, old: u32, new: u32) -> u16 {
    let mut sum = u32::from(!cksum);
    sum += (!old & 0xFFFF) + (new & 0xFFFF);
    sum += (!old >> 16) + (new >> 16);
    !fold(sum)
}

/// Update the checksum `cksum` for an address that changes from `old`
/// to `new`.
///
/// Both slices must be the same length, a multiple of four bytes: 4
/// for IPv4 and 16 for IPv6.
pub fn addr_cksum(cksum: u16, old: &[u8], new: &[u8]) -> u16 {
    debug_assert_eq!(old.len(), new.len());
    debug_assert_eq!(old.len() % 4, 0);

    old.chunks_exact(4).zip(new.chunks_exact(4)).fold(cksum, |ck, (o, n)| {
        let o = u32::from_be_bytes([o[0], o[1], o[2], o[3]]);
        let n = u32::from_be_bytes([n[0], n[1], n[2], n[3]]);
        fixup32(ck, o, n)
    })
}

/// A rolling one's complement checksum calculation.
///
/// This is useful for keeping a rolling sum in a more efficient
/// manner; as opposed to constantly taking the one's complement
/// (bitwise negation), incrementally updating the sum, and then
/// re-applying one's complement. It also delays summing the carries
/// until the finalized sum is needed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Update the sum by subtracting the contents of `bytes`.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    ///
    /// This is the sum itself; a header stores its complement.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self { inner: self.inner + other.inner }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        self.inner += other.inner
    }
}

// Callers sum headers and address prefixes, never whole packets, so
// the accumulator cannot overflow before it is folded.
fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(2);

    for w in &mut words {
        csum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }

    if let [last] = words.remainder() {
        csum += u32::from(*last) << 8;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(2);

    for w in &mut words {
        csum += u32::from(!u16::from_be_bytes([w[0], w[1]]));
    }

    if let [last] = words.remainder() {
        csum += u32::from(!(u16::from(*last) << 8));
    }

    csum
}
