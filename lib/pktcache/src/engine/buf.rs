// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet buffers.
//!
//! A packet may arrive as a chain of segments, and a header is free
//! to straddle a segment boundary. The cache only ever reads headers
//! through contiguous slices, so it asks the buffer to make a region
//! contiguous before looking at it. Doing so may move bytes into new
//! storage. Any slice taken before that point is then stale; the
//! borrow checker prevents holding one across the call, and the
//! buffer's generation tells the cache when an offset it recorded
//! earlier was taken against different storage.

use alloc::vec::Vec;

/// A byte buffer holding a single packet, with a cursor.
///
/// All offsets are absolute, measured from the first byte of the
/// packet.
pub trait PacketBuf {
    /// The total number of bytes in the packet.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current cursor position.
    fn offset(&self) -> usize;

    /// Move the cursor back to the first byte of the packet.
    fn reset(&mut self);

    /// The bytes from the cursor to the end of the segment that holds
    /// it. This may be shorter than the rest of the packet.
    fn dataptr(&self) -> &[u8];

    /// Move the cursor to `off` and make the `ensure` bytes that
    /// follow it contiguous, returning them.
    ///
    /// Returns `None`, leaving the cursor where it was, if the packet
    /// is not long enough. Making the region contiguous may relocate
    /// packet data: see [`PacketBuf::was_relocated()`].
    fn advance(&mut self, off: usize, ensure: usize) -> Option<&mut [u8]>;

    /// Make `len` bytes at the cursor contiguous, returning them.
    fn ensure_contig(&mut self, len: usize) -> Option<&mut [u8]> {
        let off = self.offset();
        self.advance(off, len)
    }

    /// The `len` bytes at `off`, if they are already contiguous.
    ///
    /// This never relocates data.
    fn slice(&self, off: usize, len: usize) -> Option<&[u8]>;

    /// The `len` bytes at `off`, if they are already contiguous.
    ///
    /// This never relocates data.
    fn slice_mut(&mut self, off: usize, len: usize) -> Option<&mut [u8]>;

    /// A counter that changes every time packet data is relocated.
    fn generation(&self) -> u64;

    /// Whether data has been relocated since the last call to
    /// [`PacketBuf::clear_relocated()`].
    fn was_relocated(&self) -> bool;

    fn clear_relocated(&mut self);
}

/// A packet held as a list of owned segments.
///
/// Making a straddling region contiguous coalesces every segment the
/// region touches into one new segment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SegBuf {
    segs: Vec<Vec<u8>>,
    pos: usize,
    generation: u64,
    relocated: bool,
}

impl SegBuf {
    /// Create a buffer from a list of segments. Empty segments are
    /// dropped.
    pub fn new(segs: Vec<Vec<u8>>) -> Self {
        let segs = segs.into_iter().filter(|s| !s.is_empty()).collect();
        Self { segs, pos: 0, generation: 0, relocated: false }
    }

    /// Create a single-segment buffer holding a copy of `buf`.
    pub fn copy(buf: impl AsRef<[u8]>) -> Self {
        Self::new(alloc::vec![buf.as_ref().to_vec()])
    }

    /// Create a buffer holding a copy of `buf`, split into a new
    /// segment at each offset in `cuts`.
    ///
    /// Cuts must be ascending; any at or past the end of `buf` are
    /// ignored.
    pub fn split(buf: impl AsRef<[u8]>, cuts: &[usize]) -> Self {
        let buf = buf.as_ref();
        let mut segs = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;

        for &cut in cuts.iter().filter(|&&c| c < buf.len()) {
            debug_assert!(cut >= start, "cuts must be ascending");
            segs.push(buf[start..cut].to_vec());
            start = cut;
        }

        segs.push(buf[start..].to_vec());
        Self::new(segs)
    }

    /// Return the number of segments.
    pub fn seg_len(&self) -> usize {
        self.segs.len()
    }

    /// Return the number of bytes in all segments.
    pub fn byte_len(&self) -> usize {
        self.segs.iter().map(Vec::len).sum()
    }

    /// Copy the packet bytes out into a single vector.
    pub fn copy_all(&self) -> Vec<u8> {
        self.segs.concat()
    }

    /// Find the segment holding `off`, and the offset within it.
    fn locate(&self, off: usize) -> Option<(usize, usize)> {
        let mut start = 0;

        for (i, seg) in self.segs.iter().enumerate() {
            if off < start + seg.len() {
                return Some((i, off - start));
            }
            start += seg.len();
        }

        None
    }

    /// Make `[off, off + len)` contiguous, returning its segment and
    /// the region's offset within it.
    fn contig(&mut self, off: usize, len: usize) -> Option<(usize, usize)> {
        debug_assert!(len > 0);
        let end = off.checked_add(len)?;
        if end > self.byte_len() {
            return None;
        }

        let (first, at) = self.locate(off)?;
        let mut have = self.segs[first].len() - at;
        if have >= len {
            return Some((first, at));
        }

        let mut last = first;
        while have < len {
            last += 1;
            have += self.segs[last].len();
        }

        let merged: Vec<u8> = self.segs.drain(first..=last).flatten().collect();
        self.segs.insert(first, merged);
        self.generation += 1;
        self.relocated = true;
        Some((first, at))
    }
}

impl PacketBuf for SegBuf {
    fn len(&self) -> usize {
        self.byte_len()
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn reset(&mut self) {
        self.pos = 0;
    }

    fn dataptr(&self) -> &[u8] {
        match self.locate(self.pos) {
            Some((i, at)) => &self.segs[i][at..],
            None => &[],
        }
    }

    fn advance(&mut self, off: usize, ensure: usize) -> Option<&mut [u8]> {
        if ensure == 0 {
            if off > self.byte_len() {
                return None;
            }
            self.pos = off;
            return Some(&mut []);
        }

        let (i, at) = self.contig(off, ensure)?;
        self.pos = off;
        Some(&mut self.segs[i][at..at + ensure])
    }

    fn slice(&self, off: usize, len: usize) -> Option<&[u8]> {
        if len == 0 {
            return if off <= self.byte_len() { Some(&[]) } else { None };
        }

        let (i, at) = self.locate(off)?;
        self.segs[i].get(at..at + len)
    }

    fn slice_mut(&mut self, off: usize, len: usize) -> Option<&mut [u8]> {
        if len == 0 {
            return if off <= self.byte_len() { Some(&mut []) } else { None };
        }

        let (i, at) = self.locate(off)?;
        self.segs[i].get_mut(at..at + len)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn was_relocated(&self) -> bool {
        self.relocated
    }

    fn clear_relocated(&mut self) {
        self.relocated = false;
    }
}
