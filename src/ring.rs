//! Circular buffer and cursor model shared by every engine.
//!
//! All rings have a power-of-two capacity `N` so that positions are a mask
//! away from absolute stream counters. The helpers below only ever hand out
//! contiguous sub-ranges; callers never do modulo arithmetic themselves.

use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(Error::Config(format!(
            "ring capacity must be a non-zero power of two, got {}",
            capacity
        )));
    }
    Ok(())
}

/// Absolute stream counter paired with its position inside a ring.
///
/// The position is always `total % capacity`.
///
/// # Examples
///
/// ```
/// use echoprobe::ring::StreamCursor;
///
/// let mut cursor = StreamCursor::new(1024).unwrap();
/// cursor.advance(1000);
/// cursor.advance(100);
/// assert_eq!(cursor.total(), 1100);
/// assert_eq!(cursor.position(), 76);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCursor {
    total: u64,
    mask: u64,
}

impl StreamCursor {
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            total: 0,
            mask: capacity as u64 - 1,
        })
    }

    /// Bytes moved past this cursor since the session began.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Offset inside the ring, in `[0, capacity)`.
    pub fn position(&self) -> usize {
        (self.total & self.mask) as usize
    }

    pub fn advance(&mut self, n: usize) {
        self.total += n as u64;
    }
}

/// Read-only view of the pattern addressable by absolute stream offset.
///
/// The pattern is stored twice back to back, so a full `capacity` worth of
/// expected bytes is contiguous from any starting position.
///
/// # Examples
///
/// ```
/// use echoprobe::ring::PatternRing;
///
/// let ring = PatternRing::new(&[1, 2, 3, 4]).unwrap();
/// assert_eq!(ring.span(3, 4), &[4, 1, 2, 3]);
/// assert_eq!(ring.expected_at(6), 3);
/// ```
#[derive(Debug, Clone)]
pub struct PatternRing {
    mirrored: Box<[u8]>,
    mask: u64,
}

impl PatternRing {
    pub fn new(pattern: &[u8]) -> Result<Self> {
        check_capacity(pattern.len())?;
        let mut mirrored = Vec::with_capacity(pattern.len() * 2);
        mirrored.extend_from_slice(pattern);
        mirrored.extend_from_slice(pattern);
        Ok(Self {
            mirrored: mirrored.into_boxed_slice(),
            mask: pattern.len() as u64 - 1,
        })
    }

    pub fn capacity(&self) -> usize {
        self.mirrored.len() / 2
    }

    /// The pattern exactly as generated, starting at offset 0.
    pub fn pattern(&self) -> &[u8] {
        &self.mirrored[..self.capacity()]
    }

    /// Expected bytes starting at absolute `offset`, at most `max` long and
    /// never longer than one capacity.
    pub fn span(&self, offset: u64, max: usize) -> &[u8] {
        let start = (offset & self.mask) as usize;
        let len = max.min(self.capacity());
        &self.mirrored[start..start + len]
    }

    pub fn expected_at(&self, offset: u64) -> u8 {
        self.mirrored[(offset & self.mask) as usize]
    }
}

/// Bounded FIFO used by the relay engine.
///
/// The producer fills [`RelayRing::free_span_mut`] and commits what it got;
/// the consumer drains [`RelayRing::filled_span`] and consumes what it sent.
#[derive(Debug)]
pub struct RelayRing {
    buf: Box<[u8]>,
    write: StreamCursor,
    read: StreamCursor,
}

impl RelayRing {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            write: StreamCursor::new(capacity)?,
            read: StreamCursor::new(capacity)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes received but not yet retransmitted.
    pub fn occupied(&self) -> usize {
        (self.write.total() - self.read.total()) as usize
    }

    pub fn is_full(&self) -> bool {
        self.occupied() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    pub fn write_cursor(&self) -> StreamCursor {
        self.write
    }

    pub fn read_cursor(&self) -> StreamCursor {
        self.read
    }

    /// Contiguous free space starting at the write cursor.
    pub fn free_span_mut(&mut self) -> &mut [u8] {
        let start = self.write.position();
        let len = (self.capacity() - self.occupied()).min(self.capacity() - start);
        &mut self.buf[start..start + len]
    }

    /// Marks `n` bytes of the free span as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.capacity() - self.occupied());
        self.write.advance(n);
    }

    /// Contiguous filled bytes starting at the read cursor.
    pub fn filled_span(&self) -> &[u8] {
        let start = self.read.position();
        let len = self.occupied().min(self.capacity() - start);
        &self.buf[start..start + len]
    }

    /// Releases `n` bytes of the filled span.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.occupied());
        self.read.advance(n);
    }
}

/// Picks the size of each read or write attempt.
///
/// With randomization disabled the whole offer is used. Otherwise a uniform
/// size in `[min_chunk, offer]` is drawn so partial I/O gets exercised.
pub struct ChunkSizer {
    min_chunk: usize,
    randomize: bool,
    rng: StdRng,
}

impl ChunkSizer {
    pub fn new(min_chunk: usize, randomize: bool) -> Self {
        Self::with_rng(min_chunk, randomize, StdRng::from_entropy())
    }

    pub fn with_rng(min_chunk: usize, randomize: bool, rng: StdRng) -> Self {
        Self {
            min_chunk,
            randomize,
            rng,
        }
    }

    pub fn min_chunk(&self) -> usize {
        self.min_chunk
    }

    /// Size to request out of `offer` available bytes.
    pub fn pick(&mut self, offer: usize) -> usize {
        if !self.randomize || offer <= self.min_chunk {
            return offer;
        }
        self.rng.gen_range(self.min_chunk..=offer)
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
