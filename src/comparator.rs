//! Verification engine.
//!
//! The comparator sends the pattern cyclically and checks every byte that
//! comes back against the pattern byte at the same absolute stream offset.
//! Writes are throttled by an optional in-flight window; the first differing
//! byte ends the session with a [`MismatchReport`].

use crate::bandwidth::SessionStats;
use crate::config::SessionConfig;
use crate::endpoint::{wait_ready, Endpoint};
use crate::ring::{ChunkSizer, PatternRing, StreamCursor};
use crate::session::{EngineOutcome, Notifier, SessionEnd, Step};
use crate::{Error, Result};
use log::{debug, error};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::io::Interest;

/// Bytes of context shown on each side of a divergence.
pub const MISMATCH_CONTEXT: usize = 16;

/// One byte position in a mismatch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextByte {
    pub offset: u64,
    pub expected: u8,
    pub actual: u8,
}

impl ContextByte {
    pub fn differs(&self) -> bool {
        self.expected != self.actual
    }
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        '.'
    }
}

impl fmt::Display for ContextByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{:x}:R{:02x}({})/S{:02x}({})",
            self.offset,
            self.actual,
            printable(self.actual),
            self.expected,
            printable(self.expected)
        )?;
        if self.differs() {
            f.write_str(" (diff)")?;
        }
        Ok(())
    }
}

/// Where and how the received stream diverged from the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MismatchReport {
    /// Absolute stream offset of the first wrong byte
    pub offset: u64,
    /// Bytes sent when the chunk arrived
    pub sent: u64,
    /// Bytes verified before the chunk arrived
    pub received: u64,
    /// Length of the chunk holding the wrong byte
    pub chunk_len: usize,
    /// Bytes right before the divergence, all matching
    pub preceding: Vec<ContextByte>,
    /// The wrong byte and the ones received after it
    pub diverging: Vec<ContextByte>,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "data mismatch at offset {} (0x{:x}): sent {}, received {}, chunk of {} bytes",
            self.offset, self.offset, self.sent, self.received, self.chunk_len
        )?;
        if !self.preceding.is_empty() {
            writeln!(f, "preceding:")?;
            for b in &self.preceding {
                writeln!(f, "  {}", b)?;
            }
        }
        writeln!(f, "from divergence:")?;
        for b in &self.diverging {
            writeln!(f, "  {}", b)?;
        }
        Ok(())
    }
}

/// Sends the pattern and verifies the echo.
pub struct Comparator {
    ring: PatternRing,
    sent: StreamCursor,
    received: StreamCursor,
    target: Option<u64>,
    window: u64,
    sizer: ChunkSizer,
    scratch: Box<[u8]>,
    poll_timeout: Duration,
}

impl Comparator {
    /// Builds a comparator over `pattern`; `target` is the already resolved
    /// byte count, `None` for an unbounded session.
    pub fn new(
        config: &SessionConfig,
        pattern: &[u8],
        target: Option<u64>,
        sizer: ChunkSizer,
    ) -> Result<Self> {
        let ring = PatternRing::new(pattern)?;
        let capacity = ring.capacity();
        Ok(Self {
            ring,
            sent: StreamCursor::new(capacity)?,
            received: StreamCursor::new(capacity)?,
            target,
            window: config.window,
            sizer,
            scratch: vec![0u8; capacity].into_boxed_slice(),
            poll_timeout: config.poll_timeout,
        })
    }

    pub fn sent(&self) -> u64 {
        self.sent.total()
    }

    pub fn received(&self) -> u64 {
        self.received.total()
    }

    /// True once both directions reached the target.
    pub fn is_complete(&self) -> bool {
        match self.target {
            Some(target) => self.sent.total() >= target && self.received.total() >= target,
            None => false,
        }
    }

    /// Largest write allowed right now by ring size, target and window.
    pub fn write_offer(&self) -> usize {
        let sent = self.sent.total();
        let mut offer = self.ring.capacity() as u64;
        if let Some(target) = self.target {
            offer = offer.min(target.saturating_sub(sent));
        }
        if self.window > 0 {
            let limit = self.received.total() + self.window;
            offer = offer.min(limit.saturating_sub(sent));
        }
        offer as usize
    }

    /// Smallest offer worth a write attempt.
    ///
    /// The minimum chunk, except at the tail of a bounded session where the
    /// remaining bytes may be fewer.
    fn write_floor(&self) -> usize {
        let floor = self.sizer.min_chunk().max(1);
        match self.target {
            Some(target) => {
                let left = target.saturating_sub(self.sent.total());
                floor.min(left.max(1) as usize)
            }
            None => floor,
        }
    }

    pub fn wants_write(&self) -> bool {
        self.write_offer() >= self.write_floor()
    }

    pub async fn run<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        stats: &mut SessionStats,
        notifier: &Notifier,
    ) -> Result<EngineOutcome> {
        loop {
            if self.is_complete() {
                return Ok(self.outcome(SessionEnd::TargetReached));
            }

            let interest = if self.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let readiness = match wait_ready(endpoint, interest, self.poll_timeout).await {
                Ok(readiness) => readiness,
                Err(e) => return Ok(self.outcome(SessionEnd::TransportError(e.to_string()))),
            };

            if readiness.readable {
                match self.read_step(endpoint, stats, notifier)? {
                    Step::Closed => return Ok(self.outcome(SessionEnd::PeerClosed)),
                    Step::Failed(e) => {
                        return Ok(self.outcome(SessionEnd::TransportError(e.to_string())))
                    }
                    Step::Moved(_) | Step::Blocked => {}
                }
            }

            if readiness.writable && self.wants_write() {
                match self.write_step(endpoint, notifier) {
                    Step::Closed => return Ok(self.outcome(SessionEnd::PeerClosed)),
                    Step::Failed(e) => {
                        return Ok(self.outcome(SessionEnd::TransportError(e.to_string())))
                    }
                    Step::Moved(_) | Step::Blocked => {}
                }
            }

            notifier.maybe_report(stats, false);
        }
    }

    fn read_step<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        stats: &mut SessionStats,
        notifier: &Notifier,
    ) -> Result<Step> {
        let len = self.sizer.pick(self.scratch.len());
        let step = Step::from_attempt(endpoint.try_read(&mut self.scratch[..len]));
        if let Step::Moved(n) = step {
            self.verify(n)?;
            self.received.advance(n);
            stats.record(n as u64);
            notifier.block_read(n);
        }
        Ok(step)
    }

    fn write_step<E: Endpoint>(&mut self, endpoint: &mut E, notifier: &Notifier) -> Step {
        let len = self.sizer.pick(self.write_offer());
        let span = self.ring.span(self.sent.total(), len);
        let step = Step::from_attempt(endpoint.try_write(span));
        if let Step::Moved(n) = step {
            self.sent.advance(n);
            notifier.block_written(n);
        }
        step
    }

    /// Compares the first `n` scratch bytes with the pattern at the current
    /// receive offset.
    fn verify(&self, n: usize) -> Result<()> {
        let base = self.received.total();
        let chunk = &self.scratch[..n];
        let mut pos = 0;
        while pos < n {
            let expected = self.ring.span(base + pos as u64, n - pos);
            let actual = &chunk[pos..pos + expected.len()];
            if actual != expected {
                let k = actual
                    .iter()
                    .zip(expected)
                    .position(|(a, e)| a != e)
                    .unwrap_or(0);
                let report = self.mismatch_report(chunk, pos + k);
                error!("{}", report);
                return Err(Error::Integrity(Box::new(report)));
            }
            pos += expected.len();
        }
        Ok(())
    }

    fn mismatch_report(&self, chunk: &[u8], index: usize) -> MismatchReport {
        let base = self.received.total();
        let offset = base + index as u64;
        let actual_at = |o: u64| -> u8 {
            if o >= base {
                chunk[(o - base) as usize]
            } else {
                self.ring.expected_at(o)
            }
        };

        let preceding = (offset.saturating_sub(MISMATCH_CONTEXT as u64)..offset)
            .map(|o| ContextByte {
                offset: o,
                expected: self.ring.expected_at(o),
                actual: actual_at(o),
            })
            .collect();
        let end = (base + chunk.len() as u64).min(offset + MISMATCH_CONTEXT as u64);
        let diverging = (offset..end)
            .map(|o| ContextByte {
                offset: o,
                expected: self.ring.expected_at(o),
                actual: actual_at(o),
            })
            .collect();

        debug!("mismatch at chunk index {} of {}", index, chunk.len());
        MismatchReport {
            offset,
            sent: self.sent.total(),
            received: base,
            chunk_len: chunk.len(),
            preceding,
            diverging,
        }
    }

    fn outcome(&self, end: SessionEnd) -> EngineOutcome {
        EngineOutcome {
            end,
            sent: self.sent.total(),
            received: self.received.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn comparator(pattern: &[u8], target: Option<u64>, window: u64) -> Comparator {
        let config = SessionConfig::new(Mode::Comparator)
            .with_buffer_len(pattern.len())
            .with_window(window);
        Comparator::new(&config, pattern, target, ChunkSizer::new(1, false)).unwrap()
    }

    #[test]
    fn test_write_offer_limits() {
        let pattern: Vec<u8> = (0..64).collect();
        let mut c = comparator(&pattern, Some(100), 0);
        assert_eq!(c.write_offer(), 64);

        c.sent.advance(80);
        assert_eq!(c.write_offer(), 20);

        c.sent.advance(20);
        assert_eq!(c.write_offer(), 0);
        assert!(!c.wants_write());
    }

    #[test]
    fn test_window_caps_in_flight() {
        let pattern = [0u8; 64];
        let mut c = comparator(&pattern, None, 10);
        assert_eq!(c.write_offer(), 10);

        c.sent.advance(10);
        assert!(!c.wants_write());

        c.received.advance(4);
        assert_eq!(c.write_offer(), 4);
    }

    #[test]
    fn test_tail_below_min_chunk_still_written() {
        let config = SessionConfig::new(Mode::Comparator)
            .with_buffer_len(64)
            .with_min_chunk(32);
        let mut c =
            Comparator::new(&config, &[1u8; 64], Some(70), ChunkSizer::new(32, false)).unwrap();
        c.sent.advance(64);
        assert_eq!(c.write_offer(), 6);
        assert!(c.wants_write());
    }

    #[test]
    fn test_verify_reports_first_difference_across_wrap() {
        let pattern: Vec<u8> = (0..16).collect();
        let mut c = comparator(&pattern, None, 0);
        c.received.advance(12);
        c.sent.advance(40);

        // offsets 12..22 expected as 12,13,14,15,0,1,2,3,4,5
        let chunk = [12, 13, 14, 15, 0, 1, 0xEE, 3, 4, 5];
        c.scratch[..chunk.len()].copy_from_slice(&chunk);

        match c.verify(chunk.len()) {
            Err(Error::Integrity(report)) => {
                assert_eq!(report.offset, 18);
                assert_eq!(report.received, 12);
                assert_eq!(report.chunk_len, 10);
                assert_eq!(report.preceding.len(), MISMATCH_CONTEXT);
                assert!(report.preceding.iter().all(|b| !b.differs()));
                assert_eq!(report.preceding.last().unwrap().offset, 17);
                assert_eq!(report.diverging.len(), 4);
                assert_eq!(report.diverging[0].actual, 0xEE);
                assert_eq!(report.diverging[0].expected, 2);
                assert!(report.to_string().contains("@12:Ree(.)/S02(.) (diff)"));
            }
            other => panic!("expected integrity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_chunk_longer_than_pattern() {
        let pattern: Vec<u8> = (0..8).collect();
        let mut c = comparator(&pattern, None, 0);
        c.received.advance(5);

        let chunk = [5, 6, 7, 0, 1, 2, 3, 4, 5, 6, 7, 0];
        c.scratch = chunk.to_vec().into_boxed_slice();
        assert!(c.verify(chunk.len()).is_ok());

        c.scratch[11] = 9;
        match c.verify(chunk.len()) {
            Err(Error::Integrity(report)) => assert_eq!(report.offset, 16),
            other => panic!("expected integrity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_context_byte_display() {
        let b = ContextByte {
            offset: 0x1f,
            expected: b'A',
            actual: b'A',
        };
        assert_eq!(b.to_string(), "@1f:R41(A)/S41(A)");
    }
}
