//! Relay engine: sends back everything it receives, in order.

use crate::bandwidth::SessionStats;
use crate::config::SessionConfig;
use crate::endpoint::{interest, wait_ready, Endpoint};
use crate::ring::{ChunkSizer, RelayRing};
use crate::session::{EngineOutcome, Notifier, SessionEnd, Step};
use crate::Result;
use log::debug;
use std::time::Duration;

/// Buffers incoming bytes in a [`RelayRing`] and writes them back out.
///
/// Reads pause while the ring is full. Writes wait until the contiguous
/// filled span reaches the minimum chunk, except for the run up to the end
/// of the ring and the final drain. Once the peer closes its sending side the responder stops reading,
/// drains what it still holds, then ends with [`SessionEnd::PeerClosed`].
pub struct Responder {
    ring: RelayRing,
    sizer: ChunkSizer,
    poll_timeout: Duration,
    peer_done: bool,
    max_occupied: usize,
}

impl Responder {
    pub fn new(config: &SessionConfig, sizer: ChunkSizer) -> Result<Self> {
        Ok(Self {
            ring: RelayRing::new(config.buffer_len)?,
            sizer,
            poll_timeout: config.poll_timeout,
            peer_done: false,
            max_occupied: 0,
        })
    }

    /// Highest ring occupancy seen so far.
    pub fn max_occupied(&self) -> usize {
        self.max_occupied
    }

    pub async fn run<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        stats: &mut SessionStats,
        notifier: &Notifier,
    ) -> Result<EngineOutcome> {
        loop {
            let want_read = !self.peer_done && !self.ring.is_full();
            let want_write = self.wants_write();
            let Some(interest) = interest(want_read, want_write) else {
                debug!("peer closed and ring drained");
                return Ok(self.outcome(SessionEnd::PeerClosed));
            };

            let readiness = match wait_ready(endpoint, interest, self.poll_timeout).await {
                Ok(readiness) => readiness,
                Err(e) => return Ok(self.outcome(SessionEnd::TransportError(e.to_string()))),
            };

            if readiness.readable && want_read {
                let span = self.ring.free_span_mut();
                let len = self.sizer.pick(span.len());
                match Step::from_attempt(endpoint.try_read(&mut span[..len])) {
                    Step::Moved(n) => {
                        self.ring.commit(n);
                        self.max_occupied = self.max_occupied.max(self.ring.occupied());
                        notifier.block_read(n);
                    }
                    Step::Closed => {
                        debug!("peer closed, {} bytes left to relay", self.ring.occupied());
                        self.peer_done = true;
                    }
                    Step::Failed(e) => {
                        return Ok(self.outcome(SessionEnd::TransportError(e.to_string())))
                    }
                    Step::Blocked => {}
                }
            }

            if readiness.writable && self.wants_write() {
                let span = self.ring.filled_span();
                let len = self.sizer.pick(span.len());
                match Step::from_attempt(endpoint.try_write(&span[..len])) {
                    Step::Moved(n) => {
                        self.ring.consume(n);
                        stats.record(n as u64);
                        notifier.block_written(n);
                    }
                    Step::Closed => return Ok(self.outcome(SessionEnd::PeerClosed)),
                    Step::Failed(e) => {
                        return Ok(self.outcome(SessionEnd::TransportError(e.to_string())))
                    }
                    Step::Blocked => {}
                }
            }

            notifier.maybe_report(stats, false);
        }
    }

    /// Smallest write worth attempting.
    ///
    /// Bytes before the ring boundary cannot grow into a longer span, and
    /// after the peer closed nothing more will arrive, so both lower the
    /// floor to what is left.
    fn write_floor(&self) -> usize {
        let to_boundary = self.ring.capacity() - self.ring.read_cursor().position();
        let floor = self.sizer.min_chunk().max(1).min(to_boundary);
        if self.peer_done {
            floor.min(self.ring.occupied())
        } else {
            floor
        }
    }

    fn wants_write(&self) -> bool {
        !self.ring.is_empty() && self.ring.filled_span().len() >= self.write_floor()
    }

    fn outcome(&self, end: SessionEnd) -> EngineOutcome {
        EngineOutcome {
            end,
            sent: self.ring.read_cursor().total(),
            received: self.ring.write_cursor().total(),
        }
    }
}
