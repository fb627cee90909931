//! One-directional baseline engines.

use crate::bandwidth::SessionStats;
use crate::config::SessionConfig;
use crate::endpoint::{wait_ready, Endpoint};
use crate::ring::ChunkSizer;
use crate::session::{EngineOutcome, Notifier, SessionEnd, Step};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::Interest;

/// Receives and discards.
pub struct Sink {
    buf: Box<[u8]>,
    sizer: ChunkSizer,
    poll_timeout: Duration,
    received: u64,
}

impl Sink {
    pub fn new(config: &SessionConfig, sizer: ChunkSizer) -> Self {
        Self {
            buf: vec![0u8; config.buffer_len].into_boxed_slice(),
            sizer,
            poll_timeout: config.poll_timeout,
            received: 0,
        }
    }

    pub async fn run<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        stats: &mut SessionStats,
        notifier: &Notifier,
    ) -> Result<EngineOutcome> {
        loop {
            let end = match wait_ready(endpoint, Interest::READABLE, self.poll_timeout).await {
                Ok(readiness) if readiness.readable => {
                    let len = self.sizer.pick(self.buf.len());
                    match Step::from_attempt(endpoint.try_read(&mut self.buf[..len])) {
                        Step::Moved(n) => {
                            self.received += n as u64;
                            stats.record(n as u64);
                            notifier.block_read(n);
                            None
                        }
                        Step::Blocked => None,
                        Step::Closed => Some(SessionEnd::PeerClosed),
                        Step::Failed(e) => Some(SessionEnd::TransportError(e.to_string())),
                    }
                }
                Ok(_) => None,
                Err(e) => Some(SessionEnd::TransportError(e.to_string())),
            };

            if let Some(end) = end {
                return Ok(EngineOutcome {
                    end,
                    sent: 0,
                    received: self.received,
                });
            }
            notifier.maybe_report(stats, false);
        }
    }
}

/// Transmits the pattern over and over, always from its first byte.
pub struct Source {
    pattern: Arc<[u8]>,
    sizer: ChunkSizer,
    poll_timeout: Duration,
    sent: u64,
}

impl Source {
    pub fn new(config: &SessionConfig, pattern: &Arc<[u8]>, sizer: ChunkSizer) -> Self {
        Self {
            pattern: Arc::clone(pattern),
            sizer,
            poll_timeout: config.poll_timeout,
            sent: 0,
        }
    }

    pub async fn run<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
        stats: &mut SessionStats,
        notifier: &Notifier,
    ) -> Result<EngineOutcome> {
        loop {
            let end = match wait_ready(endpoint, Interest::WRITABLE, self.poll_timeout).await {
                Ok(readiness) if readiness.writable => {
                    let len = self.sizer.pick(self.pattern.len());
                    match Step::from_attempt(endpoint.try_write(&self.pattern[..len])) {
                        Step::Moved(n) => {
                            self.sent += n as u64;
                            stats.record(n as u64);
                            notifier.block_written(n);
                            None
                        }
                        Step::Blocked => None,
                        Step::Closed => Some(SessionEnd::PeerClosed),
                        Step::Failed(e) => Some(SessionEnd::TransportError(e.to_string())),
                    }
                }
                Ok(_) => None,
                Err(e) => Some(SessionEnd::TransportError(e.to_string())),
            };

            if let Some(end) = end {
                return Ok(EngineOutcome {
                    end,
                    sent: self.sent,
                    received: 0,
                });
            }
            notifier.maybe_report(stats, false);
        }
    }
}
