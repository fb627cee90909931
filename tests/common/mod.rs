// Mock endpoints shared by the integration tests.
// State lives behind Arc<Mutex<_>> so tests can inspect it after a session.
#![allow(dead_code)]

use echoprobe::{Endpoint, Readiness};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::Interest;

/// Counters and knobs of a [`Loopback`].
#[derive(Debug, Default)]
pub struct LoopbackState {
    queue: VecDeque<u8>,
    /// Most bytes moved by one read or write call
    pub chunk: usize,
    /// Most bytes queued before writes block
    pub capacity: usize,
    pub reads: usize,
    pub writes: usize,
    pub written: u64,
    pub delivered: u64,
    /// Largest `written - delivered` right after a write
    pub max_in_flight: u64,
    /// Flip the byte written at this absolute offset
    pub corrupt_at: Option<u64>,
    /// Report end of stream once this many bytes were delivered
    pub close_after: Option<u64>,
    /// Fail writes once this many bytes were written
    pub fail_after: Option<u64>,
    pub closed: bool,
}

impl LoopbackState {
    fn read_closed(&self) -> bool {
        self.close_after.map_or(false, |limit| self.delivered >= limit)
    }
}

/// Identity channel: whatever is written comes back out, in order.
#[derive(Clone)]
pub struct Loopback {
    pub state: Arc<Mutex<LoopbackState>>,
}

impl Loopback {
    pub fn new(chunk: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState {
                chunk,
                capacity: 1 << 20,
                ..Default::default()
            })),
        }
    }

    pub fn corrupting(self, offset: u64) -> Self {
        self.state.lock().unwrap().corrupt_at = Some(offset);
        self
    }

    pub fn closing_after(self, bytes: u64) -> Self {
        self.state.lock().unwrap().close_after = Some(bytes);
        self
    }

    pub fn failing_after(self, bytes: u64) -> Self {
        self.state.lock().unwrap().fail_after = Some(bytes);
        self
    }

    pub fn with_capacity(self, capacity: usize) -> Self {
        self.state.lock().unwrap().capacity = capacity;
        self
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn max_in_flight(&self) -> u64 {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Endpoint for Loopback {
    async fn ready(&mut self, interest: Interest) -> io::Result<Readiness> {
        let readiness = {
            let s = self.state.lock().unwrap();
            Readiness {
                readable: interest.is_readable() && (!s.queue.is_empty() || s.read_closed()),
                writable: interest.is_writable() && s.queue.len() < s.capacity,
            }
        };
        if readiness.is_empty() {
            // nothing will ever change; let the caller's timeout fire
            std::future::pending::<()>().await;
        }
        Ok(readiness)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s = self.state.lock().unwrap();
        s.reads += 1;
        if s.read_closed() {
            return Ok(0);
        }
        let mut n = buf.len().min(s.chunk).min(s.queue.len());
        if let Some(limit) = s.close_after {
            n = n.min((limit - s.delivered) as usize);
        }
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        for (slot, byte) in buf.iter_mut().zip(s.queue.drain(..n)) {
            *slot = byte;
        }
        s.delivered += n as u64;
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut s = self.state.lock().unwrap();
        s.writes += 1;
        if s.fail_after.map_or(false, |limit| s.written >= limit) {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        let space = s.capacity - s.queue.len();
        let n = buf.len().min(s.chunk).min(space);
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        for (i, &byte) in buf[..n].iter().enumerate() {
            let offset = s.written + i as u64;
            let byte = if s.corrupt_at == Some(offset) { byte ^ 0xFF } else { byte };
            s.queue.push_back(byte);
        }
        s.written += n as u64;
        s.max_in_flight = s.max_in_flight.max(s.written - s.delivered);
        Ok(n)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// State of a [`Peer`].
#[derive(Debug, Default)]
pub struct PeerState {
    input: VecDeque<u8>,
    /// Everything the engine wrote
    pub output: Vec<u8>,
    /// Each successful write, as written
    pub writes: Vec<Vec<u8>>,
    pub chunk: usize,
    /// Accept writes only once the engine holds this many unsent bytes,
    /// or once the input is exhausted
    pub lag: u64,
    /// Report end of stream once the output reaches this size
    pub output_limit: Option<usize>,
    /// Length of every write attempt, and whether end of stream had
    /// already been reported when it was made
    pub attempts: Vec<(usize, bool)>,
    pub eof_reported: bool,
    pub delivered: u64,
    pub closed: bool,
}

/// Remote side with a fixed input script that records what comes back.
///
/// Reads report end of stream after the input runs out.
#[derive(Clone)]
pub struct Peer {
    pub state: Arc<Mutex<PeerState>>,
}

impl Peer {
    pub fn new(input: &[u8], chunk: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PeerState {
                input: input.iter().copied().collect(),
                chunk,
                ..Default::default()
            })),
        }
    }

    /// A peer that only listens.
    pub fn listening(chunk: usize) -> Self {
        Self::new(&[], chunk)
    }

    pub fn with_lag(self, lag: u64) -> Self {
        self.state.lock().unwrap().lag = lag;
        self
    }

    pub fn with_output_limit(self, limit: usize) -> Self {
        self.state.lock().unwrap().output_limit = Some(limit);
        self
    }

    pub fn output(&self) -> Vec<u8> {
        self.state.lock().unwrap().output.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn attempts(&self) -> Vec<(usize, bool)> {
        self.state.lock().unwrap().attempts.clone()
    }
}

impl PeerState {
    fn writable(&self) -> bool {
        if self.output_limit.map_or(false, |limit| self.output.len() >= limit) {
            // let the next write report the close
            return true;
        }
        self.input.is_empty() || self.delivered - self.output.len() as u64 >= self.lag
    }
}

impl Endpoint for Peer {
    async fn ready(&mut self, interest: Interest) -> io::Result<Readiness> {
        let readiness = {
            let s = self.state.lock().unwrap();
            Readiness {
                // an exhausted input reads as end of stream
                readable: interest.is_readable(),
                writable: interest.is_writable() && s.writable(),
            }
        };
        if readiness.is_empty() {
            std::future::pending::<()>().await;
        }
        Ok(readiness)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s = self.state.lock().unwrap();
        let n = buf.len().min(s.chunk).min(s.input.len());
        for (slot, byte) in buf.iter_mut().zip(s.input.drain(..n)) {
            *slot = byte;
        }
        s.delivered += n as u64;
        if n == 0 && !buf.is_empty() {
            s.eof_reported = true;
        }
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut s = self.state.lock().unwrap();
        let eof = s.eof_reported;
        s.attempts.push((buf.len(), eof));
        if !s.writable() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut n = buf.len().min(s.chunk);
        if let Some(limit) = s.output_limit {
            n = n.min(limit.saturating_sub(s.output.len()));
        }
        s.output.extend_from_slice(&buf[..n]);
        if n > 0 {
            s.writes.push(buf[..n].to_vec());
        }
        Ok(n)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
