//! The transport contract every engine drives.
//!
//! An [`Endpoint`] is a full-duplex byte stream used in non-blocking mode:
//! engines wait for readiness, then make single read or write attempts. A
//! `WouldBlock` error from an attempt is a normal outcome that just defers
//! that direction to the next iteration.

use crate::{Error, Result};
use log::info;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, Interest, Ready};
use tokio::net::TcpStream;
use tokio::time;

/// Directions an endpoint reported as ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const NONE: Readiness = Readiness {
        readable: false,
        writable: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    /// Folds tokio's readiness into the two directions engines care about.
    ///
    /// Closed and error states count as ready so that the next attempt
    /// surfaces them as a zero-length read or an error.
    pub fn from_ready(ready: Ready) -> Self {
        Self {
            readable: ready.is_readable() || ready.is_read_closed() || ready.is_error(),
            writable: ready.is_writable() || ready.is_write_closed(),
        }
    }
}

/// A duplex byte stream with non-blocking attempts.
///
/// `try_read` returns `Ok(0)` when the peer closed the stream. Both attempts
/// return an error of kind [`io::ErrorKind::WouldBlock`] when nothing can be
/// moved right now; short transfers are allowed.
pub trait Endpoint: Send {
    /// Waits until at least one direction in `interest` is ready.
    fn ready(&mut self, interest: Interest) -> impl Future<Output = io::Result<Readiness>> + Send;

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Builds the interest set for the requested directions.
///
/// Returns `None` when neither direction is wanted.
pub fn interest(read: bool, write: bool) -> Option<Interest> {
    match (read, write) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

/// Waits for readiness, giving up quietly after `timeout`.
///
/// A timeout yields [`Readiness::NONE`]; it only exists so callers get a
/// chance to report progress on an idle stream.
pub async fn wait_ready<E: Endpoint>(
    endpoint: &mut E,
    interest: Interest,
    timeout: Duration,
) -> io::Result<Readiness> {
    match time::timeout(timeout, endpoint.ready(interest)).await {
        Ok(result) => result,
        Err(_) => Ok(Readiness::NONE),
    }
}

/// Reads and discards everything the endpoint delivers until it has been
/// idle for `idle`.
///
/// Returns the number of bytes thrown away. A peer closing the stream while
/// flushing is an error, since there would be nothing left to test.
pub async fn flush_input<E: Endpoint>(endpoint: &mut E, idle: Duration) -> Result<u64> {
    info!("flushing input...");
    let mut buf = [0u8; 1024];
    let mut flushed = 0u64;

    loop {
        let readiness = wait_ready(endpoint, Interest::READABLE, idle).await?;
        if !readiness.readable {
            info!("...done, flushed {} bytes", flushed);
            return Ok(flushed);
        }

        match endpoint.try_read(&mut buf) {
            Ok(0) => {
                return Err(Error::Connection(
                    "peer closed the stream while flushing input".to_string(),
                ))
            }
            Ok(n) => {
                info!("flushed {} bytes", n);
                flushed += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
    }
}

impl Endpoint for TcpStream {
    async fn ready(&mut self, interest: Interest) -> io::Result<Readiness> {
        let ready = TcpStream::ready(self, interest).await?;
        Ok(Readiness::from_ready(ready))
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    async fn close(&mut self) -> io::Result<()> {
        match AsyncWriteExt::shutdown(self).await {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
