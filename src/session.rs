//! One engine run against one endpoint.
//!
//! A [`Session`] resolves the per-session parameters, hands the endpoint to
//! the engine selected by [`Mode`], and turns the outcome into a
//! [`SessionReport`]. Byte counters come in as a [`SessionStats`] value and go
//! back out in the report, so whoever repeats sessions decides whether totals
//! carry over. The session's own reporting interval always replaces the one
//! the incoming stats were built with.

use crate::bandwidth::{BandwidthSnapshot, SessionStats};
use crate::comparator::Comparator;
use crate::config::{Mode, SessionConfig, TargetSize};
use crate::endpoint::Endpoint;
use crate::probe::{Sink, Source};
use crate::responder::Responder;
use crate::ring::ChunkSizer;
use crate::{Error, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;

/// Progress event types reported while a session runs.
///
/// # Examples
///
/// ```no_run
/// use echoprobe::{Mode, ProgressEvent, Session, SessionConfig};
/// use echoprobe::bandwidth::SessionStats;
/// use echoprobe::pattern::{generate, PatternKind};
/// use std::time::Duration;
/// use tokio::net::TcpStream;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::new(Mode::Comparator);
/// let pattern = generate(config.buffer_len, PatternKind::Random);
///
/// let session = Session::new(config, pattern)?.with_callback(|event: ProgressEvent| {
///     if let ProgressEvent::Bandwidth(snapshot) = event {
///         println!("{}", snapshot);
///     }
/// });
///
/// let mut stream = TcpStream::connect("127.0.0.1:6969").await?;
/// session.run(&mut stream, SessionStats::new(Duration::from_secs(1))).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The engine is about to start; `target` is the resolved byte count.
    SessionStarted { mode: Mode, target: Option<u64> },
    /// Periodic bandwidth figures.
    Bandwidth(BandwidthSnapshot),
    /// A read completed with this many bytes.
    BlockRead(usize),
    /// A write completed with this many bytes.
    BlockWritten(usize),
    /// The engine stopped without an integrity failure.
    SessionEnded {
        end: SessionEnd,
        sent: u64,
        received: u64,
    },
}

/// Callback trait for receiving progress updates during a session.
///
/// Implemented automatically for closures taking a [`ProgressEvent`].
///
/// ```
/// use echoprobe::{ProgressCallback, ProgressEvent};
///
/// struct Counter;
///
/// impl ProgressCallback for Counter {
///     fn on_progress(&self, _event: ProgressEvent) {}
/// }
/// ```
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

pub type CallbackRef = Arc<dyn ProgressCallback>;

/// Fans engine events out to the optional callback.
#[derive(Clone, Default)]
pub struct Notifier {
    callback: Option<CallbackRef>,
    report_sizes: bool,
}

impl Notifier {
    pub fn new(callback: Option<CallbackRef>, report_sizes: bool) -> Self {
        Self {
            callback,
            report_sizes,
        }
    }

    /// A notifier that drops every event.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    pub(crate) fn block_read(&self, n: usize) {
        if self.report_sizes {
            self.emit(ProgressEvent::BlockRead(n));
        }
    }

    pub(crate) fn block_written(&self, n: usize) {
        if self.report_sizes {
            self.emit(ProgressEvent::BlockWritten(n));
        }
    }

    /// Emits a bandwidth snapshot if one is due, or unconditionally with `force`.
    pub(crate) fn maybe_report(&self, stats: &mut SessionStats, force: bool) {
        if let Some(snapshot) = stats.maybe_report(Instant::now(), force) {
            self.emit(ProgressEvent::Bandwidth(snapshot));
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SessionEnd {
    /// Both directions reached the target size
    TargetReached,
    /// The peer closed the stream
    PeerClosed,
    /// An I/O error other than would-block
    TransportError(String),
}

impl SessionEnd {
    pub fn is_transport_error(&self) -> bool {
        matches!(self, SessionEnd::TransportError(_))
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::TargetReached => f.write_str("target reached"),
            SessionEnd::PeerClosed => f.write_str("peer closed"),
            SessionEnd::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Result of one non-blocking I/O attempt.
#[derive(Debug)]
pub(crate) enum Step {
    Moved(usize),
    Blocked,
    Closed,
    Failed(io::Error),
}

impl Step {
    /// Classifies an attempt that asked for a non-empty transfer.
    pub(crate) fn from_attempt(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => Step::Closed,
            Ok(n) => Step::Moved(n),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Step::Blocked
            }
            Err(e) => Step::Failed(e),
        }
    }
}

/// What an engine hands back when it stops without an integrity failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutcome {
    pub end: SessionEnd,
    pub sent: u64,
    pub received: u64,
}

/// Runs one engine over one endpoint.
pub struct Session {
    config: SessionConfig,
    pattern: Arc<[u8]>,
    callback: Option<CallbackRef>,
    seed: Option<u64>,
}

impl Session {
    /// Checks `config` and pairs it with the shared, read-only pattern.
    pub fn new(config: SessionConfig, pattern: Arc<[u8]>) -> Result<Self> {
        config.validate()?;
        if pattern.len() != config.buffer_len {
            return Err(Error::Config(format!(
                "pattern is {} bytes but the buffer length is {}",
                pattern.len(),
                config.buffer_len
            )));
        }
        Ok(Self {
            config,
            pattern,
            callback: None,
            seed: None,
        })
    }

    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_callback_ref(mut self, callback: CallbackRef) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Makes target resolution and chunk sizes reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the configured engine until it reaches a terminal condition and
    /// closes the endpoint.
    ///
    /// Peer close and transport errors come back as a [`SessionReport`]. A
    /// corrupted byte returns [`Error::Integrity`] with the full report.
    pub async fn run<E: Endpoint>(
        &self,
        endpoint: &mut E,
        stats: SessionStats,
    ) -> Result<SessionReport> {
        let mut stats = stats.with_interval(self.config.interval);
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut sizer =
            ChunkSizer::with_rng(self.config.min_chunk, self.config.random_chunks, rng);
        let notifier = Notifier::new(self.callback.clone(), self.config.report_sizes);

        let target = match self.config.mode {
            Mode::Comparator => self.config.target_size.resolve(sizer.rng()),
            _ => None,
        };
        if let (TargetSize::RandomUpTo(bound), Some(n)) = (self.config.target_size, target) {
            info!("random target size {} (up to {})", n, bound);
        }

        debug!(
            "starting {} session, buffer {} bytes, window {}",
            self.config.mode, self.config.buffer_len, self.config.window
        );
        notifier.emit(ProgressEvent::SessionStarted {
            mode: self.config.mode,
            target,
        });

        let result = match self.config.mode {
            Mode::Comparator => {
                Comparator::new(&self.config, &self.pattern, target, sizer)?
                    .run(endpoint, &mut stats, &notifier)
                    .await
            }
            Mode::Responder => {
                Responder::new(&self.config, sizer)?
                    .run(endpoint, &mut stats, &notifier)
                    .await
            }
            Mode::Sink => {
                Sink::new(&self.config, sizer)
                    .run(endpoint, &mut stats, &notifier)
                    .await
            }
            Mode::Source => {
                Source::new(&self.config, &self.pattern, sizer)
                    .run(endpoint, &mut stats, &notifier)
                    .await
            }
        };

        if let Err(e) = endpoint.close().await {
            debug!("closing endpoint: {}", e);
        }
        notifier.maybe_report(&mut stats, true);

        let outcome = result?;
        match &outcome.end {
            SessionEnd::TransportError(e) => warn!("session ended: {}", e),
            end => info!(
                "session ended: {}, sent {} received {}",
                end, outcome.sent, outcome.received
            ),
        }
        notifier.emit(ProgressEvent::SessionEnded {
            end: outcome.end.clone(),
            sent: outcome.sent,
            received: outcome.received,
        });

        Ok(SessionReport {
            mode: self.config.mode,
            end: outcome.end,
            target,
            sent: outcome.sent,
            received: outcome.received,
            stats,
        })
    }
}

/// What one session did.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub mode: Mode,
    pub end: SessionEnd,
    /// Resolved target size, if the session had one
    pub target: Option<u64>,
    pub sent: u64,
    pub received: u64,
    /// Counters after the session, ready to carry into the next one
    pub stats: SessionStats,
}

impl SessionReport {
    pub fn into_stats(self) -> SessionStats {
        self.stats
    }

    /// Final figures in a serializable form.
    pub fn summary(&self) -> SessionSummary {
        let snapshot = self.stats.snapshot(Instant::now());
        SessionSummary {
            timestamp: chrono::Local::now().to_rfc2822(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            mode: self.mode,
            end: self.end.clone(),
            target: self.target,
            sent: self.sent,
            received: self.received,
            total_bytes: snapshot.total_bytes,
            elapsed_secs: snapshot.elapsed.as_secs_f64(),
            average_bps: snapshot.average_bps,
        }
    }
}

/// JSON-friendly summary printed after each session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub timestamp: String,
    pub host: String,
    pub mode: Mode,
    pub end: SessionEnd,
    pub target: Option<u64>,
    pub sent: u64,
    pub received: u64,
    /// Bytes counted across every session sharing these stats
    pub total_bytes: u64,
    pub elapsed_secs: f64,
    pub average_bps: Option<f64>,
}
