use crate::bandwidth::SessionStats;
use crate::config::{Config, TransportConfig};
use crate::endpoint::{flush_input, Endpoint};
use crate::pattern::generate;
use crate::session::{CallbackRef, ProgressCallback, Session, SessionEnd, SessionReport};
use crate::transport::Transport;
use crate::{Error, Result};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// How long the input has to stay quiet before flushing stops.
pub const FLUSH_IDLE: Duration = Duration::from_secs(1);

/// Runs one session over an already opened endpoint.
///
/// Flushes pending input first when configured, and prints the JSON summary
/// afterwards in JSON mode.
pub(crate) async fn run_one<E: Endpoint>(
    config: &Config,
    session: &Session,
    endpoint: &mut E,
    stats: SessionStats,
) -> Result<SessionReport> {
    if config.flush_input {
        if let Err(e) = flush_input(endpoint, FLUSH_IDLE).await {
            if let Err(close) = endpoint.close().await {
                debug!("closing after failed flush: {}", close);
            }
            return Err(e);
        }
    }

    let report = session.run(endpoint, stats).await?;

    if config.json {
        let json = serde_json::to_string_pretty(&report.summary())?;
        println!("{}", json);
    }
    Ok(report)
}

/// Opens an outgoing transport and runs sessions over it.
///
/// Covers TCP clients, serial devices and tunnels. With `repeat` set the
/// transport is reopened after every session that reached its target, and
/// bandwidth totals keep accumulating across sessions.
///
/// # Examples
///
/// ```no_run
/// use echoprobe::{Client, Config, Mode, TargetSize};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100".to_string(), 6969)
///     .with_mode(Mode::Comparator)
///     .with_target_size(TargetSize::Exact(100 << 20));
///
/// let report = Client::new(config)?.run().await?;
/// println!("{} after {} bytes", report.end, report.received);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    pattern: Arc<[u8]>,
    callback: Option<CallbackRef>,
    session_limit: Option<u64>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if matches!(config.transport, TransportConfig::TcpServer { .. }) {
            return Err(Error::Config(
                "a remote host, serial device or tunnel is required for client mode".to_string(),
            ));
        }
        let pattern = generate(config.session.buffer_len, config.pattern);
        Ok(Self {
            config,
            pattern,
            callback: None,
            session_limit: None,
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

    /// Stops repeating after `limit` sessions.
    pub fn with_session_limit(mut self, limit: u64) -> Self {
        self.session_limit = Some(limit);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs until a session ends other than by reaching its target, or
    /// after the first session when not repeating.
    ///
    /// Returns the report of the last session. An integrity failure is
    /// returned as [`Error::Integrity`].
    pub async fn run(&self) -> Result<SessionReport> {
        let mut session = Session::new(self.config.session.clone(), self.pattern.clone())?;
        if let Some(callback) = &self.callback {
            session = session.with_callback_ref(callback.clone());
        }

        let mut stats = SessionStats::new(self.config.session.interval);
        let mut count = 0u64;
        loop {
            let mut transport = Transport::open(&self.config).await?;
            let report = run_one(&self.config, &session, &mut transport, stats).await?;
            count += 1;

            let again = self.config.repeat
                && report.end == SessionEnd::TargetReached
                && self.session_limit.map_or(true, |limit| count < limit);
            if !again {
                return Ok(report);
            }
            info!("session {} complete, repeating", count);
            stats = report.into_stats();
        }
    }
}
