use crate::bandwidth::SessionStats;
use crate::client::run_one;
use crate::config::{Config, TransportConfig};
use crate::pattern::generate;
use crate::session::{CallbackRef, ProgressCallback, Session, SessionReport};
use crate::transport::{accept, listen};
use crate::{Error, Result};
use log::{error, info};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;

/// TCP server running one session per client, one client at a time.
///
/// Every client starts with fresh bandwidth totals. A transport problem with
/// one client is logged and the server moves on to the next; an integrity
/// failure stops the server.
///
/// # Examples
///
/// ```no_run
/// use echoprobe::{Config, Mode, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(6969).with_mode(Mode::Responder))?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    bind: Option<IpAddr>,
    port: u16,
    pattern: Arc<[u8]>,
    callback: Option<CallbackRef>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (bind, port) = match config.transport {
            TransportConfig::TcpServer { bind, port } => (bind, port),
            _ => {
                return Err(Error::Config(
                    "server mode needs a TCP server transport".to_string(),
                ))
            }
        };
        let pattern = generate(config.session.buffer_len, config.pattern);
        Ok(Self {
            config,
            bind,
            port,
            pattern,
            callback: None,
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

    /// Binds the listening socket.
    pub fn bind(&self) -> Result<TcpListener> {
        listen(self.bind, self.port)
    }

    /// Binds and serves clients forever.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(&listener, None).await
    }

    /// Serves clients from `listener`, stopping after `limit` sessions if given.
    pub async fn serve(&self, listener: &TcpListener, limit: Option<u64>) -> Result<()> {
        let session = self.session()?;
        let mut served = 0u64;

        while limit.map_or(true, |limit| served < limit) {
            let (mut stream, peer) = match accept(listener, self.config.nodelay).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    continue;
                }
            };
            served += 1;

            let stats = SessionStats::new(self.config.session.interval);
            match run_one(&self.config, &session, &mut stream, stats).await {
                Ok(report) => log_report(peer, &report),
                Err(e) if e.is_integrity_failure() => return Err(e),
                Err(e) => error!("Error handling client {}: {}", peer, e),
            }
        }
        Ok(())
    }

    fn session(&self) -> Result<Session> {
        let session = Session::new(self.config.session.clone(), self.pattern.clone())?;
        Ok(match &self.callback {
            Some(callback) => session.with_callback_ref(callback.clone()),
            None => session,
        })
    }
}

fn log_report(peer: SocketAddr, report: &SessionReport) {
    info!(
        "client {} done ({}): sent {} received {}",
        peer, report.end, report.sent, report.received
    );
}
