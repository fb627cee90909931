//! TLS stream carried by an external `socat` process.
//!
//! `socat` connects to the remote host and exposes the decrypted stream on a
//! pseudo-terminal link, which is then driven like a serial device.

use crate::config::SerialFraming;
use crate::endpoint::{Endpoint, Readiness};
use crate::serial::SerialPort;
use crate::{Error, Result};
use log::{debug, info, warn};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::Interest;
use tokio::process::{Child, Command};
use tokio::time;

const OPEN_ATTEMPTS: usize = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(10);
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Parameters for one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub host: String,
    pub port: u16,
    /// socat TLS method, e.g. `TLS1.2`
    pub method: String,
    pub baud: u32,
    pub framing: SerialFraming,
}

impl TunnelConfig {
    /// Path of the pseudo-terminal link, unique per process.
    pub fn link_path(&self) -> PathBuf {
        std::env::temp_dir().join(format!("echoprobe-socat-{}", std::process::id()))
    }

    /// The two socat address arguments.
    pub fn socat_args(&self) -> [String; 2] {
        [
            format!(
                "pty,link={},unlink-close,wait-slave",
                self.link_path().display()
            ),
            format!(
                "ssl:{}:{},method={},verify=0,reuseaddr",
                self.host, self.port, self.method
            ),
        ]
    }
}

/// A running `socat` child and the pty link it created.
pub struct Tunnel {
    child: Child,
    port: SerialPort,
}

impl Tunnel {
    /// Spawns socat and opens its link, retrying while socat creates it.
    pub async fn open(config: &TunnelConfig) -> Result<Self> {
        let [pty, ssl] = config.socat_args();
        info!("exec: socat {} {}", pty, ssl);

        let mut child = Command::new("socat")
            .arg(&pty)
            .arg(&ssl)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Connection(format!("exec(socat): {}", e)))?;

        let link = config.link_path();
        let mut last_error = None;
        for attempt in 1..=OPEN_ATTEMPTS {
            time::sleep(OPEN_RETRY_DELAY).await;
            match SerialPort::open(&link, config.baud, config.framing) {
                Ok(port) => return Ok(Self { child, port }),
                Err(e) => {
                    debug!("opening {} (attempt {}): {}", link.display(), attempt, e);
                    last_error = Some(e);
                }
            }
        }

        if let Err(e) = child.kill().await {
            warn!("killing socat: {}", e);
        }
        Err(last_error.unwrap_or_else(|| {
            Error::Connection(format!("socat link {} never appeared", link.display()))
        }))
    }

    /// Interrupts socat and waits briefly for it to exit, killing it otherwise.
    async fn terminate(&mut self) -> io::Result<()> {
        if let Some(pid) = self.child.id() {
            // SAFETY: plain signal delivery to our own child
            if unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) } == -1 {
                debug!("SIGINT to socat: {}", io::Error::last_os_error());
            }
        }
        match time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("socat exited: {}", status);
                Ok(())
            }
            Err(_) => {
                warn!("socat ignored SIGINT, killing it");
                self.child.kill().await
            }
        }
    }
}

impl Endpoint for Tunnel {
    async fn ready(&mut self, interest: Interest) -> io::Result<Readiness> {
        self.port.ready(interest).await
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.try_write(buf)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.port.close().await?;
        self.terminate().await
    }
}
