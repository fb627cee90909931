//! Building endpoints from a [`TransportConfig`].

use crate::config::{Config, TransportConfig};
use crate::endpoint::{Endpoint, Readiness};
#[cfg(unix)]
use crate::serial::SerialPort;
#[cfg(unix)]
use crate::tunnel::{Tunnel, TunnelConfig};
use crate::{Error, Result};
use log::info;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// A boolean socket option and the value to give it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    NoDelay(bool),
    ReuseAddr(bool),
    ReusePort(bool),
}

impl SocketOption {
    pub fn value(&self) -> bool {
        match *self {
            SocketOption::NoDelay(v) | SocketOption::ReuseAddr(v) | SocketOption::ReusePort(v) => v,
        }
    }
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketOption::NoDelay(_) => "TCP_NODELAY",
            SocketOption::ReuseAddr(_) => "SO_REUSEADDR",
            SocketOption::ReusePort(_) => "SO_REUSEPORT",
        };
        f.write_str(name)
    }
}

fn unsupported(option: &SocketOption) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} cannot be set on this handle", option),
    )
}

/// A socket handle whose boolean options can be read and written.
pub trait SocketHandle {
    /// Current value of the option `option` refers to.
    fn option(&self, option: &SocketOption) -> io::Result<bool>;

    fn set_option(&self, option: &SocketOption) -> io::Result<()>;
}

impl SocketHandle for TcpSocket {
    fn option(&self, option: &SocketOption) -> io::Result<bool> {
        match option {
            SocketOption::ReuseAddr(_) => self.reuseaddr(),
            #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
            SocketOption::ReusePort(_) => self.reuseport(),
            _ => Err(unsupported(option)),
        }
    }

    fn set_option(&self, option: &SocketOption) -> io::Result<()> {
        match *option {
            SocketOption::ReuseAddr(v) => self.set_reuseaddr(v),
            #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
            SocketOption::ReusePort(v) => self.set_reuseport(v),
            _ => Err(unsupported(option)),
        }
    }
}

impl SocketHandle for TcpStream {
    fn option(&self, option: &SocketOption) -> io::Result<bool> {
        match option {
            SocketOption::NoDelay(_) => self.nodelay(),
            _ => Err(unsupported(option)),
        }
    }

    fn set_option(&self, option: &SocketOption) -> io::Result<()> {
        match *option {
            SocketOption::NoDelay(v) => self.set_nodelay(v),
            _ => Err(unsupported(option)),
        }
    }
}

/// Applies every option to `handle`, logging the value before and after.
pub fn apply_options<H: SocketHandle + ?Sized>(handle: &H, options: &[SocketOption]) -> Result<()> {
    for option in options {
        let before = handle.option(option)?;
        handle.set_option(option)?;
        let after = handle.option(option)?;
        info!(
            "flag {}: {} - set it to {} - re-read: {}",
            option,
            before,
            option.value(),
            after
        );
    }
    Ok(())
}

/// Binds a listening socket with address and port reuse and a backlog of one.
pub fn listen(bind: Option<IpAddr>, port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), port);
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };

    let mut options = vec![SocketOption::ReuseAddr(true)];
    if cfg!(all(unix, not(target_os = "solaris"), not(target_os = "illumos"))) {
        options.push(SocketOption::ReusePort(true));
    }
    apply_options(&socket, &options)?;

    socket
        .bind(addr)
        .map_err(|e| Error::Connection(format!("bind {}: {}", addr, e)))?;
    let listener = socket.listen(1)?;
    info!("listening on {}", addr);
    Ok(listener)
}

/// Waits for the next client and applies `nodelay` to its socket.
pub async fn accept(listener: &TcpListener, nodelay: bool) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept().await?;
    info!("remote client {} arrived", peer);
    if nodelay {
        apply_options(&stream, &[SocketOption::NoDelay(true)])?;
    }
    Ok((stream, peer))
}

pub async fn connect(host: &str, port: u16, nodelay: bool) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::Connection(format!("connect {}:{}: {}", host, port, e)))?;
    info!("connected to {}:{}", host, port);
    if nodelay {
        apply_options(&stream, &[SocketOption::NoDelay(true)])?;
    }
    Ok(stream)
}

/// Any endpoint the program can open.
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Serial(SerialPort),
    #[cfg(unix)]
    Tunnel(Tunnel),
}

impl Transport {
    /// Opens the endpoint for an outgoing transport.
    ///
    /// Server transports are opened by accepting; see [`listen`] and [`accept`].
    pub async fn open(config: &Config) -> Result<Self> {
        match &config.transport {
            TransportConfig::TcpClient { host, port } => {
                Ok(Transport::Tcp(connect(host, *port, config.nodelay).await?))
            }
            #[cfg(unix)]
            TransportConfig::Serial {
                device,
                baud,
                framing,
            } => Ok(Transport::Serial(SerialPort::open(device, *baud, *framing)?)),
            #[cfg(unix)]
            TransportConfig::Tunnel {
                host,
                port,
                method,
                baud,
                framing,
            } => {
                let tunnel = TunnelConfig {
                    host: host.clone(),
                    port: *port,
                    method: method.clone(),
                    baud: *baud,
                    framing: *framing,
                };
                Ok(Transport::Tunnel(Tunnel::open(&tunnel).await?))
            }
            #[cfg(not(unix))]
            TransportConfig::Serial { .. } | TransportConfig::Tunnel { .. } => Err(Error::Config(
                "serial devices and tunnels need a unix platform".to_string(),
            )),
            TransportConfig::TcpServer { .. } => Err(Error::Config(
                "a server transport is opened by accepting clients".to_string(),
            )),
        }
    }
}

impl Endpoint for Transport {
    async fn ready(&mut self, interest: Interest) -> io::Result<Readiness> {
        match self {
            Transport::Tcp(s) => Endpoint::ready(s, interest).await,
            #[cfg(unix)]
            Transport::Serial(s) => s.ready(interest).await,
            #[cfg(unix)]
            Transport::Tunnel(t) => t.ready(interest).await,
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => Endpoint::try_read(s, buf),
            #[cfg(unix)]
            Transport::Serial(s) => s.try_read(buf),
            #[cfg(unix)]
            Transport::Tunnel(t) => t.try_read(buf),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => Endpoint::try_write(s, buf),
            #[cfg(unix)]
            Transport::Serial(s) => s.try_write(buf),
            #[cfg(unix)]
            Transport::Tunnel(t) => t.try_write(buf),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => Endpoint::close(s).await,
            #[cfg(unix)]
            Transport::Serial(s) => s.close().await,
            #[cfg(unix)]
            Transport::Tunnel(t) => t.close().await,
        }
    }
}
