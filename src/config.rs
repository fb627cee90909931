use crate::pattern::PatternKind;
use crate::{Error, Result};
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 6969;

/// Default pattern and ring length in bytes.
pub const DEFAULT_BUFFER_LEN: usize = 1024;

/// Default serial line speed.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default serial framing (data bits, parity, stop bits).
pub const DEFAULT_FRAMING: &str = "8n1";

/// Line speeds accepted for serial devices.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    1_000_000, 921_600, 576_000, 500_000, 460_800, 230_400, 115_200, 57_600, 38_400, 19_200,
    9_600, 4_800, 2_400,
];

/// Engine run by a session.
///
/// # Examples
///
/// ```
/// use echoprobe::{Mode, SessionConfig};
///
/// let config = SessionConfig::new(Mode::Responder);
/// assert_eq!(config.mode, Mode::Responder);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Send the pattern and verify that it comes back unchanged
    Comparator,
    /// Send back whatever is received
    Responder,
    /// Receive and discard
    Sink,
    /// Transmit only
    Source,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Comparator => "comparator",
            Mode::Responder => "responder",
            Mode::Sink => "sink",
            Mode::Source => "source",
        };
        f.write_str(name)
    }
}

/// How many bytes a comparator session moves before it completes.
///
/// Built from the signed command-line value: positive is an exact size,
/// negative an upper bound for a size drawn once per session, zero unbounded.
///
/// # Examples
///
/// ```
/// use echoprobe::TargetSize;
///
/// assert_eq!(TargetSize::from(4096), TargetSize::Exact(4096));
/// assert_eq!(TargetSize::from(-100), TargetSize::RandomUpTo(100));
/// assert_eq!(TargetSize::from(0), TargetSize::Unbounded);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSize {
    #[default]
    Unbounded,
    Exact(u64),
    RandomUpTo(u64),
}

impl From<i64> for TargetSize {
    fn from(size: i64) -> Self {
        match size {
            0 => TargetSize::Unbounded,
            n if n > 0 => TargetSize::Exact(n as u64),
            n => TargetSize::RandomUpTo(n.unsigned_abs()),
        }
    }
}

impl TargetSize {
    pub fn is_bounded(&self) -> bool {
        !matches!(self, TargetSize::Unbounded)
    }

    /// Fixes the byte count for one session.
    ///
    /// [`TargetSize::RandomUpTo`] draws uniformly from `[1, bound]`.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        match *self {
            TargetSize::Unbounded => None,
            TargetSize::Exact(n) => Some(n),
            TargetSize::RandomUpTo(bound) => Some(rng.gen_range(1..=bound.max(1))),
        }
    }
}

/// Parameters of one engine run.
///
/// # Examples
///
/// ```
/// use echoprobe::{Mode, SessionConfig, TargetSize};
///
/// let config = SessionConfig::new(Mode::Comparator)
///     .with_target_size(TargetSize::Exact(1 << 20))
///     .with_window(4096)
///     .with_random_chunks(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mode: Mode,

    /// Bytes to move before completing (comparator only)
    pub target_size: TargetSize,

    /// Maximum bytes in flight, 0 for no limit (comparator only)
    pub window: u64,

    /// Smallest write worth attempting, and the floor for random chunk sizes
    pub min_chunk: usize,

    /// Draw a random size for each read and write attempt
    pub random_chunks: bool,

    /// Emit an event for every completed read and write
    pub report_sizes: bool,

    /// Pattern and ring length, a power of two
    pub buffer_len: usize,

    /// Spacing of bandwidth snapshots, applied to the stats every session
    /// runs with, including carried-over ones
    pub interval: Duration,

    /// Longest wait for readiness before checking whether to report
    pub poll_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Comparator,
            target_size: TargetSize::Unbounded,
            window: 0,
            min_chunk: 1,
            random_chunks: false,
            report_sizes: false,
            buffer_len: DEFAULT_BUFFER_LEN,
            interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_target_size(mut self, target_size: TargetSize) -> Self {
        self.target_size = target_size;
        self
    }

    /// Limits the bytes sent but not yet received back.
    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    pub fn with_min_chunk(mut self, min_chunk: usize) -> Self {
        self.min_chunk = min_chunk;
        self
    }

    pub fn with_random_chunks(mut self, random_chunks: bool) -> Self {
        self.random_chunks = random_chunks;
        self
    }

    pub fn with_report_sizes(mut self, report_sizes: bool) -> Self {
        self.report_sizes = report_sizes;
        self
    }

    pub fn with_buffer_len(mut self, buffer_len: usize) -> Self {
        self.buffer_len = buffer_len;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Checks the parameters before any session starts.
    ///
    /// Target and window only mean something to the comparator; other modes
    /// ignore them with a warning.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_len == 0 || !self.buffer_len.is_power_of_two() {
            return Err(Error::Config(format!(
                "buffer length must be a power of two, got {}",
                self.buffer_len
            )));
        }
        if self.min_chunk == 0 {
            return Err(Error::Config("minimum chunk must be at least 1".to_string()));
        }
        if self.min_chunk > self.buffer_len {
            return Err(Error::Config(format!(
                "minimum chunk {} exceeds buffer length {}",
                self.min_chunk, self.buffer_len
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll timeout must be non-zero".to_string()));
        }
        if self.mode != Mode::Comparator {
            if self.target_size.is_bounded() {
                warn!("target size is ignored in {} mode", self.mode);
            }
            if self.window > 0 {
                warn!("window is ignored in {} mode", self.mode);
            }
        }
        Ok(())
    }
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Space,
    Even,
    Odd,
}

/// Character framing of a serial line, written like `8n1`.
///
/// # Examples
///
/// ```
/// use echoprobe::config::{Parity, SerialFraming};
///
/// let framing: SerialFraming = "7e2".parse().unwrap();
/// assert_eq!(framing.data_bits, 7);
/// assert_eq!(framing.parity, Parity::Even);
/// assert_eq!(framing.stop_bits, 2);
/// assert_eq!(framing.to_string(), "7e2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialFraming {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialFraming {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl FromStr for SerialFraming {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 3 {
            return Err(Error::Config(format!(
                "invalid serial framing '{}', expected e.g. 8n1",
                s
            )));
        }

        let data_bits = match chars[0] {
            c @ '5'..='8' => c as u8 - b'0',
            c => {
                return Err(Error::Config(format!(
                    "invalid serial data size '{}' in '{}'",
                    c, s
                )))
            }
        };
        let parity = match chars[1].to_ascii_lowercase() {
            'n' => Parity::None,
            's' => Parity::Space,
            'e' => Parity::Even,
            'o' => Parity::Odd,
            c => {
                return Err(Error::Config(format!(
                    "invalid serial parity '{}' in '{}'",
                    c, s
                )))
            }
        };
        let stop_bits = match chars[2] {
            '1' => 1,
            '2' => 2,
            c => {
                return Err(Error::Config(format!(
                    "invalid serial stop bit '{}' in '{}'",
                    c, s
                )))
            }
        };

        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for SerialFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'n',
            Parity::Space => 's',
            Parity::Even => 'e',
            Parity::Odd => 'o',
        };
        write!(f, "{}{}{}", self.data_bits, parity, self.stop_bits)
    }
}

/// Where the byte stream under test comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    /// Listen and run one session per accepted client
    TcpServer { bind: Option<IpAddr>, port: u16 },
    /// Connect to a remote host
    TcpClient { host: String, port: u16 },
    /// Local serial device
    Serial {
        device: PathBuf,
        baud: u32,
        framing: SerialFraming,
    },
    /// TLS connection carried by an external `socat` through a pseudo-terminal
    Tunnel {
        host: String,
        port: u16,
        method: String,
        baud: u32,
        framing: SerialFraming,
    },
}

/// Configuration for an echoprobe run.
///
/// Combines the transport to open with the parameters of the sessions run
/// over it. Use the builder methods to customize it.
///
/// # Examples
///
/// ## Comparator against a remote responder
///
/// ```
/// use echoprobe::{Config, Mode, TargetSize};
/// use echoprobe::pattern::PatternKind;
///
/// let config = Config::client("192.168.1.100".to_string(), 6969)
///     .with_mode(Mode::Comparator)
///     .with_target_size(TargetSize::Exact(10 << 20))
///     .with_pattern(PatternKind::IncreasingByte)
///     .with_repeat(true);
///
/// assert!(config.validate().is_ok());
/// ```
///
/// ## Responder on a serial line
///
/// ```
/// use echoprobe::{Config, Mode};
///
/// let config = Config::serial("/dev/ttyUSB0")
///     .with_mode(Mode::Responder);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transport: TransportConfig,

    pub session: SessionConfig,

    /// How the pattern is filled
    pub pattern: PatternKind,

    /// Disable Nagle's algorithm on TCP sockets
    pub nodelay: bool,

    /// Discard pending input before each session
    pub flush_input: bool,

    /// Reconnect and run again after each completed session
    pub repeat: bool,

    /// Print a JSON summary after each session
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::TcpServer {
                bind: None,
                port: DEFAULT_PORT,
            },
            session: SessionConfig::default(),
            pattern: PatternKind::Random,
            nodelay: false,
            flush_input: false,
            repeat: false,
            json: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens on `port` and serves one client at a time.
    pub fn server(port: u16) -> Self {
        Self {
            transport: TransportConfig::TcpServer { bind: None, port },
            ..Default::default()
        }
    }

    pub fn client(host: String, port: u16) -> Self {
        Self {
            transport: TransportConfig::TcpClient { host, port },
            ..Default::default()
        }
    }

    /// Uses a serial device at the default speed and framing.
    pub fn serial(device: impl Into<PathBuf>) -> Self {
        Self {
            transport: TransportConfig::Serial {
                device: device.into(),
                baud: DEFAULT_BAUD,
                framing: SerialFraming::default(),
            },
            ..Default::default()
        }
    }

    /// Tunnels through `socat` to a TLS server using `method` (e.g. `TLS1.2`).
    pub fn tunnel(host: String, port: u16, method: String) -> Self {
        Self {
            transport: TransportConfig::Tunnel {
                host,
                port,
                method,
                baud: DEFAULT_BAUD,
                framing: SerialFraming::default(),
            },
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.session.mode = mode;
        self
    }

    pub fn with_target_size(mut self, target_size: TargetSize) -> Self {
        self.session.target_size = target_size;
        self
    }

    pub fn with_pattern(mut self, pattern: PatternKind) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_flush_input(mut self, flush_input: bool) -> Self {
        self.flush_input = flush_input;
        self
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Rejects contradictory or unusable option combinations.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;

        if self.repeat {
            if self.session.mode != Mode::Comparator || !self.session.target_size.is_bounded() {
                return Err(Error::Config(
                    "repeat needs comparator mode and a target size".to_string(),
                ));
            }
            if matches!(self.transport, TransportConfig::TcpServer { .. }) {
                return Err(Error::Config(
                    "repeat needs a remote host; a server already serves clients in a loop"
                        .to_string(),
                ));
            }
        }

        match &self.transport {
            TransportConfig::Serial { baud, .. } | TransportConfig::Tunnel { baud, .. } => {
                if !SUPPORTED_BAUD_RATES.contains(baud) {
                    return Err(Error::Config(format!("invalid serial speed '{}'", baud)));
                }
            }
            TransportConfig::TcpServer { .. } | TransportConfig::TcpClient { .. } => {}
        }

        if matches!(self.transport, TransportConfig::Tunnel { .. })
            && self.session.mode != Mode::Comparator
        {
            return Err(Error::Config(
                "a tunnel only runs the comparator".to_string(),
            ));
        }

        if self.nodelay
            && !matches!(
                self.transport,
                TransportConfig::TcpServer { .. } | TransportConfig::TcpClient { .. }
            )
        {
            warn!("nodelay only applies to TCP transports");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_session_config() {
        let config = SessionConfig::default();
        assert_eq!(config.mode, Mode::Comparator);
        assert_eq!(config.buffer_len, 1024);
        assert_eq!(config.min_chunk, 1);
        assert_eq!(config.window, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_len_must_be_power_of_two() {
        let config = SessionConfig::default().with_buffer_len(1000);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_min_chunk_bounds() {
        assert!(SessionConfig::default().with_min_chunk(0).validate().is_err());
        assert!(SessionConfig::default()
            .with_buffer_len(64)
            .with_min_chunk(65)
            .validate()
            .is_err());
    }

    #[test]
    fn test_target_resolution_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let target = TargetSize::from(-100);
        let mut seen_low = false;
        let mut seen_high = false;
        for _ in 0..10_000 {
            let n = target.resolve(&mut rng).unwrap();
            assert!((1..=100).contains(&n));
            seen_low |= n <= 10;
            seen_high |= n > 90;
        }
        assert!(seen_low && seen_high);
        assert_eq!(TargetSize::Unbounded.resolve(&mut rng), None);
        assert_eq!(TargetSize::Exact(7).resolve(&mut rng), Some(7));
    }

    #[test]
    fn test_framing_parse_errors() {
        assert!("9n1".parse::<SerialFraming>().is_err());
        assert!("8x1".parse::<SerialFraming>().is_err());
        assert!("8n3".parse::<SerialFraming>().is_err());
        assert!("8n".parse::<SerialFraming>().is_err());
        assert_eq!(
            "8N1".parse::<SerialFraming>().unwrap(),
            SerialFraming::default()
        );
    }

    #[test]
    fn test_repeat_requires_bounded_comparator() {
        let config = Config::client("localhost".to_string(), DEFAULT_PORT).with_repeat(true);
        assert!(config.validate().is_err());

        let config = config.with_target_size(TargetSize::Exact(1000));
        assert!(config.validate().is_ok());

        let config = config.with_mode(Mode::Sink);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repeat_rejected_for_server() {
        let config = Config::server(DEFAULT_PORT)
            .with_target_size(TargetSize::Exact(1000))
            .with_repeat(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serial_baud_validation() {
        let config = Config::serial("/dev/ttyS0");
        assert!(config.validate().is_ok());

        let config = config.with_transport(TransportConfig::Serial {
            device: "/dev/ttyS0".into(),
            baud: 12345,
            framing: SerialFraming::default(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serializes() {
        let config = Config::tunnel("example.org".to_string(), 443, "TLS1.2".to_string());
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transport, config.transport);
    }
}
