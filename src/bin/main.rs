use clap::{ArgGroup, Parser};
use echoprobe::config::{SerialFraming, TransportConfig, DEFAULT_BAUD, DEFAULT_FRAMING, DEFAULT_PORT};
use echoprobe::interval_reporter::{run_reporter_task, IntervalReporter};
use echoprobe::pattern::PatternKind;
use echoprobe::{Client, Config, Error, Mode, Server, SessionConfig, TargetSize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "echoprobe")]
#[command(about = "Serial/TCP echo tester - data integrity and throughput", long_about = None)]
#[command(version)]
#[command(group(ArgGroup::new("mode").required(true).args(["responder", "comparator", "sink", "source"])))]
struct Cli {
    /// Responder (read and send back)
    #[arg(short = 'R', long)]
    responder: bool,

    /// Comparator (send and check back)
    #[arg(short = 'C', long)]
    comparator: bool,

    /// Sink only
    #[arg(short = 'K', long)]
    sink: bool,

    /// Source only
    #[arg(short = 'S', long)]
    source: bool,

    /// Pattern byte: n constant, -1 increasing bytes, -2 increasing chars in 33..127, 0 random
    #[arg(short = 'c', long = "char", default_value = "0", allow_negative_numbers = true)]
    pattern: i32,

    /// Bytes to move (0 infinite, -n random size in [1..n])
    #[arg(short = 's', long, default_value = "0", allow_negative_numbers = true)]
    size: i64,

    /// Pause output to keep sent - received below n (0 no limit)
    #[arg(short = 'w', long, default_value = "0")]
    window: u64,

    /// Use this tty device instead of TCP
    #[arg(short = 'y', long, conflicts_with = "host")]
    tty: Option<PathBuf>,

    /// Line speed of the tty device
    #[arg(short = 'b', long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Framing of the tty device, e.g. 8n1
    #[arg(short = 'm', long, default_value = DEFAULT_FRAMING)]
    framing: String,

    /// Set TCP_NODELAY
    #[arg(short = 'n', long)]
    nodelay: bool,

    /// TCP port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Remote host; without it and without a tty, act as TCP server
    #[arg(short = 'd', long)]
    host: Option<String>,

    /// Address to listen on in server mode
    #[arg(long, conflicts_with = "host")]
    bind: Option<IpAddr>,

    /// Close, reopen and run again after each session (needs -C and -s)
    #[arg(short = 'r', long)]
    repeat: bool,

    /// Tunnel through socat using this TLS method (e.g. TLS1.2); needs -d
    #[arg(short = 'M', long, requires = "host", conflicts_with = "tty")]
    method: Option<String>,

    /// Random read/write block sizes instead of the largest possible
    #[arg(short = 'a', long)]
    random_blocks: bool,

    /// Show read and written block sizes
    #[arg(short = 'A', long)]
    show_blocks: bool,

    /// Flush input before starting
    #[arg(short = 'f', long)]
    flush: bool,

    /// Print a JSON summary after each session
    #[arg(short = 'J', long)]
    json: bool,

    /// Seconds between bandwidth reports
    #[arg(short = 'i', long, default_value = "1")]
    interval: f64,

    /// Pattern and ring length in bytes (power of two)
    #[arg(long, default_value = "1024")]
    buffer_len: usize,

    /// Smallest read/write block
    #[arg(long, default_value = "1")]
    min_chunk: usize,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.responder {
            Mode::Responder
        } else if self.comparator {
            Mode::Comparator
        } else if self.sink {
            Mode::Sink
        } else {
            Mode::Source
        }
    }

    fn into_config(self) -> anyhow::Result<Config> {
        let framing: SerialFraming = self.framing.parse()?;
        let mode = self.mode();

        let transport = match (self.method, self.tty, self.host) {
            (Some(method), None, Some(host)) => TransportConfig::Tunnel {
                host,
                port: self.port,
                method,
                baud: self.baud,
                framing,
            },
            (None, Some(device), None) => TransportConfig::Serial {
                device,
                baud: self.baud,
                framing,
            },
            (None, None, Some(host)) => TransportConfig::TcpClient {
                host,
                port: self.port,
            },
            (None, None, None) => TransportConfig::TcpServer {
                bind: self.bind,
                port: self.port,
            },
            _ => anyhow::bail!("tcp client or serial?"),
        };

        let interval = Duration::try_from_secs_f64(self.interval)
            .map_err(|e| anyhow::anyhow!("invalid interval: {}", e))?;

        let session = SessionConfig::new(mode)
            .with_target_size(TargetSize::from(self.size))
            .with_window(self.window)
            .with_min_chunk(self.min_chunk)
            .with_random_chunks(self.random_blocks)
            .with_report_sizes(self.show_blocks)
            .with_buffer_len(self.buffer_len)
            .with_interval(interval);

        let config = Config::new()
            .with_transport(transport)
            .with_session(session)
            .with_pattern(PatternKind::from_selector(self.pattern))
            .with_nodelay(self.nodelay)
            .with_flush_input(self.flush)
            .with_repeat(self.repeat)
            .with_json(self.json);
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.into_config()?;

    let (reporter, receiver) = IntervalReporter::new();
    let reporter_task = tokio::spawn(run_reporter_task(receiver, config.json));
    let callback = Arc::new(reporter.clone());

    let result = match config.transport {
        TransportConfig::TcpServer { .. } => {
            let server = Server::new(config)?.with_callback_ref(callback);
            server.run().await
        }
        _ => {
            let client = Client::new(config)?.with_callback_ref(callback);
            client.run().await.map(|_| ())
        }
    };

    reporter.complete();
    let _ = reporter_task.await;

    match result {
        Err(Error::Integrity(report)) => {
            eprintln!("\n{}", report);
            std::process::exit(1);
        }
        other => other.map_err(Into::into),
    }
}
