//! echoprobe - data integrity and throughput tester for byte streams
//!
//! This library drives a full-duplex transport (TCP socket, serial line, or
//! a TLS stream tunnelled through `socat`) at full rate while checking that
//! every byte coming back matches a repeating test pattern.
//!
//! # Modes
//!
//! - **Comparator**: sends the pattern and verifies the echo byte for byte
//! - **Responder**: sends back whatever it receives
//! - **Sink**: receives and discards
//! - **Source**: transmits only
//!
//! Engines run over anything implementing [`Endpoint`], so they can be
//! exercised against in-memory streams as well as real transports.

pub mod bandwidth;
pub mod client;
pub mod comparator;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod interval_reporter;
pub mod pattern;
pub mod probe;
pub mod responder;
pub mod ring;
#[cfg(unix)]
pub mod serial;
pub mod server;
pub mod session;
pub mod transport;
#[cfg(unix)]
pub mod tunnel;

pub use client::Client;
pub use comparator::MismatchReport;
pub use config::{Config, Mode, SessionConfig, TargetSize, TransportConfig};
pub use endpoint::{Endpoint, Readiness};
pub use error::{Error, Result};
pub use server::Server;
pub use session::{
    ProgressCallback, ProgressEvent, Session, SessionEnd, SessionReport, SessionSummary,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
