//! Console reporting on a separate task.
//!
//! Engines only push [`ProgressEvent`]s into a channel; formatting and
//! terminal I/O happen in [`run_reporter_task`], off the data path.

use crate::session::{ProgressCallback, ProgressEvent};
use std::io::Write;
use tokio::sync::mpsc;

/// Message sent to the reporter task
///
/// # Examples
///
/// ```
/// use echoprobe::interval_reporter::IntervalMessage;
/// use echoprobe::ProgressEvent;
///
/// let msg = IntervalMessage::Event(ProgressEvent::BlockRead(512));
///
/// match msg {
///     IntervalMessage::Event(e) => println!("{:?}", e),
///     IntervalMessage::Complete => println!("done"),
/// }
/// ```
#[derive(Debug, Clone)]
pub enum IntervalMessage {
    Event(ProgressEvent),
    /// Stop the reporter task
    Complete,
}

/// Handle for sending events to the reporter task.
///
/// Implements [`ProgressCallback`], so it can be attached to a session
/// directly.
///
/// # Examples
///
/// ```
/// use echoprobe::interval_reporter::{IntervalMessage, IntervalReporter};
/// use echoprobe::{ProgressCallback, ProgressEvent};
///
/// #[tokio::main]
/// async fn main() {
///     let (reporter, mut receiver) = IntervalReporter::new();
///
///     reporter.on_progress(ProgressEvent::BlockWritten(64));
///     reporter.complete();
///
///     assert!(matches!(
///         receiver.recv().await,
///         Some(IntervalMessage::Event(ProgressEvent::BlockWritten(64)))
///     ));
///     assert!(matches!(receiver.recv().await, Some(IntervalMessage::Complete)));
/// }
/// ```
#[derive(Clone)]
pub struct IntervalReporter {
    sender: mpsc::UnboundedSender<IntervalMessage>,
}

impl IntervalReporter {
    /// Creates a reporter and the receiver its task should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IntervalMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn complete(&self) {
        let _ = self.sender.send(IntervalMessage::Complete);
    }
}

impl ProgressCallback for IntervalReporter {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.sender.send(IntervalMessage::Event(event));
    }
}

/// Drains the reporter channel, printing each event.
///
/// In JSON mode nothing is printed so that stdout only carries the summary.
pub async fn run_reporter_task(mut receiver: mpsc::UnboundedReceiver<IntervalMessage>, json_mode: bool) {
    while let Some(msg) = receiver.recv().await {
        match msg {
            IntervalMessage::Event(event) => {
                if json_mode {
                    continue;
                }
                if let Some(line) = format_event(&event) {
                    let mut out = std::io::stdout().lock();
                    let _ = out.write_all(line.as_bytes());
                    let _ = out.flush();
                }
            }
            IntervalMessage::Complete => break,
        }
    }
}

/// Renders an event the way it appears on the terminal.
///
/// Bandwidth lines start with a carriage return so they overwrite each other;
/// block sizes go on their own lines, writes indented past reads.
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Bandwidth(snapshot) => Some(format!("\r{}-----", snapshot)),
        ProgressEvent::BlockRead(n) => Some(format!("{:10}r\n", n)),
        ProgressEvent::BlockWritten(n) => Some(format!("{:10}{:10}w\n", "", n)),
        ProgressEvent::SessionEnded { end, sent, received } => Some(format!(
            "\n{}: sent {} bytes, received {} bytes\n",
            end, sent, received
        )),
        ProgressEvent::SessionStarted { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::SessionStats;
    use crate::session::SessionEnd;
    use std::time::{Duration, Instant};

    #[test]
    fn test_block_size_columns() {
        assert_eq!(
            format_event(&ProgressEvent::BlockRead(300)).unwrap(),
            "       300r\n"
        );
        assert_eq!(
            format_event(&ProgressEvent::BlockWritten(300)).unwrap(),
            "                 300w\n"
        );
    }

    #[test]
    fn test_bandwidth_line_overwrites() {
        let start = Instant::now();
        let mut stats = SessionStats::starting_at(start, Duration::from_secs(1));
        stats.record(1024);
        let snapshot = stats.maybe_report(start + Duration::from_secs(1), true).unwrap();
        let line = format_event(&ProgressEvent::Bandwidth(snapshot)).unwrap();
        assert!(line.starts_with("\r[avg:"));
        assert!(line.ends_with("]-----"));
    }

    #[test]
    fn test_session_started_is_silent() {
        let event = ProgressEvent::SessionStarted {
            mode: crate::Mode::Sink,
            target: None,
        };
        assert!(format_event(&event).is_none());
        let ended = ProgressEvent::SessionEnded {
            end: SessionEnd::PeerClosed,
            sent: 0,
            received: 10,
        };
        assert!(format_event(&ended).unwrap().contains("peer closed"));
    }

    #[tokio::test]
    async fn test_reporter_forwards_in_order() {
        let (reporter, mut receiver) = IntervalReporter::new();
        for n in 1..=3 {
            reporter.on_progress(ProgressEvent::BlockRead(n));
        }
        reporter.complete();

        let mut seen = Vec::new();
        while let Some(msg) = receiver.recv().await {
            match msg {
                IntervalMessage::Event(ProgressEvent::BlockRead(n)) => seen.push(n),
                IntervalMessage::Event(_) => {}
                IntervalMessage::Complete => break,
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reporter_task_stops_on_complete() {
        let (reporter, receiver) = IntervalReporter::new();
        reporter.complete();
        run_reporter_task(receiver, true).await;
    }
}
