use echoprobe::interval_reporter::{run_reporter_task, IntervalReporter};
use echoprobe::pattern::PatternKind;
use echoprobe::{Client, Config, Mode, ProgressCallback, ProgressEvent, TargetSize};

/// Forwards everything to the console reporter and announces session starts.
struct AnnouncingReporter {
    inner: IntervalReporter,
}

impl ProgressCallback for AnnouncingReporter {
    fn on_progress(&self, event: ProgressEvent) {
        if let ProgressEvent::SessionStarted { mode, target } = &event {
            match target {
                Some(n) => println!("{} session started, {} bytes to check", mode, n),
                None => println!("{} session started, no byte limit", mode),
            }
        }
        self.inner.on_progress(event);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("echoprobe Client with Callback Example");
    println!("======================================\n");

    // Check 64 MiB of increasing bytes echoed back by a responder
    let config = Config::client("127.0.0.1".to_string(), 6969)
        .with_mode(Mode::Comparator)
        .with_target_size(TargetSize::Exact(64 << 20))
        .with_pattern(PatternKind::IncreasingByte)
        .with_nodelay(true);

    let (reporter, receiver) = IntervalReporter::new();
    let printer = tokio::spawn(run_reporter_task(receiver, false));

    let client = Client::new(config)?.with_callback(AnnouncingReporter {
        inner: reporter.clone(),
    });

    println!("Connecting to responder at 127.0.0.1:6969...\n");
    let result = client.run().await;

    reporter.complete();
    printer.await?;

    let report = result?;
    println!("\nFinal Statistics:");
    println!("   End: {}", report.end);
    println!("   Sent: {} bytes", report.sent);
    println!("   Received: {} bytes", report.received);
    if let Some(bps) = report.summary().average_bps {
        println!("   Average bandwidth: {:.2} Mbps", bps / 1_000_000.0);
    }

    Ok(())
}
