use echoprobe::{Client, Config, Mode, ProgressEvent, TargetSize};
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("echoprobe Client with Closure Callback Example");
    println!("==============================================\n");

    // Collect per-interval totals with shared state
    let progress = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = Arc::clone(&progress);

    // Random target between 1 byte and 16 MiB, random block sizes
    let mut config = Config::client("127.0.0.1".to_string(), 6969)
        .with_mode(Mode::Comparator)
        .with_target_size(TargetSize::from(-(16 << 20)));
    config.session = config.session.with_random_chunks(true).with_window(4096);

    let client = Client::new(config)?.with_callback(move |event: ProgressEvent| match &event {
        ProgressEvent::SessionStarted { target, .. } => {
            println!("Starting, target {:?} bytes", target);
        }
        ProgressEvent::Bandwidth(snapshot) => {
            println!("{}", snapshot);
            if let Ok(mut prog) = progress_clone.lock() {
                prog.push((snapshot.elapsed, snapshot.total_bytes));
            }
        }
        ProgressEvent::SessionEnded { end, sent, received } => {
            println!("\nSession finished: {} ({} sent, {} received)", end, sent, received);
        }
        ProgressEvent::BlockRead(_) | ProgressEvent::BlockWritten(_) => {}
    });

    client.run().await?;

    let progress = progress.lock().map_err(|e| e.to_string())?;
    println!("\nCollected {} bandwidth snapshots", progress.len());
    if let Some((elapsed, total)) = progress.last() {
        println!("   {} bytes after {:.2}s", total, elapsed.as_secs_f64());
    }

    Ok(())
}
