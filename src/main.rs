//! Frameshare demo receiver: prints throughput once per second and saves
//! periodic screenshots of the shared video stream

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use frameshare::display::ScreenshotSaver;
use frameshare::{Config, DemoConfig, FrameReceiver, ReceiverEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frameshare=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Frameshare receiver launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let mut receiver = FrameReceiver::new(config.receiver.clone());
    let events = receiver.subscribe();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    if !connect_with_retries(&mut receiver, &config.demo, &stop).await? {
        info!("Stopped before the producer came up");
        return Ok(());
    }

    // Once-per-second console statistics
    let stats = receiver.statistics();
    let current = receiver.current_frame_handle();
    let printer_stop = Arc::clone(&stop);
    let printer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        while !printer_stop.load(Ordering::Relaxed) {
            ticker.tick().await;
            let snapshot = stats.snapshot();
            if let Some(frame) = current.load_full() {
                info!(
                    "FPS: {:.1} | Resolution: {}x{} | Frame#: {} | Total: {} | Dropped: {}",
                    snapshot.fps,
                    frame.width(),
                    frame.height(),
                    frame.frame_number(),
                    snapshot.frames_received,
                    snapshot.frames_dropped
                );
            }
        }
    });

    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match event {
                ReceiverEvent::Error(message) => warn!("Receiver error: {}", message),
                ReceiverEvent::SessionReset(reset) => warn!(
                    "Producer restarted (was at frame {}), counting from scratch",
                    reset.last_consumed
                ),
                ReceiverEvent::Disconnected => {
                    info!("Disconnected!");
                    break;
                }
                ReceiverEvent::Connected { .. } | ReceiverEvent::FrameReceived { .. } => {}
            }
        }
    });

    let demo = config.demo.clone();
    let loop_stop = Arc::clone(&stop);
    tokio::task::spawn_blocking(move || receive_loop(receiver, demo, loop_stop)).await??;

    stop.store(true, Ordering::Relaxed);
    printer.await?;
    watcher.await?;

    info!("Frameshare receiver shutting down");
    Ok(())
}

/// Connect, retrying until the attempts run out. Returns `false` if `stop`
/// was raised first.
async fn connect_with_retries(
    receiver: &mut FrameReceiver,
    demo: &DemoConfig,
    stop: &AtomicBool,
) -> Result<bool> {
    let attempts = demo.connect_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        if stop.load(Ordering::Relaxed) {
            return Ok(false);
        }
        match receiver.connect() {
            Ok(()) => return Ok(true),
            Err(e) => {
                info!(
                    "Waiting for the producer to start streaming... (attempt {}/{}): {}",
                    attempt, attempts, e
                );
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(demo.retry_interval()).await;
        }
    }
    if stop.load(Ordering::Relaxed) {
        return Ok(false);
    }
    Err(eyre!(
        "Failed to connect after {} attempts ({}). Make sure the producer is streaming.",
        attempts,
        last_error.map_or_else(String::new, |e| e.to_string())
    ))
}

/// Wait/extract until `stop` is raised. Runs on a blocking thread because
/// waiting parks the calling thread.
fn receive_loop(mut receiver: FrameReceiver, demo: DemoConfig, stop: Arc<AtomicBool>) -> Result<()> {
    let saver = ScreenshotSaver::new(demo.screenshot_dir.clone(), demo.screenshot_every);
    if demo.screenshot_every != 0 {
        info!(
            "Saving every {}th frame to {}",
            demo.screenshot_every,
            saver.dir().display()
        );
    }
    info!(
        "Receiving frames in {:?} mode (Press Ctrl+C to stop)",
        demo.mode
    );

    while !stop.load(Ordering::Relaxed) {
        if !receiver.wait_for_frame(Some(demo.wait_timeout()))? {
            continue;
        }
        for frame in receiver.extract(demo.mode)? {
            if let Err(e) = saver.maybe_save(&frame) {
                error!("Failed to save frame: {}", e);
            }
        }
    }

    receiver.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameshare::ReceiverConfig;

    fn missing_producer(dir: &tempfile::TempDir) -> FrameReceiver {
        FrameReceiver::new(ReceiverConfig {
            region_name: "absent".into(),
            event_name: None,
            shm_dir: Some(dir.path().to_path_buf()),
            poll_interval_ms: 1,
        })
    }

    fn retries(connect_attempts: u32, retry_interval_ms: u64) -> DemoConfig {
        DemoConfig {
            connect_attempts,
            retry_interval_ms,
            ..DemoConfig::default()
        }
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let mut receiver = missing_producer(&dir);
        let stop = AtomicBool::new(false);

        let result = connect_with_retries(&mut receiver, &retries(2, 1), &stop).await;
        assert!(result.is_err());
        assert!(!receiver.is_connected());
    }

    #[tokio::test]
    async fn stop_interrupts_the_retry_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut receiver = missing_producer(&dir);
        let stop = Arc::new(AtomicBool::new(false));
        {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stop.store(true, Ordering::Relaxed);
            });
        }

        let started = std::time::Instant::now();
        let connected = connect_with_retries(&mut receiver, &retries(10_000, 5), &stop)
            .await
            .unwrap();
        assert!(!connected);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn stop_before_connecting_skips_all_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mut receiver = missing_producer(&dir);
        let events = receiver.subscribe();
        let stop = AtomicBool::new(true);

        let connected = connect_with_retries(&mut receiver, &retries(5, 1), &stop)
            .await
            .unwrap();
        assert!(!connected);
        // No connect was attempted, so no error was published
        assert!(events.try_recv().is_err());
    }
}
