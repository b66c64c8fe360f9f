//! Receive statistics: totals plus a once-per-second throughput figure

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;

const WINDOW: Duration = Duration::from_secs(1);

/// Counters shared between the consumer thread and any observers
pub struct StatisticsTracker {
    counters: CachePadded<Counters>,

    /// Current throughput window
    window: Mutex<Window>,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_torn: AtomicU64,
    /// Bit pattern of the last computed f64 frames-per-second
    fps_bits: AtomicU64,
}

struct Window {
    started: Instant,
    frames: u64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_torn: u64,
    pub fps: f64,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self {
            counters: CachePadded::new(Counters::default()),
            window: Mutex::new(Window {
                started: Instant::now(),
                frames: 0,
            }),
        }
    }

    /// Account for one extraction.
    pub fn record(&self, received: u64, dropped: u64, torn: u64) {
        self.record_at(Instant::now(), received, dropped, torn);
    }

    pub fn record_at(&self, now: Instant, received: u64, dropped: u64, torn: u64) {
        self.counters
            .frames_received
            .fetch_add(received, Ordering::Relaxed);
        self.counters
            .frames_dropped
            .fetch_add(dropped, Ordering::Relaxed);
        self.counters.frames_torn.fetch_add(torn, Ordering::Relaxed);
        if received > 0 {
            metrics::counter!("frameshare.frames_received").increment(received);
        }
        if dropped > 0 {
            metrics::counter!("frameshare.frames_dropped").increment(dropped);
        }

        let Ok(mut window) = self.window.lock() else {
            return;
        };
        window.frames += received;
        self.roll(&mut window, now);
    }

    /// Close the throughput window if a full second has elapsed.
    fn roll(&self, window: &mut Window, now: Instant) {
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= WINDOW {
            let fps = window.frames as f64 / elapsed.as_secs_f64();
            self.counters
                .fps_bits
                .store(fps.to_bits(), Ordering::Relaxed);
            metrics::gauge!("frameshare.fps").set(fps);
            window.started = now;
            window.frames = 0;
        }
    }

    /// Zero every counter and restart the throughput window.
    pub fn reset(&self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&self, now: Instant) {
        self.counters.frames_received.store(0, Ordering::Relaxed);
        self.counters.frames_dropped.store(0, Ordering::Relaxed);
        self.counters.frames_torn.store(0, Ordering::Relaxed);
        self.counters.fps_bits.store(0, Ordering::Relaxed);
        if let Ok(mut window) = self.window.lock() {
            window.started = now;
            window.frames = 0;
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.counters.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.counters.frames_dropped.load(Ordering::Relaxed)
    }

    /// Frames per second over the last closed window. A window that elapsed
    /// without any recording is closed here, so a stalled producer reads 0.
    pub fn fps(&self) -> f64 {
        self.fps_at(Instant::now())
    }

    pub fn fps_at(&self, now: Instant) -> f64 {
        if let Ok(mut window) = self.window.lock() {
            self.roll(&mut window, now);
        }
        f64::from_bits(self.counters.fps_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received(),
            frames_dropped: self.frames_dropped(),
            frames_torn: self.counters.frames_torn.load(Ordering::Relaxed),
            fps: self.fps_at(now),
        }
    }
}
