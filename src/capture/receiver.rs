//! Connection to the producer's shared region

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::VideoFrame;
use crate::error::{Error, Result};
use crate::pipeline::StatisticsTracker;
use crate::protocol::{
    ExtractMode, Extraction, FrameSource, FrameSynchronizer, Header, Protocol, SessionReset,
};
use crate::shm::{FrameEvent, SharedRegion};
use crate::ReceiverConfig;

/// Notifications published to every [`FrameReceiver::subscribe`] channel
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    Connected {
        width: u32,
        height: u32,
        protocol: Protocol,
        /// No notification primitive was found; waits poll the header.
        polling: bool,
    },
    Disconnected,
    FrameReceived {
        frame_number: u64,
        slot: Option<u32>,
    },
    SessionReset(SessionReset),
    Error(String),
}

/// Resources held while connected. Field order is release order.
struct Connection {
    event: Option<FrameEvent>,
    region: SharedRegion,
    sync: FrameSynchronizer,
}

impl Connection {
    fn frame_pending(&self) -> Result<bool> {
        let header = self.region.read_header()?;
        self.sync.check_protocol(&header)?;
        Ok(self.sync.has_new_frame(&header))
    }

    fn wait(&self, timeout: Option<Duration>, poll_interval: Duration) -> Result<bool> {
        if self.frame_pending()? {
            return Ok(true);
        }
        if timeout.is_some_and(|t| t.is_zero()) {
            return Ok(false);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match &self.event {
                Some(event) => {
                    if !event.wait(remaining)? {
                        return Ok(false);
                    }
                }
                None => {
                    let nap = remaining.map_or(poll_interval, |r| r.min(poll_interval));
                    std::thread::sleep(nap);
                }
            }

            if self.frame_pending()? {
                return Ok(true);
            }
        }
    }
}

/// Reads frames published by the streaming application.
///
/// State machine `Disconnected -> Connected -> Disconnected`. All
/// state-changing calls take `&mut self`; share the receiver between threads
/// behind a `Mutex`.
pub struct FrameReceiver {
    config: ReceiverConfig,
    connection: Option<Connection>,
    stats: Arc<StatisticsTracker>,
    current: Arc<ArcSwapOption<VideoFrame>>,
    subscribers: Vec<Sender<ReceiverEvent>>,
}

impl FrameReceiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            connection: None,
            stats: Arc::new(StatisticsTracker::new()),
            current: Arc::new(ArcSwapOption::empty()),
            subscribers: Vec::new(),
        }
    }

    /// Channel of connection, frame and error notifications.
    pub fn subscribe(&mut self) -> Receiver<ReceiverEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Map the shared region and validate its header.
    ///
    /// Connecting while already connected is a no-op. On failure nothing
    /// stays acquired and the receiver remains disconnected.
    #[instrument(skip(self), fields(region = %self.config.region_name))]
    pub fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let (connection, header) = match self.open() {
            Ok(opened) => opened,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };

        let polling = connection.event.is_none();
        info!(
            "Connected to {}: {}x{} stride {} {:?} ({} mode)",
            connection.region.name(),
            header.width(),
            header.height(),
            header.stride(),
            header.protocol(),
            if polling { "polling" } else { "event" }
        );

        self.stats.reset();
        self.current.store(None);
        self.connection = Some(connection);
        self.emit(ReceiverEvent::Connected {
            width: header.width(),
            height: header.height(),
            protocol: header.protocol(),
            polling,
        });
        Ok(())
    }

    fn open(&self) -> Result<(Connection, Header)> {
        let region = match &self.config.shm_dir {
            Some(dir) => SharedRegion::open_path(&dir.join(&self.config.region_name))?,
            None => SharedRegion::open_shm(&self.config.region_name)?,
        };

        let event = match &self.config.event_name {
            Some(name) => match FrameEvent::open(name) {
                Ok(Some(event)) => {
                    debug!("Opened frame event {}", event.name());
                    Some(event)
                }
                Ok(None) => {
                    info!("Event {} not found, will use polling mode", name);
                    None
                }
                Err(err) => {
                    warn!("Could not open event {}: {}, will use polling mode", name, err);
                    None
                }
            },
            None => None,
        };

        let header = region.read_header()?;
        header.validate_layout(region.len())?;

        let connection = Connection {
            event,
            region,
            sync: FrameSynchronizer::new(header.protocol()),
        };
        Ok((connection, header))
    }

    /// Release the notification handle, then the mapping. Safe to call any
    /// number of times.
    pub fn disconnect(&mut self) {
        let Some(Connection {
            event,
            region,
            sync,
        }) = self.connection.take()
        else {
            return;
        };
        drop(event);
        drop(region);
        info!(
            "Disconnected (last frame {}, received {}, dropped {})",
            sync.last_consumed(),
            self.stats.frames_received(),
            self.stats.frames_dropped()
        );
        self.emit(ReceiverEvent::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Protocol negotiated at connect time.
    pub fn protocol(&self) -> Option<Protocol> {
        self.connection.as_ref().map(|c| c.sync.protocol())
    }

    /// Whether waits poll the header instead of blocking on the event.
    pub fn is_polling(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.event.is_none())
    }

    pub fn last_consumed(&self) -> u64 {
        self.connection
            .as_ref()
            .map_or(0, |c| c.sync.last_consumed())
    }

    /// Current header, without touching any pixel data.
    pub fn frame_info(&self) -> Result<Header> {
        let connection = self.connection.as_ref().ok_or(Error::NotConnected)?;
        connection.region.read_header()
    }

    pub fn statistics(&self) -> Arc<StatisticsTracker> {
        Arc::clone(&self.stats)
    }

    /// Most recently delivered frame.
    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.current.load_full()
    }

    /// Shared slot always holding the most recently delivered frame, for
    /// readers on other threads.
    pub fn current_frame_handle(&self) -> Arc<ArcSwapOption<VideoFrame>> {
        Arc::clone(&self.current)
    }

    /// Block until a new frame is available or `timeout` elapses.
    ///
    /// `None` waits indefinitely; a zero timeout only inspects the header.
    /// Waiting never consumes a frame.
    pub fn wait_for_frame(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let connection = self.connection.as_ref().ok_or(Error::NotConnected)?;
        match connection.wait(timeout, self.config.poll_interval()) {
            Ok(ready) => Ok(ready),
            Err(err) => {
                self.report(&err);
                Ok(false)
            }
        }
    }

    /// Newest unconsumed frame, skipping any older ones (non-blocking).
    pub fn try_get_frame(&mut self) -> Result<Option<VideoFrame>> {
        Ok(self.extract(ExtractMode::Latest)?.pop())
    }

    /// Every unconsumed frame, oldest first (non-blocking).
    pub fn try_get_all_new_frames(&mut self) -> Result<Vec<VideoFrame>> {
        self.extract(ExtractMode::AllNew)
    }

    pub fn extract(&mut self, mode: ExtractMode) -> Result<Vec<VideoFrame>> {
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        match connection.sync.extract(&connection.region, mode) {
            Ok(extraction) => Ok(self.deliver(extraction)),
            Err(err) => {
                self.report(&err);
                Ok(Vec::new())
            }
        }
    }

    fn deliver(&mut self, extraction: Extraction) -> Vec<VideoFrame> {
        let Extraction {
            frames,
            dropped,
            torn,
            reset,
        } = extraction;

        if let Some(reset) = reset {
            self.emit(ReceiverEvent::SessionReset(reset));
        }
        self.stats.record(frames.len() as u64, dropped, torn);

        if let Some(last) = frames.last() {
            debug!(
                "Delivered {} frame(s) up to #{} ({} dropped)",
                frames.len(),
                last.frame_number(),
                dropped
            );
            self.current.store(Some(Arc::new(last.clone())));
        }
        for frame in &frames {
            self.emit(ReceiverEvent::FrameReceived {
                frame_number: frame.frame_number(),
                slot: frame.slot(),
            });
        }
        frames
    }

    fn report(&mut self, err: &Error) {
        warn!("{}", err);
        self.emit(ReceiverEvent::Error(err.to_string()));
    }

    fn emit(&mut self, event: ReceiverEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.disconnect();
    }
}
