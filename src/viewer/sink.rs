//! Decode & present sink.
//!
//! The read loop hands every complete payload to [`PresentSink::accept_payload`]. The
//! decoded frame is published on a `watch` channel, so a slow display only ever sees
//! the newest frame and the read loop never waits for a render.

use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ImageError};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Decoded frame ready for rendering.
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub image: DynamicImage,
}

impl DecodedFrame {
    /// Decode a JPEG payload.
    pub fn decode(jpeg: &[u8]) -> Result<Self, ImageError> {
        let decoder = JpegDecoder::new(Cursor::new(jpeg))?;
        let image = DynamicImage::from_decoder(decoder)?;
        Ok(Self {
            width: image.width(),
            height: image.height(),
            image,
        })
    }
}

/// Frames decoded per wall-clock second, recomputed once per elapsed second.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    count: u32,
    fps: u32,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            fps: 0,
        }
    }

    /// Count one frame at `now` and return the current rate.
    pub fn tick_at(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.count += 1;
        self.fps
    }

    pub fn tick(&mut self) -> u32 {
        self.tick_at(Instant::now())
    }

    /// Rate as of `now`; a stalled stream decays to zero.
    pub fn fps_at(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.fps
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Self::WINDOW {
            self.fps = (self.count as f64 / elapsed.as_secs_f64()).round() as u32;
            self.count = 0;
            self.window_start = now;
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// What a display surface shows. `peer == None` is the no-signal state.
#[derive(Clone, Default)]
pub struct Screen {
    pub peer: Option<SocketAddr>,
    pub frame: Option<Arc<DecodedFrame>>,
    pub fps: u32,
    /// Frames decoded on the current connection.
    pub frames: u64,
    /// Payloads dropped on the current connection (empty or undecodable).
    pub skipped: u64,
}

impl Screen {
    pub fn has_signal(&self) -> bool {
        self.peer.is_some()
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.frame.as_ref().map(|f| (f.width, f.height))
    }
}

pub struct PresentSink {
    screen: watch::Sender<Screen>,
    fps: FpsCounter,
}

impl PresentSink {
    pub fn new() -> (Self, watch::Receiver<Screen>) {
        let (screen, rx) = watch::channel(Screen::default());
        let sink = Self {
            screen,
            fps: FpsCounter::new(),
        };
        (sink, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Screen> {
        self.screen.subscribe()
    }

    /// A producer connected; start a fresh count.
    pub fn connected(&mut self, peer: SocketAddr) {
        self.fps = FpsCounter::new();
        self.screen.send_replace(Screen {
            peer: Some(peer),
            ..Screen::default()
        });
    }

    /// Decode and publish one payload. Returns false if it was skipped.
    pub fn accept_payload(&mut self, payload: &[u8]) -> bool {
        self.accept_payload_at(payload, Instant::now())
    }

    fn accept_payload_at(&mut self, payload: &[u8], now: Instant) -> bool {
        if payload.is_empty() {
            self.screen.send_modify(|s| s.skipped += 1);
            debug!("empty frame packet skipped");
            return false;
        }
        match DecodedFrame::decode(payload) {
            Ok(frame) => {
                let fps = self.fps.tick_at(now);
                let frame = Arc::new(frame);
                self.screen.send_modify(|s| {
                    s.frame = Some(frame);
                    s.fps = fps;
                    s.frames += 1;
                });
                true
            }
            Err(e) => {
                debug!(bytes = payload.len(), "undecodable frame skipped: {}", e);
                self.screen.send_modify(|s| s.skipped += 1);
                false
            }
        }
    }

    /// Republish the frame rate, so a stalled stream reads as stalled. Call about
    /// once a second while connected.
    pub fn refresh_rate(&mut self) {
        self.refresh_rate_at(Instant::now())
    }

    fn refresh_rate_at(&mut self, now: Instant) {
        let fps = self.fps.fps_at(now);
        self.screen.send_if_modified(|s| {
            if s.has_signal() && s.fps != fps {
                s.fps = fps;
                true
            } else {
                false
            }
        });
    }

    /// The connection closed; go to no-signal and log the totals.
    pub fn disconnected(&mut self) {
        let last = self.screen.send_replace(Screen::default());
        if let Some(peer) = last.peer {
            info!(%peer, frames = last.frames, skipped = last.skipped, "signal lost");
        }
    }
}
