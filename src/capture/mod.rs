//! Capture pipeline.
//!
//! The camera binding is an external collaborator behind [`FrameSource`]. This module
//! picks the device for a lens, negotiates a format against the target resolution and
//! frame rate, and restarts the source when the lens changes. Frames leave through the
//! single [`FrameCallback`]; whoever installs the callback decides what to admit.

mod admission;
mod pattern;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use pattern::TestPatternSource;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, ConfigError};
use crate::session::Lens;

/// Memory layout of a raw frame's pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Rgba8,
    Bgra8,
    Gray8,
    /// Planar YUV 4:2:0. Produced by some sensors; the encoder does not take it.
    Nv12,
}

impl PixelLayout {
    /// Bytes per pixel for packed layouts, `None` for planar ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelLayout::Rgb8 => Some(3),
            PixelLayout::Rgba8 | PixelLayout::Bgra8 => Some(4),
            PixelLayout::Gray8 => Some(1),
            PixelLayout::Nv12 => None,
        }
    }
}

/// One uncompressed frame as delivered by the device.
#[derive(Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding.
    pub stride: usize,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
    /// Device sequence number.
    pub seq: u64,
}

impl RawFrame {
    /// Frame with tightly packed rows.
    pub fn packed(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>, seq: u64) -> Self {
        let stride = width as usize * layout.bytes_per_pixel().unwrap_or(1);
        Self {
            width,
            height,
            stride,
            layout,
            data,
            seq,
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("layout", &self.layout)
            .field("bytes", &self.data.len())
            .field("seq", &self.seq)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const FULL_HD: Resolution = Resolution::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when both dimensions are at least those of `other`.
    pub fn covers(self, other: Resolution) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidResolution(s.to_string());
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::new(width, height))
    }
}

/// A format the device supports: one resolution over a frame-rate range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatRange {
    pub resolution: Resolution,
    pub min_fps: f32,
    pub max_fps: f32,
}

impl FormatRange {
    pub fn new(width: u32, height: u32, min_fps: f32, max_fps: f32) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            min_fps,
            max_fps,
        }
    }
}

/// What the capture pipeline asks the device for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureTarget {
    pub resolution: Resolution,
    pub fps: f32,
}

impl Default for CaptureTarget {
    fn default() -> Self {
        Self {
            resolution: Resolution::FULL_HD,
            fps: 60.0,
        }
    }
}

/// Outcome of format negotiation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureMode {
    /// An explicit device format locked to `fps`.
    Format { format: FormatRange, fps: f32 },
    /// Standard preset at this resolution; the device picks the frame rate.
    Preset { resolution: Resolution },
}

impl CaptureMode {
    pub fn resolution(&self) -> Resolution {
        match self {
            CaptureMode::Format { format, .. } => format.resolution,
            CaptureMode::Preset { resolution } => *resolution,
        }
    }
}

/// Pick the capture mode for `target` from the formats a device offers.
///
/// A format qualifies when it covers the target resolution and its frame-rate range
/// reaches the target rate. The smallest qualifying format wins, ties going to the
/// higher maximum rate. With no qualifier, fall back to the preset at the target
/// resolution.
pub fn negotiate(formats: &[FormatRange], target: CaptureTarget) -> CaptureMode {
    let best = formats
        .iter()
        .filter(|f| f.resolution.covers(target.resolution) && f.max_fps >= target.fps)
        .min_by(|a, b| {
            a.resolution
                .pixels()
                .cmp(&b.resolution.pixels())
                .then(b.max_fps.total_cmp(&a.max_fps))
        });

    match best {
        Some(format) => CaptureMode::Format {
            format: *format,
            fps: target.fps.max(format.min_fps),
        },
        None => CaptureMode::Preset {
            resolution: target.resolution,
        },
    }
}

/// Sink for raw frames, invoked from the device's own thread.
pub type FrameCallback = Arc<dyn Fn(RawFrame) + Send + Sync>;

/// Camera binding.
pub trait FrameSource: Send {
    /// Lenses physically present on this device.
    fn lenses(&self) -> Vec<Lens>;

    /// Supported formats for `lens`.
    fn formats(&self, lens: Lens) -> Result<Vec<FormatRange>, CaptureError>;

    /// Begin delivering frames to `on_frame`, one per device tick.
    fn start(&mut self, lens: Lens, mode: CaptureMode, on_frame: FrameCallback) -> Result<(), CaptureError>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self);
}

/// Owns the frame source and its negotiated configuration.
pub struct CapturePipeline {
    source: Box<dyn FrameSource>,
    target: CaptureTarget,
    configured: Option<(Lens, CaptureMode)>,
    on_frame: Option<FrameCallback>,
    running: bool,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn FrameSource>, target: CaptureTarget) -> Self {
        Self {
            source,
            target,
            configured: None,
            on_frame: None,
            running: false,
        }
    }

    /// Select the camera for `lens` and negotiate its mode. Does not start capture.
    pub fn configure(&mut self, lens: Lens) -> Result<CaptureMode, CaptureError> {
        let mode = self.select(lens)?;
        self.configured = Some((lens, mode));
        Ok(mode)
    }

    fn select(&self, lens: Lens) -> Result<CaptureMode, CaptureError> {
        if !self.source.lenses().contains(&lens) {
            return Err(CaptureError::LensUnavailable(lens.as_str()));
        }
        let formats = self.source.formats(lens)?;
        if formats.is_empty() {
            return Err(CaptureError::NoFormats(lens.as_str()));
        }
        let mode = negotiate(&formats, self.target);
        match mode {
            CaptureMode::Format { format, fps } => {
                info!(%lens, resolution = %format.resolution, fps, "capture format selected")
            }
            CaptureMode::Preset { resolution } => {
                info!(%lens, %resolution, "no format meets target; using preset")
            }
        }
        Ok(mode)
    }

    /// Start the configured source, delivering frames to `on_frame`.
    pub fn start(&mut self, on_frame: FrameCallback) -> Result<(), CaptureError> {
        let (lens, mode) = self
            .configured
            .ok_or_else(|| CaptureError::StartFailed("capture not configured".into()))?;
        self.source.start(lens, mode, on_frame.clone())?;
        self.on_frame = Some(on_frame);
        self.running = true;
        Ok(())
    }

    /// Swap the active lens: pause, reconfigure the input, resume with the same
    /// callback. Takes `&mut self`, so it cannot overlap with itself.
    ///
    /// The new camera is checked before anything stops. On error the previous lens
    /// is still configured, and still running if it was; check [`is_running`] to
    /// tell a refused switch from a lost camera.
    ///
    /// [`is_running`]: CapturePipeline::is_running
    pub fn reconfigure(&mut self, lens: Lens) -> Result<(), CaptureError> {
        let mode = self.select(lens)?;
        let previous = self.configured.replace((lens, mode));
        let was_running = self.running;
        self.halt();
        if was_running {
            if let Some(on_frame) = self.on_frame.clone() {
                if let Err(e) = self.start(on_frame.clone()) {
                    warn!(%lens, error = %e, "new lens failed to start; resuming previous lens");
                    self.configured = previous;
                    self.start(on_frame)?;
                    return Err(e);
                }
            }
        }
        debug!(%lens, resumed = was_running, "capture reconfigured");
        Ok(())
    }

    /// Stop delivering frames. Keeps the configuration for the next `start`.
    pub fn halt(&mut self) {
        if self.running {
            self.source.stop();
            self.running = false;
        }
    }

    /// Halt and forget the frame callback.
    pub fn release(&mut self) {
        self.halt();
        self.on_frame = None;
    }

    pub fn lens(&self) -> Option<Lens> {
        self.configured.map(|(lens, _)| lens)
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.configured.map(|(_, mode)| mode)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.halt();
    }
}
