//! Synthetic camera used when no hardware binding is linked.
//!
//! Renders a moving test card from its own thread at the negotiated rate, the way a
//! device driver would call back per tick. Each lens gets its own format table and tint
//! so lens switches are visible on the viewer.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CaptureMode, FormatRange, FrameCallback, FrameSource, PixelLayout, RawFrame, Resolution};
use crate::error::CaptureError;
use crate::session::Lens;

/// Rate used when the device is left to choose and the table has nothing better.
const FALLBACK_FPS: f32 = 30.0;

pub struct TestPatternSource {
    lenses: Vec<Lens>,
    output: Option<Resolution>,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TestPatternSource {
    /// A two-lens device.
    pub fn new() -> Self {
        Self::with_lenses(vec![Lens::Wide, Lens::UltraWide])
    }

    pub fn with_lenses(lenses: Vec<Lens>) -> Self {
        Self {
            lenses,
            output: None,
            worker: None,
        }
    }

    /// Emit frames of this size regardless of the negotiated mode.
    pub fn with_output_size(mut self, output: Resolution) -> Self {
        self.output = Some(output);
        self
    }

    fn table(lens: Lens) -> Vec<FormatRange> {
        match lens {
            Lens::Wide => vec![
                FormatRange::new(1280, 720, 1.0, 60.0),
                FormatRange::new(1920, 1080, 1.0, 60.0),
                FormatRange::new(3840, 2160, 1.0, 30.0),
            ],
            // The ultra-wide sensor cannot do 1080p60, so negotiation falls back.
            Lens::UltraWide => vec![
                FormatRange::new(1280, 720, 1.0, 60.0),
                FormatRange::new(1920, 1080, 1.0, 30.0),
                FormatRange::new(3840, 2160, 1.0, 30.0),
            ],
        }
    }

    fn rate_for(lens: Lens, mode: CaptureMode) -> f32 {
        match mode {
            CaptureMode::Format { fps, .. } => fps,
            CaptureMode::Preset { resolution } => Self::table(lens)
                .iter()
                .filter(|f| f.resolution == resolution)
                .map(|f| f.max_fps)
                .fold(None, |best: Option<f32>, fps| Some(best.map_or(fps, |b| b.max(fps))))
                .unwrap_or(FALLBACK_FPS),
        }
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for TestPatternSource {
    fn lenses(&self) -> Vec<Lens> {
        self.lenses.clone()
    }

    fn formats(&self, lens: Lens) -> Result<Vec<FormatRange>, CaptureError> {
        if !self.lenses.contains(&lens) {
            return Err(CaptureError::LensUnavailable(lens.as_str()));
        }
        Ok(Self::table(lens))
    }

    fn start(&mut self, lens: Lens, mode: CaptureMode, on_frame: FrameCallback) -> Result<(), CaptureError> {
        self.stop();

        let size = self.output.unwrap_or_else(|| mode.resolution());
        let fps = Self::rate_for(lens, mode);
        let interval = Duration::from_secs_f32(1.0 / fps.max(1.0));
        let cancel = CancellationToken::new();
        let running = cancel.clone();

        let handle = thread::Builder::new()
            .name("camlink-camera".to_string())
            .spawn(move || render_loop(lens, size, interval, on_frame, running))
            .map_err(|e| CaptureError::StartFailed(e.to_string()))?;

        debug!(%lens, %size, fps, "test pattern started");
        self.worker = Some((cancel, handle));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((cancel, handle)) = self.worker.take() {
            cancel.cancel();
            if handle.join().is_err() {
                warn!("test pattern thread panicked");
            }
        }
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_loop(lens: Lens, size: Resolution, interval: Duration, on_frame: FrameCallback, cancel: CancellationToken) {
    let mut seq: u64 = 0;
    while !cancel.is_cancelled() {
        let tick = Instant::now();
        on_frame(render(lens, size, seq));
        seq += 1;

        // Maintain device rate
        let elapsed = tick.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

/// BGRA test card: gradient background, a bar sweeping left to right and a white
/// block in the top-left corner so orientation is obvious.
fn render(lens: Lens, size: Resolution, seq: u64) -> RawFrame {
    let (w, h) = (size.width as usize, size.height as usize);
    let (tint_b, tint_r) = match lens {
        Lens::Wide => (200u8, 40u8),
        Lens::UltraWide => (40u8, 200u8),
    };
    let bar_x = (seq as usize * 8) % w.max(1);
    let bar_w = (w / 40).max(2);
    let marker = (w.min(h) / 8).max(2);

    let mut data = vec![0u8; w * h * 4];
    for (y, row) in data.chunks_exact_mut(w * 4).enumerate() {
        let g = (y * 255 / h.max(1)) as u8;
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let white = (x >= bar_x && x < bar_x + bar_w) || (x < marker && y < marker);
            if white {
                px.copy_from_slice(&[255, 255, 255, 255]);
            } else {
                let ramp = (x * 255 / w.max(1)) as u8;
                px.copy_from_slice(&[tint_b.saturating_add(ramp / 4), g, tint_r.saturating_add(ramp / 4), 255]);
            }
        }
    }
    RawFrame::packed(size.width, size.height, PixelLayout::Bgra8, data, seq)
}
