//! Frame encoder.
//!
//! Converts a raw device frame to packed RGB, applies the output-path transform
//! (digital zoom crop, then orientation) and JPEG-compresses it at a fixed quality.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageBuffer, RgbImage};
use tracing::debug;

use crate::capture::{PixelLayout, RawFrame};
use crate::session::{Orientation, Zoom};

/// JPEG quality on the codec's 1..=100 scale (0.6 of full quality).
pub const JPEG_QUALITY: u8 = 60;

/// Output-path settings. The device never sees these.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputTransform {
    pub orientation: Orientation,
    pub zoom: Zoom,
}

/// Stateful JPEG encoder that reuses its conversion buffer between frames.
pub struct FrameEncoder {
    quality: u8,
    transform: OutputTransform,
    rgb: Vec<u8>,
    last_size: usize,
}

impl FrameEncoder {
    pub fn new(transform: OutputTransform) -> Self {
        Self {
            quality: JPEG_QUALITY,
            transform,
            rgb: Vec::new(),
            last_size: 0,
        }
    }

    pub fn set_transform(&mut self, transform: OutputTransform) {
        self.transform = transform;
    }

    pub fn transform(&self) -> OutputTransform {
        self.transform
    }

    /// Compress one frame. `None` means the frame is unusable and should be skipped.
    pub fn encode(&mut self, frame: &RawFrame) -> Option<Vec<u8>> {
        let Some(bpp) = frame.layout.bytes_per_pixel() else {
            debug!(layout = ?frame.layout, "unsupported pixel layout");
            return None;
        };
        if !is_well_formed(frame, bpp) {
            debug!(?frame, "malformed frame");
            return None;
        }

        let crop = crop_rect(frame.width, frame.height, self.transform.zoom);
        let mut rgb = std::mem::take(&mut self.rgb);
        to_rgb(frame, bpp, crop, &mut rgb);

        let img: RgbImage = ImageBuffer::from_raw(crop.w, crop.h, rgb)?;
        let img = match self.transform.orientation.quarter_turns() {
            0 => img,
            1 => imageops::rotate90(&img),
            2 => imageops::rotate180(&img),
            _ => imageops::rotate270(&img),
        };

        let mut out = Vec::with_capacity(self.last_size + self.last_size / 4);
        let encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        let result = img.write_with_encoder(encoder);
        self.rgb = img.into_raw();

        match result {
            Ok(()) => {
                self.last_size = out.len();
                Some(out)
            }
            Err(e) => {
                debug!("JPEG encode failed: {}", e);
                None
            }
        }
    }
}

fn is_well_formed(frame: &RawFrame, bpp: usize) -> bool {
    if frame.width == 0 || frame.height == 0 {
        return false;
    }
    let Some(row) = (frame.width as usize).checked_mul(bpp) else {
        return false;
    };
    if frame.stride < row {
        return false;
    }
    // Last row may omit its padding.
    let needed = frame
        .stride
        .checked_mul(frame.height as usize - 1)
        .and_then(|n| n.checked_add(row));
    matches!(needed, Some(needed) if frame.data.len() >= needed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Centre crop for a digital zoom factor.
fn crop_rect(width: u32, height: u32, zoom: Zoom) -> Rect {
    let z = zoom.get().max(1.0);
    let w = ((width as f32 / z).round() as u32).clamp(1, width);
    let h = ((height as f32 / z).round() as u32).clamp(1, height);
    Rect {
        x: (width - w) / 2,
        y: (height - h) / 2,
        w,
        h,
    }
}

/// Convert the `crop` region of `frame` to packed RGB in `out`.
fn to_rgb(frame: &RawFrame, bpp: usize, crop: Rect, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(crop.w as usize * crop.h as usize * 3);

    for y in crop.y..crop.y + crop.h {
        let start = y as usize * frame.stride + crop.x as usize * bpp;
        let row = &frame.data[start..start + crop.w as usize * bpp];
        match frame.layout {
            PixelLayout::Rgb8 => out.extend_from_slice(row),
            PixelLayout::Rgba8 => {
                for px in row.chunks_exact(4) {
                    out.extend_from_slice(&px[..3]);
                }
            }
            PixelLayout::Bgra8 => {
                for px in row.chunks_exact(4) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelLayout::Gray8 => {
                for &v in row {
                    out.extend_from_slice(&[v, v, v]);
                }
            }
            PixelLayout::Nv12 => unreachable!("planar layouts are rejected before conversion"),
        }
    }
}
