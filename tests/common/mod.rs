#![allow(dead_code)]

use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camlink::capture::{CaptureMode, FormatRange, FrameCallback, FrameSource, PixelLayout, RawFrame};
use camlink::error::CaptureError;
use camlink::session::{Endpoint, Lens};

#[derive(Default)]
struct CameraState {
    callback: Option<FrameCallback>,
    starts: Vec<Lens>,
    stops: usize,
}

/// Camera whose frames are pushed by the test instead of a device clock.
pub struct ManualCamera {
    lenses: Vec<Lens>,
    state: Arc<Mutex<CameraState>>,
}

#[derive(Clone)]
pub struct CameraHandle(Arc<Mutex<CameraState>>);

pub fn camera(lenses: Vec<Lens>) -> (ManualCamera, CameraHandle) {
    let state = Arc::new(Mutex::new(CameraState::default()));
    (
        ManualCamera {
            lenses,
            state: state.clone(),
        },
        CameraHandle(state),
    )
}

impl FrameSource for ManualCamera {
    fn lenses(&self) -> Vec<Lens> {
        self.lenses.clone()
    }

    fn formats(&self, _lens: Lens) -> Result<Vec<FormatRange>, CaptureError> {
        Ok(vec![FormatRange::new(1920, 1080, 1.0, 60.0)])
    }

    fn start(&mut self, lens: Lens, _mode: CaptureMode, on_frame: FrameCallback) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap();
        state.starts.push(lens);
        state.callback = Some(on_frame);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.callback = None;
        state.stops += 1;
    }
}

impl CameraHandle {
    /// Deliver a frame the way a device tick would. False if capture is not running.
    pub fn emit(&self, frame: RawFrame) -> bool {
        let callback = self.0.lock().unwrap().callback.clone();
        match callback {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    pub fn starts(&self) -> Vec<Lens> {
        self.0.lock().unwrap().starts.clone()
    }

    pub fn is_running(&self) -> bool {
        self.0.lock().unwrap().callback.is_some()
    }
}

pub fn gray_frame(width: u32, height: u32, seq: u64) -> RawFrame {
    let data = vec![(seq % 256) as u8; (width * height) as usize];
    RawFrame::packed(width, height, PixelLayout::Gray8, data, seq)
}

/// Incompressible frame, so every packet is large.
pub fn noise_frame(width: u32, height: u32, seq: u64) -> RawFrame {
    let mut x = seq.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let data = (0..width * height * 3)
        .map(|_| {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (x >> 56) as u8
        })
        .collect();
    RawFrame::packed(width, height, PixelLayout::Rgb8, data, seq)
}

pub fn jpeg_dimensions(jpeg: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg).unwrap();
    (img.width(), img.height())
}

/// A blocking listener standing in for the viewer.
pub fn viewer_socket() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::new(Ipv4Addr::LOCALHOST, port))
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
