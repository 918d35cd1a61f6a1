//! camlink: a live camera uplink over one raw TCP connection.
//!
//! The producer (`session::Streamer`) samples frames from a [`capture::FrameSource`],
//! JPEG-compresses them and writes length-prefixed packets to the viewer. The viewer
//! (`viewer::Receiver`) deframes, decodes and presents them, and writes single-byte
//! commands back on the same socket to steer lens, orientation and zoom.

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod viewer;

pub use error::{Error, Result};
