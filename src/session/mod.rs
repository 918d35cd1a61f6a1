//! Producer session: configuration model, lifecycle states and status events.

mod machine;
mod pipeline;

pub use machine::{SessionStats, Streamer};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::ConfigError;
use crate::protocol::{Command, ZOOM_STEP};

/// Physical camera selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lens {
    #[default]
    #[serde(rename = "wide")]
    Wide,
    #[serde(rename = "ultra")]
    UltraWide,
}

impl Lens {
    pub fn as_str(self) -> &'static str {
        match self {
            Lens::Wide => "wide",
            Lens::UltraWide => "ultra",
        }
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lens {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wide" => Ok(Lens::Wide),
            "ultra" => Ok(Lens::UltraWide),
            other => Err(ConfigError::InvalidLens(other.to_string())),
        }
    }
}

/// Output orientation. Applied to the encoded image only, never to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    #[default]
    Portrait,
    LandscapeLeft,
    LandscapeRight,
    UpsideDown,
}

impl Orientation {
    /// Next orientation in the fixed clockwise rotation order.
    pub fn rotated(self) -> Self {
        match self {
            Orientation::Portrait => Orientation::LandscapeRight,
            Orientation::LandscapeRight => Orientation::UpsideDown,
            Orientation::UpsideDown => Orientation::LandscapeLeft,
            Orientation::LandscapeLeft => Orientation::Portrait,
        }
    }

    /// Clockwise quarter turns applied to the sensor image.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Orientation::Portrait => 0,
            Orientation::LandscapeRight => 1,
            Orientation::UpsideDown => 2,
            Orientation::LandscapeLeft => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::LandscapeLeft => "landscapeLeft",
            Orientation::LandscapeRight => "landscapeRight",
            Orientation::UpsideDown => "upsideDown",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portrait" => Ok(Orientation::Portrait),
            "landscapeLeft" => Ok(Orientation::LandscapeLeft),
            "landscapeRight" => Ok(Orientation::LandscapeRight),
            "upsideDown" => Ok(Orientation::UpsideDown),
            other => Err(ConfigError::InvalidOrientation(other.to_string())),
        }
    }
}

/// Zoom factor in `1.0..=10.0`, held at one decimal place.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Zoom(f32);

impl Zoom {
    pub const MIN: f32 = 1.0;
    pub const MAX: f32 = 10.0;

    /// Validate a user-supplied zoom. Out-of-range values are rejected, not clamped.
    pub fn new(value: f32) -> Result<Self, ConfigError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(ConfigError::InvalidZoom(value));
        }
        Ok(Self(quantize(value)))
    }

    /// Clamp any value into range.
    pub fn clamped(value: f32) -> Self {
        Self(adjust_zoom(value, 0.0))
    }

    pub fn adjust(self, delta: f32) -> Self {
        Self(adjust_zoom(self.0, delta))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl fmt::Display for Zoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}x", self.0)
    }
}

/// Apply `delta` to `current`, clamp to the zoom range and round to one decimal.
pub fn adjust_zoom(current: f32, delta: f32) -> f32 {
    let next = current + delta;
    if next.is_nan() {
        return Zoom::MIN;
    }
    quantize(next.clamp(Zoom::MIN, Zoom::MAX))
}

fn quantize(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

/// Externally settable capture parameters. Survive across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionConfig {
    pub lens: Lens,
    pub orientation: Orientation,
    pub zoom: Zoom,
}

/// A single mutation of [`SessionConfig`]. Every path that changes configuration,
/// whether a local setter or a command byte from the viewer, goes through one of these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigChange {
    Lens(Lens),
    Orientation(Orientation),
    Rotate,
    Zoom(Zoom),
    ZoomBy(f32),
}

impl SessionConfig {
    pub fn apply(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::Lens(lens) => self.lens = lens,
            ConfigChange::Orientation(orientation) => self.orientation = orientation,
            ConfigChange::Rotate => self.orientation = self.orientation.rotated(),
            ConfigChange::Zoom(zoom) => self.zoom = zoom,
            ConfigChange::ZoomBy(delta) => self.zoom = self.zoom.adjust(delta),
        }
    }
}

impl From<Command> for ConfigChange {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::SelectWide => ConfigChange::Lens(Lens::Wide),
            Command::SelectUltraWide => ConfigChange::Lens(Lens::UltraWide),
            Command::Rotate => ConfigChange::Rotate,
            Command::ZoomIn => ConfigChange::ZoomBy(ZOOM_STEP),
            Command::ZoomOut => ConfigChange::ZoomBy(-ZOOM_STEP),
        }
    }
}

/// Lifecycle of the producer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Stopped,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status events for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionEvent {
    Active,
    Stopped,
    Error { message: String },
}

/// Viewer address, `<IPv4>:<port>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self { host, port }
    }

    /// Find the first `ip:port` inside a longer string such as a pairing URL
    /// (`http://192.168.1.100:5000/ws`).
    pub fn find_in(text: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})").expect("static pattern")
        });
        pattern.captures_iter(text).find_map(|caps| {
            let host = caps[1].parse().ok()?;
            let port = caps[2].parse().ok()?;
            Some(Self { host, port })
        })
    }

    pub fn socket_addr(self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddrV4 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
        Ok(Self::new(*addr.ip(), addr.port()))
    }
}
