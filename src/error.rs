//! Error types shared by the producer and the viewer.

use std::io;
use thiserror::Error;

/// Result alias for library operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error. Anything here that reaches the session invalidates it.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Camera selection or format negotiation failed.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no camera available for lens {0}")]
    LensUnavailable(&'static str),

    #[error("camera reported no usable formats for lens {0}")]
    NoFormats(&'static str),

    #[error("camera failed to start: {0}")]
    StartFailed(String),
}

/// The connection is broken or was never usable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection closed by peer")]
    Closed,

    #[error("payload of {0} bytes does not fit a frame packet")]
    PayloadTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The session was stopped while an operation was waiting. Not a failure.
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Cancellation is the clean-shutdown path and must not surface as an error event.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Invalid user or file configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address '{0}': expected <IPv4>:<port>")]
    InvalidEndpoint(String),

    #[error("no viewer address: pass --to or set stream.to in the config file")]
    MissingEndpoint,

    #[error("unknown lens '{0}': expected wide or ultra")]
    InvalidLens(String),

    #[error("unknown orientation '{0}': expected portrait, landscapeLeft, landscapeRight or upsideDown")]
    InvalidOrientation(String),

    #[error("zoom {0} is outside 1.0..=10.0")]
    InvalidZoom(f32),

    #[error("invalid resolution '{0}': expected <width>x<height>")]
    InvalidResolution(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
