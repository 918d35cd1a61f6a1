//! Settings for both binaries.
//!
//! Precedence: command-line flag, then the TOML config file, then the defaults here.
//!
//! ```toml
//! [stream]
//! to = "192.168.1.100:5000"
//! lens = "ultra"
//! orientation = "landscapeRight"
//! zoom = 2.0
//! resolution = "1920x1080"
//! fps = 60
//!
//! [view]
//! port = 5000
//! max_frame_mb = 64
//! headless = true
//! ```

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::capture::{CaptureTarget, Resolution};
use crate::error::ConfigError;
use crate::session::{Endpoint, Lens, Orientation, SessionConfig, Zoom};
use crate::viewer::{ReceiverConfig, DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT};

const DEFAULT_LOG_FILE: &str = "camlink-view.log";

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub stream: StreamFile,
    pub view: ViewFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StreamFile {
    pub to: Option<String>,
    pub lens: Option<Lens>,
    pub orientation: Option<Orientation>,
    pub zoom: Option<f32>,
    pub resolution: Option<String>,
    pub fps: Option<f32>,
    pub json_events: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ViewFile {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    /// 0 disables the limit.
    pub max_frame_mb: Option<u32>,
    pub headless: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub graphics: Option<String>,
}

/// Read a config file. A missing path is an error; callers only pass one the user named.
pub fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Producer values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct StreamOverrides {
    pub to: Option<String>,
    pub lens: Option<Lens>,
    pub orientation: Option<Orientation>,
    pub zoom: Option<f32>,
    pub resolution: Option<Resolution>,
    pub fps: Option<f32>,
    pub json_events: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub endpoint: Endpoint,
    pub session: SessionConfig,
    pub target: CaptureTarget,
    pub json_events: bool,
}

impl StreamSettings {
    pub fn resolve(file: StreamFile, cli: StreamOverrides) -> Result<Self, ConfigError> {
        let to = cli.to.or(file.to).ok_or(ConfigError::MissingEndpoint)?;
        let endpoint = parse_endpoint(&to)?;

        let zoom = match cli.zoom.or(file.zoom) {
            Some(z) => Zoom::new(z)?,
            None => Zoom::default(),
        };
        let session = SessionConfig {
            lens: cli.lens.or(file.lens).unwrap_or_default(),
            orientation: cli.orientation.or(file.orientation).unwrap_or_default(),
            zoom,
        };

        let defaults = CaptureTarget::default();
        let resolution = match (cli.resolution, file.resolution) {
            (Some(r), _) => r,
            (None, Some(text)) => text.parse()?,
            (None, None) => defaults.resolution,
        };
        let fps = cli.fps.or(file.fps).unwrap_or(defaults.fps);

        Ok(Self {
            endpoint,
            session,
            target: CaptureTarget { resolution, fps },
            json_events: cli.json_events || file.json_events.unwrap_or(false),
        })
    }
}

/// Accept a bare `ip:port` or any text containing one, such as a pairing URL.
pub fn parse_endpoint(text: &str) -> Result<Endpoint, ConfigError> {
    text.parse()
        .or_else(|_| Endpoint::find_in(text).ok_or_else(|| ConfigError::InvalidEndpoint(text.to_string())))
}

/// Viewer values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct ViewOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub max_frame_mb: Option<u32>,
    pub headless: bool,
    pub log_file: Option<PathBuf>,
    pub graphics: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSettings {
    pub receiver: ReceiverConfig,
    pub headless: bool,
    pub log_file: PathBuf,
    pub graphics: Option<String>,
}

impl ViewSettings {
    pub fn resolve(file: ViewFile, cli: ViewOverrides) -> Self {
        let max_frame_len = match cli.max_frame_mb.or(file.max_frame_mb) {
            Some(0) => None,
            Some(mb) => Some(mb.saturating_mul(1024 * 1024)),
            None => Some(DEFAULT_MAX_FRAME_LEN),
        };
        Self {
            receiver: ReceiverConfig {
                bind: cli.bind.or(file.bind).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
                max_frame_len,
            },
            headless: cli.headless || file.headless.unwrap_or(false),
            log_file: cli
                .log_file
                .or(file.log_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            graphics: cli.graphics.or(file.graphics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_values_fill_gaps_and_cli_wins() {
        let file = write_config(
            r#"
            [stream]
            to = "192.168.1.100:5000"
            lens = "ultra"
            orientation = "landscapeLeft"
            zoom = 3.0
            resolution = "1280x720"
            "#,
        );
        let cfg = read_config_file(file.path()).unwrap();
        let settings = StreamSettings::resolve(
            cfg.stream,
            StreamOverrides {
                lens: Some(Lens::Wide),
                fps: Some(30.0),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(settings.endpoint, "192.168.1.100:5000".parse().unwrap());
        assert_eq!(settings.session.lens, Lens::Wide);
        assert_eq!(settings.session.orientation, Orientation::LandscapeLeft);
        assert_eq!(settings.session.zoom.get(), 3.0);
        assert_eq!(settings.target.resolution, Resolution::new(1280, 720));
        assert_eq!(settings.target.fps, 30.0);
        assert!(!settings.json_events);
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = StreamSettings::resolve(
            StreamFile::default(),
            StreamOverrides {
                to: Some("10.0.0.7:6000".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(settings.session, SessionConfig::default());
        assert_eq!(settings.target, CaptureTarget::default());

        let view = ViewSettings::resolve(ViewFile::default(), ViewOverrides::default());
        assert_eq!(view.receiver, ReceiverConfig::default());
        assert_eq!(view.log_file, PathBuf::from("camlink-view.log"));
        assert!(!view.headless);
    }

    #[test]
    fn test_pairing_text_is_accepted() {
        let endpoint = parse_endpoint("http://192.168.1.100:5000/ws").unwrap();
        assert_eq!(endpoint.port, 5000);
        assert!(matches!(parse_endpoint("no address here"), Err(ConfigError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let out_of_range = StreamSettings::resolve(
            StreamFile {
                zoom: Some(12.0),
                ..Default::default()
            },
            StreamOverrides {
                to: Some("10.0.0.7:6000".into()),
                ..Default::default()
            },
        );
        assert!(matches!(out_of_range, Err(ConfigError::InvalidZoom(_))));

        let missing = StreamSettings::resolve(StreamFile::default(), StreamOverrides::default());
        assert!(matches!(missing, Err(ConfigError::MissingEndpoint)));

        let bad_lens = write_config("[stream]\nlens = \"tele\"\n");
        assert!(matches!(read_config_file(bad_lens.path()), Err(ConfigError::Parse { .. })));

        let unknown = write_config("[view]\ncolour = true\n");
        assert!(matches!(read_config_file(unknown.path()), Err(ConfigError::Parse { .. })));

        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.toml");
        assert!(matches!(read_config_file(&absent), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_view_frame_limit() {
        let file = write_config("[view]\nport = 7000\nmax_frame_mb = 0\nheadless = true\n");
        let cfg = read_config_file(file.path()).unwrap();
        let view = ViewSettings::resolve(
            cfg.view,
            ViewOverrides {
                port: Some(7100),
                ..Default::default()
            },
        );
        assert_eq!(view.receiver.port, 7100);
        assert_eq!(view.receiver.max_frame_len, None);
        assert!(view.headless);

        let small = ViewSettings::resolve(
            ViewFile::default(),
            ViewOverrides {
                max_frame_mb: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(small.receiver.max_frame_len, Some(2 * 1024 * 1024));
    }
}
