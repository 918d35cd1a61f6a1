use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

use camlink::capture::Resolution;
use camlink::config::{StreamOverrides, ViewOverrides};
use camlink::session::{Lens, Orientation};

#[derive(Parser)]
#[command(name = "camlink")]
#[command(about = "📷 Live camera uplink over a single raw TCP socket", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream the camera to a viewer
    Stream(StreamArgs),

    /// Wait for a producer and display its stream
    View(ViewArgs),
}

#[derive(Args)]
pub struct StreamArgs {
    /// Viewer address (ip:port), or any text containing one such as a pairing URL
    #[arg(short, long)]
    pub to: Option<String>,

    /// Starting lens: wide or ultra
    #[arg(short, long)]
    pub lens: Option<Lens>,

    /// Starting orientation: portrait, landscapeLeft, landscapeRight or upsideDown
    #[arg(short, long)]
    pub orientation: Option<Orientation>,

    /// Starting zoom factor (1.0 - 10.0)
    #[arg(short, long)]
    pub zoom: Option<f32>,

    /// Capture resolution to negotiate, e.g. 1920x1080
    #[arg(long)]
    pub resolution: Option<Resolution>,

    /// Capture frame rate to negotiate
    #[arg(long)]
    pub fps: Option<f32>,

    /// Print session events to stdout as JSON lines
    #[arg(long)]
    pub json_events: bool,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl StreamArgs {
    pub fn overrides(&self) -> StreamOverrides {
        StreamOverrides {
            to: self.to.clone(),
            lens: self.lens,
            orientation: self.orientation,
            zoom: self.zoom,
            resolution: self.resolution,
            fps: self.fps,
            json_events: self.json_events,
        }
    }
}

#[derive(Args)]
pub struct ViewArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Log frame rates instead of drawing frames
    #[arg(long)]
    pub headless: bool,

    /// Drop connections that declare a frame larger than this (MiB, 0 = no limit)
    #[arg(long)]
    pub max_frame_mb: Option<u32>,

    /// Log file used while the terminal view is up
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Force graphics protocol: sixel, kitty, iterm2, halfblocks (auto-detected by default)
    #[arg(short, long)]
    pub graphics: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ViewArgs {
    pub fn overrides(&self) -> ViewOverrides {
        ViewOverrides {
            bind: self.bind,
            port: self.port,
            max_frame_mb: self.max_frame_mb,
            headless: self.headless,
            log_file: self.log_file.clone(),
            graphics: self.graphics.clone(),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
