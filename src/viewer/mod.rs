//! Viewer side: accept one producer at a time, deframe, decode and present.
//!
//! Command bytes from the display surface are written on the same connection
//! between reads. The in-progress read is kept alive across those writes, so a
//! command never costs a partially read packet.

pub mod headless;
pub mod sink;
pub mod terminal;

pub use sink::{DecodedFrame, FpsCounter, PresentSink, Screen};

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{read_packet_async, Command};

pub const DEFAULT_PORT: u16 = 5000;

/// Largest frame a viewer accepts unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// How often a connected sink republishes its frame rate.
const RATE_REFRESH: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Connections declaring a larger frame are dropped. `None` accepts any length.
    pub max_frame_len: Option<u32>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_frame_len: Some(DEFAULT_MAX_FRAME_LEN),
        }
    }
}

impl ReceiverConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

pub struct Receiver {
    config: ReceiverConfig,
    sink: PresentSink,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl Receiver {
    pub fn new(
        config: ReceiverConfig,
        sink: PresentSink,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            sink,
            commands,
            cancel,
        }
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn listen(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        self.serve(listener).await
    }

    /// Accept producers one after another on `listener` until cancelled.
    pub async fn serve(mut self, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "waiting for a producer");
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            info!(%peer, "producer connected");
            // Keys pressed while nobody was connected are not replayed.
            while self.commands.try_recv().is_ok() {}
            self.sink.connected(peer);

            match self.handle(stream).await {
                Ok(()) => info!(%peer, "producer disconnected"),
                Err(e) => warn!(%peer, "connection dropped: {}", e),
            }
            self.sink.disconnected();

            if self.cancel.is_cancelled() {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, stream: TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let max_len = self.config.max_frame_len;
        let mut read = Box::pin(next_packet(reader, max_len));
        let mut rate = tokio::time::interval(RATE_REFRESH);
        rate.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = rate.tick() => self.sink.refresh_rate(),
                (reader, packet) = &mut read => {
                    let Some(payload) = packet? else {
                        return Ok(());
                    };
                    self.sink.accept_payload(&payload);
                    read.set(next_packet(reader, max_len));
                }
                Some(cmd) = self.commands.recv() => {
                    writer.write_all(&[cmd.as_byte()]).await?;
                    debug!(?cmd, "command sent");
                }
            }
        }
    }
}

/// Owns the read half for the duration of one packet and hands it back.
async fn next_packet(
    mut reader: OwnedReadHalf,
    max_len: Option<u32>,
) -> (OwnedReadHalf, io::Result<Option<Vec<u8>>>) {
    let packet = read_packet_async(&mut reader, max_len).await;
    (reader, packet)
}
