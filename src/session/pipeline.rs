//! The pipeline context: one thread that owns the capture pipeline, the encoder and
//! the sender. Frames and configuration changes both arrive on its queue, so a lens
//! switch can never race a send.

use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::machine::Shared;
use super::SessionConfig;
use crate::capture::{AdmissionPermit, CapturePipeline, RawFrame};
use crate::encode::{FrameEncoder, OutputTransform};
use crate::transport::FrameSender;

/// How often the pipeline logs its counters.
const STATS_EVERY: u64 = 300;

pub(crate) enum PipelineMsg {
    /// An admitted frame. The permit keeps the gate closed until the frame is done.
    Frame(RawFrame, AdmissionPermit),
    /// The session configuration changed. `revision` identifies the stored change.
    Apply { config: SessionConfig, revision: u64 },
    Shutdown,
}

/// Run until shutdown or a fatal error; hands the capture pipeline back, halted.
pub(crate) fn run<W: Write>(
    shared: Arc<Shared>,
    mut capture: CapturePipeline,
    initial: SessionConfig,
    mut sender: FrameSender<W>,
    mut rx: mpsc::UnboundedReceiver<PipelineMsg>,
) -> CapturePipeline {
    let mut encoder = FrameEncoder::new(transform_of(&initial));
    if let Err(e) = apply(&mut capture, &mut encoder, &initial) {
        shared.fail(e);
        capture.release();
        return capture;
    }

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            PipelineMsg::Frame(frame, permit) => {
                let Some(jpeg) = encoder.encode(&frame) else {
                    shared.stats.record_skipped();
                    continue;
                };
                let result = sender.send(&jpeg);
                drop(permit);

                match result {
                    Ok(()) => {
                        let sent = shared.stats.record_sent(jpeg.len());
                        if sent % STATS_EVERY == 0 {
                            let stats = shared.stats.snapshot();
                            info!(
                                sent = stats.frames_sent,
                                dropped = stats.frames_dropped,
                                skipped = stats.frames_skipped,
                                mb = stats.bytes_sent as f64 / 1_048_576.0,
                                "streaming"
                            );
                        }
                    }
                    Err(e) => {
                        shared.fail(e);
                        break;
                    }
                }
            }
            PipelineMsg::Apply { config, revision } => {
                if let Err(e) = apply(&mut capture, &mut encoder, &config) {
                    match capture.lens().filter(|_| capture.is_running()) {
                        Some(running) => {
                            warn!(lens = %config.lens, %running, "lens switch refused: {}", e);
                            shared.keep_lens(revision, running);
                        }
                        None => {
                            shared.fail(e);
                            break;
                        }
                    }
                }
            }
            PipelineMsg::Shutdown => break,
        }
    }

    capture.release();
    debug!("pipeline context exiting");
    capture
}

fn apply(
    capture: &mut CapturePipeline,
    encoder: &mut FrameEncoder,
    config: &SessionConfig,
) -> Result<(), crate::error::CaptureError> {
    encoder.set_transform(transform_of(config));
    if capture.lens() != Some(config.lens) {
        info!(lens = %config.lens, "switching lens");
        capture.reconfigure(config.lens)?;
    }
    Ok(())
}

fn transform_of(config: &SessionConfig) -> OutputTransform {
    OutputTransform {
        orientation: config.orientation,
        zoom: config.zoom,
    }
}
