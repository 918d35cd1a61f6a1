//! Session state machine.
//!
//! `Streamer` is the single owner of the producer session. Worker contexts hold an
//! `Arc<Shared>` and may only query state, request a configuration change or report a
//! failure; every state change goes through the transitions defined here.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::pipeline::{self, PipelineMsg};
use super::{ConfigChange, Endpoint, Lens, Orientation, SessionConfig, SessionEvent, SessionState, Zoom};
use crate::capture::{AdmissionGate, CapturePipeline, CaptureTarget, FrameCallback, FrameSource, RawFrame};
use crate::error::{CaptureError, Error, Result, TransportError};
use crate::protocol::Command;
use crate::transport::{Backoff, CommandListener, FrameSender, POLL_INTERVAL, SEND_INTERVAL};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frame counters for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub frames_sent: u64,
    /// Frames refused at admission because the previous frame was still in flight.
    pub frames_dropped: u64,
    /// Frames the encoder rejected.
    pub frames_skipped: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    /// Returns the new sent count.
    pub(crate) fn record_sent(&self, bytes: usize) -> u64 {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [&self.sent, &self.dropped, &self.skipped, &self.bytes] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.sent.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            bytes_sent: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Handles a failure report needs to tear a run down from any context.
struct RunHandle {
    cancel: CancellationToken,
    socket: TcpStream,
    pipeline: mpsc::UnboundedSender<PipelineMsg>,
}

pub(crate) struct Shared {
    state: Mutex<SessionState>,
    config: Mutex<SessionConfig>,
    /// Bumped on every stored change, under the config lock.
    revision: AtomicU64,
    run: Mutex<Option<RunHandle>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) stats: Arc<Counters>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn config(&self) -> SessionConfig {
        *lock(&self.config)
    }

    fn emit(&self, event: SessionEvent) {
        debug!(?event, "session event");
        // The UI may have gone away; the session carries on regardless.
        let _ = self.events.send(event);
    }

    /// Update the stored configuration and, while a run exists, forward the result
    /// to the pipeline context. The config lock is held across the forward so
    /// concurrent changes reach the pipeline in the order they were stored.
    pub(crate) fn apply(&self, change: ConfigChange) {
        let mut config = lock(&self.config);
        config.apply(change);
        let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(run) = lock(&self.run).as_ref() {
            let msg = PipelineMsg::Apply {
                config: *config,
                revision,
            };
            if run.pipeline.send(msg).is_err() {
                trace!("pipeline context gone; change kept for next start");
            }
        }
    }

    /// The pipeline refused the lens stored at `revision` and kept `running`.
    /// Later changes are still queued behind it and win.
    pub(crate) fn keep_lens(&self, revision: u64, running: Lens) {
        let mut config = lock(&self.config);
        if self.revision.load(Ordering::Relaxed) == revision {
            config.lens = running;
        }
    }

    /// Transport or capture failure reported by a worker context.
    pub(crate) fn fail(&self, err: impl Into<Error>) {
        let err = err.into();
        if matches!(err, Error::Transport(ref t) if t.is_cancelled()) {
            return;
        }
        {
            let mut state = lock(&self.state);
            if !matches!(*state, SessionState::Active | SessionState::Connecting) {
                debug!(%state, "ignoring failure after session ended: {}", err);
                return;
            }
            *state = SessionState::Error;
        }
        error!("session failed: {}", err);
        self.teardown();
        self.emit(SessionEvent::Error {
            message: err.to_string(),
        });
    }

    /// Cancel the workers and close the connection. Safe to call more than once.
    fn teardown(&self) {
        let Some(run) = lock(&self.run).take() else {
            return;
        };
        run.cancel.cancel();
        let _ = run.pipeline.send(PipelineMsg::Shutdown);
        if let Err(e) = run.socket.shutdown(Shutdown::Both) {
            debug!("socket shutdown: {}", e);
        }
    }
}

struct Workers {
    pipeline: JoinHandle<CapturePipeline>,
    commands: Option<JoinHandle<()>>,
}

/// Everything `start` prepares before the worker contexts exist.
struct Prepared {
    stream: TcpStream,
    reader: TcpStream,
    cancel: CancellationToken,
    rx: mpsc::UnboundedReceiver<PipelineMsg>,
}

/// Producer session controller.
///
/// One per process. `start` and `stop` block briefly (connect, worker join); the
/// configuration setters never block and are valid in every state.
pub struct Streamer {
    shared: Arc<Shared>,
    capture: Option<CapturePipeline>,
    workers: Option<Workers>,
}

impl Streamer {
    pub fn new(
        source: Box<dyn FrameSource>,
        config: SessionConfig,
        target: CaptureTarget,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Idle),
            config: Mutex::new(config),
            revision: AtomicU64::new(0),
            run: Mutex::new(None),
            events,
            stats: Arc::new(Counters::default()),
        });
        let streamer = Self {
            shared,
            capture: Some(CapturePipeline::new(source, target)),
            workers: None,
        };
        (streamer, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn config(&self) -> SessionConfig {
        self.shared.config()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats.snapshot()
    }

    pub fn set_lens(&self, lens: Lens) {
        self.shared.apply(ConfigChange::Lens(lens));
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.shared.apply(ConfigChange::Orientation(orientation));
    }

    pub fn rotate(&self) {
        self.shared.apply(ConfigChange::Rotate);
    }

    pub fn set_zoom(&self, zoom: Zoom) {
        self.shared.apply(ConfigChange::Zoom(zoom));
    }

    pub fn adjust_zoom(&self, delta: f32) {
        self.shared.apply(ConfigChange::ZoomBy(delta));
    }

    /// Apply a command as if it had arrived from the viewer.
    pub fn apply_command(&self, cmd: Command) {
        self.shared.apply(cmd.into());
    }

    /// Idle/Stopped/Error → Connecting → Active.
    ///
    /// Configures the camera before touching the network. Any failure leaves the
    /// session in `Error`, emits an error event and is also returned. A no-op while a
    /// session is already connecting or active.
    pub fn start(&mut self, endpoint: Endpoint) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if matches!(*state, SessionState::Connecting | SessionState::Active) {
                debug!(%state, "start ignored; session already running");
                return Ok(());
            }
            *state = SessionState::Connecting;
        }
        self.reap();
        self.shared.stats.reset();
        info!(%endpoint, "starting session");

        if let Err(e) = self.launch(endpoint) {
            *lock(&self.shared.state) = SessionState::Error;
            error!("session failed to start: {}", e);
            self.shared.emit(SessionEvent::Error { message: e.to_string() });
            return Err(e);
        }

        let mut state = lock(&self.shared.state);
        if *state == SessionState::Connecting {
            *state = SessionState::Active;
            drop(state);
            info!(%endpoint, "session active");
            self.shared.emit(SessionEvent::Active);
        }
        Ok(())
    }

    /// Active/Connecting → Stopped. Idempotent; emits exactly one `stopped` per run.
    pub fn stop(&mut self) {
        let was_running = {
            let mut state = lock(&self.shared.state);
            let running = matches!(*state, SessionState::Active | SessionState::Connecting);
            if running {
                *state = SessionState::Stopped;
            }
            running
        };

        self.shared.teardown();
        self.reap();

        if was_running {
            let stats = self.stats();
            info!(sent = stats.frames_sent, dropped = stats.frames_dropped, "session stopped");
            self.shared.emit(SessionEvent::Stopped);
        }
    }

    fn launch(&mut self, endpoint: Endpoint) -> Result<()> {
        let mut capture = self
            .capture
            .take()
            .ok_or_else(|| CaptureError::StartFailed("capture pipeline unavailable".into()))?;

        let config = self.shared.config();
        let prepared = match self.prepare(&mut capture, config.lens, endpoint) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.shared.teardown();
                capture.release();
                self.capture = Some(capture);
                return Err(e);
            }
        };
        let Prepared {
            stream,
            reader,
            cancel,
            rx,
        } = prepared;

        // Snapshot after the run handle is installed so no change can fall between.
        let initial = self.shared.config();
        let shared = self.shared.clone();
        let sender = FrameSender::new(stream, Backoff::new(SEND_INTERVAL, cancel.clone()));
        let pipeline = thread::Builder::new()
            .name("camlink-pipeline".to_string())
            .spawn(move || pipeline::run(shared, capture, initial, sender, rx))
            .map_err(|e| {
                self.shared.teardown();
                TransportError::Io(e)
            })?;

        let shared = self.shared.clone();
        let listener = CommandListener::new(reader, Backoff::new(POLL_INTERVAL, cancel));
        let commands = thread::Builder::new()
            .name("camlink-commands".to_string())
            .spawn(move || {
                if let Err(e) = listener.run(|cmd| shared.apply(cmd.into())) {
                    shared.fail(e);
                }
            });

        match commands {
            Ok(commands) => {
                self.workers = Some(Workers {
                    pipeline,
                    commands: Some(commands),
                });
                Ok(())
            }
            Err(e) => {
                self.workers = Some(Workers {
                    pipeline,
                    commands: None,
                });
                self.shared.teardown();
                Err(TransportError::Io(e).into())
            }
        }
    }

    fn prepare(&self, capture: &mut CapturePipeline, lens: Lens, endpoint: Endpoint) -> Result<Prepared> {
        // Camera first: an unusable camera must not open a connection.
        capture.configure(lens)?;

        let addr = endpoint.socket_addr();
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        stream.set_nonblocking(true).map_err(TransportError::Io)?;
        let reader = stream.try_clone().map_err(TransportError::Io)?;
        let control = stream.try_clone().map_err(TransportError::Io)?;
        info!(%endpoint, "connected");

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let on_frame = admission(AdmissionGate::new(), tx.clone(), self.shared.stats.clone());
        *lock(&self.shared.run) = Some(RunHandle {
            cancel: cancel.clone(),
            socket: control,
            pipeline: tx,
        });

        capture.start(on_frame)?;
        Ok(Prepared {
            stream,
            reader,
            cancel,
            rx,
        })
    }

    /// Join the worker contexts of a finished run and take the capture pipeline back.
    fn reap(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        if let Some(commands) = workers.commands {
            if commands.join().is_err() {
                warn!("command listener panicked");
            }
        }
        match workers.pipeline.join() {
            Ok(capture) => self.capture = Some(capture),
            Err(_) => error!("pipeline context panicked; capture pipeline lost"),
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Device callback: admit the frame if the pipeline is idle, otherwise discard it.
fn admission(
    gate: AdmissionGate,
    tx: mpsc::UnboundedSender<PipelineMsg>,
    stats: Arc<Counters>,
) -> FrameCallback {
    Arc::new(move |frame: RawFrame| match gate.try_admit() {
        Some(permit) => {
            if tx.send(PipelineMsg::Frame(frame, permit)).is_err() {
                trace!("pipeline context gone; frame discarded");
            }
        }
        None => stats.record_dropped(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureMode, FormatRange};
    use std::net::{Ipv4Addr, TcpListener};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct CameraLog {
        starts: Vec<Lens>,
        stops: usize,
    }

    struct LoggingCamera {
        lenses: Vec<Lens>,
        log: Arc<Mutex<CameraLog>>,
    }

    impl FrameSource for LoggingCamera {
        fn lenses(&self) -> Vec<Lens> {
            self.lenses.clone()
        }

        fn formats(&self, _lens: Lens) -> std::result::Result<Vec<FormatRange>, CaptureError> {
            Ok(vec![FormatRange::new(1920, 1080, 1.0, 60.0)])
        }

        fn start(&mut self, lens: Lens, _mode: CaptureMode, _on_frame: FrameCallback) -> std::result::Result<(), CaptureError> {
            self.log.lock().unwrap().starts.push(lens);
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().stops += 1;
        }
    }

    fn streamer(lenses: Vec<Lens>) -> (Streamer, mpsc::UnboundedReceiver<SessionEvent>, Arc<Mutex<CameraLog>>) {
        let log = Arc::new(Mutex::new(CameraLog::default()));
        let camera = LoggingCamera { lenses, log: log.clone() };
        let (s, rx) = Streamer::new(Box::new(camera), SessionConfig::default(), CaptureTarget::default());
        (s, rx, log)
    }

    fn local_listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new(Ipv4Addr::LOCALHOST, port))
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, within: Duration) -> Option<SessionEvent> {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if let Ok(event) = rx.try_recv() {
                return Some(event);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_camera_failure_never_touches_network() {
        let (mut s, mut events, _) = streamer(vec![Lens::UltraWide]);
        let (listener, endpoint) = local_listener();
        listener.set_nonblocking(true).unwrap();

        let err = s.start(endpoint).unwrap_err();
        assert!(matches!(err, Error::Capture(CaptureError::LensUnavailable("wide"))));
        assert_eq!(s.state(), SessionState::Error);
        match events.try_recv() {
            Ok(SessionEvent::Error { message }) => assert!(message.contains("wide")),
            other => panic!("expected error event, got {other:?}"),
        }
        let accepted = listener.accept();
        assert!(matches!(accepted, Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock));
    }

    #[test]
    fn test_connect_refused_is_error_and_retryable() {
        let (mut s, mut events, log) = streamer(vec![Lens::Wide]);
        let (listener, endpoint) = local_listener();
        drop(listener);

        assert!(matches!(s.start(endpoint), Err(Error::Transport(TransportError::Connect { .. }))));
        assert_eq!(s.state(), SessionState::Error);
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Error { .. })));
        assert!(log.lock().unwrap().starts.is_empty());

        // The pipeline was handed back, so a later start can succeed.
        let (listener, endpoint) = local_listener();
        s.start(endpoint).unwrap();
        let _peer = listener.accept().unwrap();
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(events.try_recv(), Ok(SessionEvent::Active));
    }

    #[test]
    fn test_lifecycle_events_are_exact() {
        let (mut s, mut events, log) = streamer(vec![Lens::Wide]);
        let (listener, endpoint) = local_listener();

        s.start(endpoint).unwrap();
        let _peer = listener.accept().unwrap();
        assert_eq!(s.state(), SessionState::Active);
        s.start(endpoint).unwrap();

        s.stop();
        assert_eq!(s.state(), SessionState::Stopped);
        s.stop();

        assert_eq!(events.try_recv(), Ok(SessionEvent::Active));
        assert_eq!(events.try_recv(), Ok(SessionEvent::Stopped));
        assert!(events.try_recv().is_err());
        let log = log.lock().unwrap();
        assert_eq!(log.starts, vec![Lens::Wide]);
        assert_eq!(log.stops, 1);
    }

    #[test]
    fn test_changes_outside_active_apply_at_next_start() {
        let (mut s, mut events, log) = streamer(vec![Lens::Wide, Lens::UltraWide]);
        s.apply_command(Command::SelectUltraWide);
        s.apply_command(Command::Rotate);
        s.adjust_zoom(20.0);
        assert_eq!(s.state(), SessionState::Idle);
        assert!(events.try_recv().is_err());

        let cfg = s.config();
        assert_eq!(cfg.lens, Lens::UltraWide);
        assert_eq!(cfg.orientation, Orientation::LandscapeRight);
        assert_eq!(cfg.zoom.get(), Zoom::MAX);

        let (listener, endpoint) = local_listener();
        s.start(endpoint).unwrap();
        let _peer = listener.accept().unwrap();
        assert_eq!(log.lock().unwrap().starts, vec![Lens::UltraWide]);
    }

    #[test]
    fn test_peer_close_fails_the_session() {
        let (mut s, mut events, log) = streamer(vec![Lens::Wide]);
        let (listener, endpoint) = local_listener();
        s.start(endpoint).unwrap();
        let (peer, _) = listener.accept().unwrap();
        assert_eq!(events.try_recv(), Ok(SessionEvent::Active));

        drop(peer);
        match next_event(&mut events, Duration::from_secs(2)) {
            Some(SessionEvent::Error { message }) => assert!(message.contains("closed")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Error);

        // stop after a failure emits nothing further but reclaims the pipeline.
        s.stop();
        assert!(events.try_recv().is_err());
        assert_eq!(log.lock().unwrap().stops, 1);
    }

    #[test]
    fn test_refused_lens_reverts_only_the_latest_change() {
        let (s, _events, _) = streamer(vec![Lens::Wide]);
        s.set_lens(Lens::UltraWide);
        s.rotate();
        // A later change is still queued; it decides the lens.
        s.shared.keep_lens(1, Lens::Wide);
        assert_eq!(s.config().lens, Lens::UltraWide);

        s.shared.keep_lens(2, Lens::Wide);
        assert_eq!(s.config().lens, Lens::Wide);
        assert_eq!(s.config().orientation, Orientation::LandscapeRight);
    }
}
