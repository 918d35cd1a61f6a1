use std::io;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Pause between write attempts while the socket buffer is full.
pub const SEND_INTERVAL: Duration = Duration::from_millis(1);

/// Pause between command polls while nothing has arrived.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounded sleep-and-retry for non-blocking I/O, cut short by cancellation.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    cancel: CancellationToken,
}

impl Backoff {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fails with `Cancelled` once the token has fired.
    pub fn check(&self) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep one interval, checking cancellation on both sides of the sleep.
    pub fn pause(&self) -> Result<(), TransportError> {
        self.check()?;
        thread::sleep(self.interval);
        self.check()
    }

    /// Run `op` until it completes with anything other than "not ready yet".
    ///
    /// `WouldBlock` and `TimedOut` back off for one interval, `Interrupted` retries
    /// immediately, every other error is returned.
    pub fn retry<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> Result<T, TransportError> {
        loop {
            self.check()?;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    self.pause()?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}
