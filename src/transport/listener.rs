use std::io::Read;
use tracing::{debug, trace};

use super::Backoff;
use crate::error::TransportError;
use crate::protocol::Command;

/// Polls the inbound half of the connection for single-byte commands.
pub struct CommandListener<R> {
    reader: R,
    backoff: Backoff,
}

impl<R: Read> CommandListener<R> {
    pub fn new(reader: R, backoff: Backoff) -> Self {
        Self { reader, backoff }
    }

    /// Dispatch every recognised byte to `apply` until the session is cancelled
    /// (`Ok`) or the connection ends (`Err`).
    pub fn run(mut self, mut apply: impl FnMut(Command)) -> Result<(), TransportError> {
        let mut buf = [0u8; 64];
        loop {
            let reader = &mut self.reader;
            let n = match self.backoff.retry(|| reader.read(&mut buf)) {
                Ok(n) => n,
                Err(TransportError::Cancelled) => {
                    debug!("command listener cancelled");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(TransportError::Closed);
            }

            for &byte in &buf[..n] {
                match Command::from_byte(byte) {
                    Some(cmd) => {
                        debug!(?cmd, "command received");
                        apply(cmd);
                    }
                    None => trace!(byte, "ignoring unknown control byte"),
                }
            }
        }
    }
}
