use std::io::Write;
use tracing::trace;

use super::Backoff;
use crate::error::TransportError;
use crate::protocol::encode_packet_into;

/// Writes Frame Packets to the outbound half of the connection.
///
/// Once `send` starts a packet it either writes every byte of it or reports the
/// connection broken. It never abandons a half-written packet and carries on.
pub struct FrameSender<W> {
    writer: W,
    packet: Vec<u8>,
    backoff: Backoff,
}

impl<W: Write> FrameSender<W> {
    pub fn new(writer: W, backoff: Backoff) -> Self {
        Self {
            writer,
            packet: Vec::new(),
            backoff,
        }
    }

    /// Frame `payload` and write it out in full.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        encode_packet_into(payload, &mut self.packet)?;

        let mut written = 0;
        let mut stalls = 0u32;
        while written < self.packet.len() {
            let chunk = &self.packet[written..];
            let writer = &mut self.writer;
            let n = self.backoff.retry(|| {
                let result = writer.write(chunk);
                if result.is_err() {
                    stalls += 1;
                }
                result
            })?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            written += n;
        }
        let writer = &mut self.writer;
        self.backoff.retry(|| writer.flush())?;

        if stalls > 0 {
            trace!(bytes = self.packet.len(), stalls, "packet sent after backoff");
        }
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_packet;
    use std::io::{self, Cursor};
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    /// Accepts at most `chunk` bytes per call and refuses every other call.
    struct Congested {
        out: Vec<u8>,
        chunk: usize,
        calls: usize,
    }

    impl Write for Congested {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Never has room.
    struct Full;

    impl Write for Full {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Dead;

    impl Write for Dead {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_micros(100), CancellationToken::new())
    }

    #[test]
    fn test_partial_writes_deliver_whole_packets_in_order() {
        let writer = Congested { out: Vec::new(), chunk: 7, calls: 0 };
        let mut sender = FrameSender::new(writer, backoff());
        let frames: Vec<Vec<u8>> = vec![vec![1; 50], Vec::new(), (0..=255).collect()];
        for frame in &frames {
            sender.send(frame).unwrap();
        }

        let mut cursor = Cursor::new(sender.get_ref().out.clone());
        for frame in &frames {
            assert_eq!(read_packet(&mut cursor).unwrap().as_ref(), Some(frame));
        }
        assert_eq!(read_packet(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_zero_write_is_closed() {
        let mut sender = FrameSender::new(Dead, backoff());
        assert!(matches!(sender.send(b"jpeg"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_cancel_releases_a_blocked_send() {
        let cancel = CancellationToken::new();
        let mut sender = FrameSender::new(Full, Backoff::new(Duration::from_millis(1), cancel.clone()));
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });

        let started = Instant::now();
        let err = sender.send(&[0u8; 1024]).unwrap_err();
        canceller.join().unwrap();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
