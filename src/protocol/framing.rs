//! Frame Packet encoding and exact-length deframing.
//!
//! A packet is a 4-byte big-endian length followed by exactly that many payload bytes.
//! The deframer never hands out a short payload: end-of-stream in the middle of a
//! packet is reported the same way as a clean close.

use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::TransportError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Upper bound on the up-front allocation for one payload; larger frames grow as
/// bytes actually arrive so a bogus length cannot reserve gigabytes.
const MAX_PREALLOC: usize = 1024 * 1024;

/// Build a packet for `payload` into `buf`, replacing its contents.
///
/// The buffer is reused across frames by the sender.
pub fn encode_packet_into(payload: &[u8], buf: &mut Vec<u8>) -> Result<(), TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::PayloadTooLarge(payload.len()))?;
    buf.clear();
    buf.reserve(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Build a packet for `payload` in a fresh buffer.
pub fn encode_packet(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    encode_packet_into(payload, &mut buf)?;
    Ok(buf)
}

/// Read one packet from a blocking reader.
///
/// Returns `Ok(None)` when the stream ends, whether at a packet boundary or inside one.
pub fn read_packet<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut payload = Vec::with_capacity(len.min(MAX_PREALLOC));
    reader.take(len as u64).read_to_end(&mut payload)?;
    if payload.len() < len {
        debug!(declared = len, received = payload.len(), "stream ended inside a frame packet");
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Read one packet from an async reader.
///
/// `max_len` bounds the declared length; a larger declaration is reported as
/// `InvalidData` so the caller can drop the connection. `Ok(None)` means closed.
pub async fn read_packet_async<R>(reader: &mut R, max_len: Option<u32>) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let declared = u32::from_be_bytes(len_buf);
    if let Some(max) = max_len {
        if declared > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {declared} bytes exceeds limit of {max}"),
            ));
        }
    }
    let len = declared as usize;

    let mut payload = Vec::with_capacity(len.min(MAX_PREALLOC));
    (&mut *reader).take(len as u64).read_to_end(&mut payload).await?;
    if payload.len() < len {
        debug!(declared = len, received = payload.len(), "stream ended inside a frame packet");
        return Ok(None);
    }
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_header_is_big_endian() {
        let packet = encode_packet(&[0xAA; 258]).unwrap();
        assert_eq!(&packet[..4], &[0x00, 0x00, 0x01, 0x02]);
        assert_eq!(packet.len(), 4 + 258);
    }

    #[test]
    fn test_empty_payload() {
        let packet = encode_packet(&[]).unwrap();
        assert_eq!(packet, vec![0, 0, 0, 0]);
        let mut cursor = Cursor::new(packet);
        assert_eq!(read_packet(&mut cursor).unwrap(), Some(Vec::new()));
        assert_eq!(read_packet(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_truncated_payload_is_closed_not_padded() {
        let mut packet = encode_packet(&[7u8; 100]).unwrap();
        packet.truncate(4 + 60);
        let mut cursor = Cursor::new(packet);
        assert_eq!(read_packet(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_truncated_header_is_closed() {
        let mut cursor = Cursor::new(vec![0u8, 0, 1]);
        assert_eq!(read_packet(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_buffer_is_reused() {
        let mut buf = Vec::new();
        encode_packet_into(&[1, 2, 3], &mut buf).unwrap();
        encode_packet_into(&[9], &mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 1, 9]);
    }

    #[tokio::test]
    async fn test_async_limit_rejects_oversized_declaration() {
        let mut reader: &[u8] = &[0x00, 0x10, 0x00, 0x00, 1, 2, 3];
        let err = read_packet_async(&mut reader, Some(1024)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_async_truncated_is_closed() {
        let mut packet = encode_packet(&[3u8; 500]).unwrap();
        packet.truncate(300);
        let mut reader: &[u8] = &packet;
        assert_eq!(read_packet_async(&mut reader, None).await.unwrap(), None);
    }

    proptest! {
        #[test]
        fn prop_round_trip(frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..4096), 1..8)) {
            let mut stream = Vec::new();
            for frame in &frames {
                stream.extend(encode_packet(frame).unwrap());
            }
            let mut cursor = Cursor::new(stream);
            for frame in &frames {
                let got = read_packet(&mut cursor).unwrap().expect("frame present");
                prop_assert_eq!(got.len(), frame.len());
                prop_assert_eq!(&got, frame);
            }
            prop_assert_eq!(read_packet(&mut cursor).unwrap(), None);
        }

        #[test]
        fn prop_never_short(payload in proptest::collection::vec(any::<u8>(), 1..2048), cut in 0usize..2048) {
            let packet = encode_packet(&payload).unwrap();
            let cut = cut % packet.len();
            let mut cursor = Cursor::new(packet[..cut].to_vec());
            prop_assert_eq!(read_packet(&mut cursor).unwrap(), None);
        }
    }
}
