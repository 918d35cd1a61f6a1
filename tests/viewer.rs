mod common;

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use camlink::encode::{FrameEncoder, OutputTransform};
use camlink::protocol::{encode_packet, read_packet_async, Command};
use camlink::viewer::{PresentSink, Receiver, ReceiverConfig, Screen};
use common::gray_frame;

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    FrameEncoder::new(OutputTransform::default())
        .encode(&gray_frame(width, height, 7))
        .unwrap()
}

async fn wait_for(screen: &mut watch::Receiver<Screen>, pred: impl FnMut(&Screen) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), screen.wait_for(pred))
        .await
        .expect("screen never reached the expected state")
        .expect("sink dropped");
}

#[tokio::test]
async fn test_deframes_mixed_sizes_in_order() {
    let (mut producer, mut viewer) = tokio::io::duplex(4096);
    let sizes = [1200usize, 0, 34000];
    let writer = tokio::spawn(async move {
        for len in sizes {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            producer.write_all(&encode_packet(&payload).unwrap()).await.unwrap();
        }
        // Truncated fourth packet, then close.
        producer.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
    });

    for len in sizes {
        let payload = read_packet_async(&mut viewer, None).await.unwrap().unwrap();
        assert_eq!(payload.len(), len);
        assert!(payload.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
    }
    writer.await.unwrap();
    assert!(read_packet_async(&mut viewer, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_receiver_session_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let (sink, mut screen) = PresentSink::new();
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let config = ReceiverConfig {
        max_frame_len: Some(1024 * 1024),
        ..ReceiverConfig::default()
    };
    let server = tokio::spawn(Receiver::new(config, sink, commands_rx, cancel.clone()).serve(listener));

    let mut producer = TcpStream::connect(addr).await.unwrap();
    for payload in [jpeg(40, 30), Vec::new(), b"not a jpeg".to_vec(), jpeg(64, 48)] {
        producer.write_all(&encode_packet(&payload).unwrap()).await.unwrap();
    }
    wait_for(&mut screen, |s| s.frames == 2 && s.skipped == 2).await;
    assert_eq!(screen.borrow().resolution(), Some((64, 48)));

    // Commands travel back on the same connection.
    commands.send(Command::Rotate).unwrap();
    commands.send(Command::SelectUltraWide).unwrap();
    let mut bytes = [0u8; 2];
    tokio::time::timeout(Duration::from_secs(5), producer.read_exact(&mut bytes))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&bytes, b"RU");

    // Half a packet, then gone: no frame, no signal.
    producer.write_all(&[0, 0, 0, 100, 1, 2, 3]).await.unwrap();
    drop(producer);
    wait_for(&mut screen, |s| !s.has_signal()).await;
    assert!(screen.borrow().frame.is_none());

    // Ready for the next producer; an oversized declaration drops it.
    let mut second = TcpStream::connect(addr).await.unwrap();
    wait_for(&mut screen, |s| s.has_signal()).await;
    second.write_all(&(8u32 * 1024 * 1024).to_be_bytes()).await.unwrap();
    wait_for(&mut screen, |s| !s.has_signal()).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_cancel_while_connected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let (sink, mut screen) = PresentSink::new();
    let (_commands, commands_rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(
        Receiver::new(ReceiverConfig::default(), sink, commands_rx, cancel.clone()).serve(listener),
    );

    let mut producer = TcpStream::connect(addr).await.unwrap();
    wait_for(&mut screen, |s| s.has_signal()).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!screen.borrow().has_signal());

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), producer.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}
