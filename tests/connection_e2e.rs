//! End-to-end tests: `connect` against `serve` over real sockets, plus
//! raw-byte clients exercising the exact wire sequences of RFC 6455 §5.7.

mod common;

use common::init_test_logging;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use websock::{
    connect, connect_with_config, serve, serve_with, Message, ServerHandle, WebSocketAcceptor,
    WebSocketConfig,
};

/// Echo server: every received message is sent back verbatim.
async fn start_echo_server() -> ServerHandle {
    serve(
        |mut ws| async move {
            while let Some(msg) = ws.recv().await {
                if ws.send(msg).await.is_err() {
                    break;
                }
            }
        },
        "127.0.0.1",
        0,
    )
    .await
    .expect("bind echo server")
}

#[tokio::test]
async fn tcp_echo_roundtrip() {
    init_test_logging();
    let handle = start_echo_server().await;
    let url = format!("ws://{}/", handle.local_addr());

    let mut ws = connect(&url).await.unwrap();
    assert!(ws.remote_address().is_some());

    ws.send(Message::text("hello over tcp")).await.unwrap();
    assert_eq!(ws.recv().await, Some(Message::text("hello over tcp")));

    let blob: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    ws.send(Message::binary(blob.clone())).await.unwrap();
    assert_eq!(ws.recv().await, Some(Message::binary(blob)));

    ws.close(1000, "done").await.unwrap();
    assert!(ws.is_closed());
    assert_eq!(ws.close_code(), Some(1000));

    handle.shutdown();
    handle.closed().await;
}

#[tokio::test]
async fn fragmented_message_roundtrip() {
    init_test_logging();
    let handle = start_echo_server().await;
    let url = format!("ws://{}/", handle.local_addr());

    let mut ws = connect(&url).await.unwrap();

    let big: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    ws.send_fragmented(Message::binary(big.clone()), 4096)
        .await
        .unwrap();
    assert_eq!(ws.recv().await, Some(Message::binary(big)));

    ws.close(1000, "").await.unwrap();
    handle.shutdown();
}

#[tokio::test]
async fn subprotocol_negotiation() {
    init_test_logging();
    let acceptor = WebSocketAcceptor::new().protocol("superchat").protocol("chat");
    let handle = serve_with(
        acceptor,
        |mut ws| async move {
            assert_eq!(ws.subprotocol(), Some("chat"));
            let _ = ws.recv().await;
        },
        ("127.0.0.1", 0),
    )
    .await
    .unwrap();

    let config = WebSocketConfig::new().protocol("chat").protocol("superchat");
    let url = format!("ws://{}/", handle.local_addr());
    let mut ws = connect_with_config(&url, config).await.unwrap();

    // First match in the client's preference order.
    assert_eq!(ws.subprotocol(), Some("chat"));

    ws.close(1000, "").await.unwrap();
    handle.shutdown();
}

#[tokio::test]
async fn ping_resolves_against_live_server() {
    init_test_logging();
    let handle = start_echo_server().await;
    let url = format!("ws://{}/", handle.local_addr());

    let mut ws = connect(&url).await.unwrap();

    // The echo handler's recv loop answers the ping transparently.
    tokio::time::timeout(Duration::from_secs(5), ws.ping(&b"heartbeat"[..]))
        .await
        .expect("ping must resolve")
        .unwrap();

    ws.close(1000, "").await.unwrap();
    handle.shutdown();
}

#[tokio::test]
async fn server_initiated_close_resolves_wait_closed() {
    init_test_logging();
    let handle = serve(
        |mut ws| async move {
            let _ = ws.close(1001, "server going away").await;
        },
        "127.0.0.1",
        0,
    )
    .await
    .unwrap();

    let url = format!("ws://{}/", handle.local_addr());
    let mut ws = connect(&url).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), ws.wait_closed())
        .await
        .expect("wait_closed must resolve");
    assert!(ws.is_closed());
    assert_eq!(ws.close_code(), Some(1001));
    assert_eq!(ws.close_reason(), Some("server going away"));

    handle.shutdown();
}

// ============================================================================
// Raw-byte clients
// ============================================================================

const RAW_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Open a TCP connection, perform the upgrade by hand, and return the
/// stream plus any bytes that followed the 101 response.
async fn raw_upgrade(handle: &ServerHandle) -> (TcpStream, Vec<u8>) {
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {RAW_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        handle.local_addr()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let leftover = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "EOF during handshake");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break buf.split_off(pos + 4);
        }
    };

    let head = String::from_utf8_lossy(&buf);
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    (stream, leftover)
}

/// Build a masked client frame with a fixed key.
fn masked_frame(first_byte: u8, payload: &[u8]) -> Vec<u8> {
    let key = [0x37, 0xFA, 0x21, 0x3D];
    assert!(payload.len() <= 125);
    let mut out = vec![first_byte, 0x80 | payload.len() as u8];
    out.extend_from_slice(&key);
    out.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % 4]),
    );
    out
}

async fn read_exact_bytes(stream: &mut TcpStream, pending: &mut Vec<u8>, n: usize) -> Vec<u8> {
    let mut chunk = [0u8; 1024];
    while pending.len() < n {
        let got = stream.read(&mut chunk).await.unwrap();
        assert!(got > 0, "EOF while expecting {n} bytes, have {}", pending.len());
        pending.extend_from_slice(&chunk[..got]);
    }
    pending.drain(..n).collect()
}

#[tokio::test]
async fn raw_ping_is_answered_before_data() {
    init_test_logging();
    let handle = start_echo_server().await;
    let (mut stream, mut pending) = raw_upgrade(&handle).await;

    // An empty masked ping, then a masked "Hello" text frame.
    stream
        .write_all(&masked_frame(0x89, b""))
        .await
        .unwrap();
    stream
        .write_all(&masked_frame(0x81, b"Hello"))
        .await
        .unwrap();

    // The pong (8A 00) must arrive before the echoed data frame.
    let pong = read_exact_bytes(&mut stream, &mut pending, 2).await;
    assert_eq!(pong, [0x8A, 0x00]);

    let echo = read_exact_bytes(&mut stream, &mut pending, 7).await;
    assert_eq!(echo, [0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);

    handle.shutdown();
}

#[tokio::test]
async fn raw_close_handshake_is_echoed() {
    init_test_logging();
    let handle = start_echo_server().await;
    let (mut stream, mut pending) = raw_upgrade(&handle).await;

    // Masked Close with code 1000 and reason "bye".
    stream
        .write_all(&masked_frame(0x88, &[0x03, 0xE8, b'b', b'y', b'e']))
        .await
        .unwrap();

    // The server echoes the close; unmasked: 88 05 03 E8 62 79 65.
    let echo = read_exact_bytes(&mut stream, &mut pending, 7).await;
    assert_eq!(echo, [0x88, 0x05, 0x03, 0xE8, 0x62, 0x79, 0x65]);

    // Then the transport goes down.
    let mut tail = [0u8; 16];
    let n = stream.read(&mut tail).await.unwrap();
    assert_eq!(n, 0, "expected EOF after close handshake");

    handle.shutdown();
}

#[tokio::test]
async fn raw_unmasked_frame_closes_with_1002() {
    init_test_logging();
    let handle = start_echo_server().await;
    let (mut stream, mut pending) = raw_upgrade(&handle).await;

    // Unmasked text frame: a protocol violation client-to-server.
    stream
        .write_all(&[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'])
        .await
        .unwrap();

    // The server closes with 1002: 88 02 03 EA.
    let close = read_exact_bytes(&mut stream, &mut pending, 4).await;
    assert_eq!(close, [0x88, 0x02, 0x03, 0xEA]);

    handle.shutdown();
}

#[tokio::test]
async fn raw_invalid_utf8_fragment_closes_with_1007() {
    init_test_logging();
    let handle = start_echo_server().await;
    let (mut stream, mut pending) = raw_upgrade(&handle).await;

    // Text fragment C3 followed by a continuation that breaks the code
    // point: 0x28 is not a continuation byte.
    stream
        .write_all(&masked_frame(0x01, &[0xC3]))
        .await
        .unwrap();
    stream
        .write_all(&masked_frame(0x80, &[0x28]))
        .await
        .unwrap();

    // 1007: 88 02 03 EF.
    let close = read_exact_bytes(&mut stream, &mut pending, 4).await;
    assert_eq!(close, [0x88, 0x02, 0x03, 0xEF]);

    handle.shutdown();
}

#[tokio::test]
async fn raw_fragmented_utf8_reassembles() {
    init_test_logging();
    let handle = start_echo_server().await;
    let (mut stream, mut pending) = raw_upgrade(&handle).await;

    // "é" (C3 A9) split across two fragments, completed legally.
    stream
        .write_all(&masked_frame(0x01, &[0xC3]))
        .await
        .unwrap();
    stream
        .write_all(&masked_frame(0x80, &[0xA9]))
        .await
        .unwrap();

    // Echo comes back as one unmasked text frame: 81 02 C3 A9.
    let echo = read_exact_bytes(&mut stream, &mut pending, 4).await;
    assert_eq!(echo, [0x81, 0x02, 0xC3, 0xA9]);

    handle.shutdown();
}

#[tokio::test]
async fn plain_http_request_is_rejected_with_400() {
    init_test_logging();
    let handle = start_echo_server().await;

    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");

    handle.shutdown();
}
