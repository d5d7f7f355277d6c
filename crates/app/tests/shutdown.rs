mod common;

use std::{
    io::{Read, Write},
    net::TcpStream,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{CountingBackend, ScriptedDetector, config, context, wait_until};
use vision_guide::guide::{GuideConfig, server::spawn_server};

#[test]
fn stop_does_not_wait_on_open_websockets() {
    let ctx = context(
        GuideConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..config()
        },
        Arc::new(CountingBackend::default()),
        ScriptedDetector::default(),
        "",
    );
    let server = spawn_server(ctx.clone()).expect("server starts");

    let mut stream = TcpStream::connect(server.local_addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    write!(
        stream,
        "GET /ws HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
    .expect("handshake");
    let mut head = [0u8; 12];
    stream.read_exact(&mut head).expect("handshake response");
    assert_eq!(&head, b"HTTP/1.1 101");
    assert!(wait_until(|| ctx.state.clients() == 1));

    let started = Instant::now();
    server.stop();
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "stop took {:?}",
        started.elapsed()
    );

    drop(stream);
    ctx.capture.shutdown();
}
