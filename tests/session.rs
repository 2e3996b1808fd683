//! End-to-end session tests.
//!
//! A test launcher reports the negotiated port instead of starting WSL; the
//! tests then dial the listener themselves and play the backend's side of
//! the frame protocol over a real loopback socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

use ptybridge::{
    frame, spawn_with_launcher, BackendProcess, Frame, FrameReassembler, LaunchError, Launcher,
    ProtocolError, PtyError, PtyEvent, PtyOptions,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Launcher that hands the negotiated port to the test instead of spawning
/// a process.
struct PortReporter {
    tx: Mutex<Option<oneshot::Sender<u16>>>,
}

#[async_trait]
impl Launcher for PortReporter {
    async fn launch(
        &self,
        port: u16,
        _options: &PtyOptions,
    ) -> Result<BackendProcess, LaunchError> {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(port);
        }
        Ok(BackendProcess::detached())
    }
}

fn port_reporter() -> (Arc<PortReporter>, oneshot::Receiver<u16>) {
    let (tx, rx) = oneshot::channel();
    let launcher = Arc::new(PortReporter {
        tx: Mutex::new(Some(tx)),
    });
    (launcher, rx)
}

struct FailingLauncher;

#[async_trait]
impl Launcher for FailingLauncher {
    async fn launch(
        &self,
        _port: u16,
        _options: &PtyOptions,
    ) -> Result<BackendProcess, LaunchError> {
        Err(LaunchError::BackendNotFound("missing-backend".to_string()))
    }
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("failed to connect to session listener")
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<PtyEvent>) -> PtyEvent {
    timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed unexpectedly")
}

/// Read from the socket until `count` frames have been reassembled.
async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<Frame> {
    let mut reassembler = FrameReassembler::new();
    let mut frames = Vec::new();
    let mut buf = [0u8; 1024];
    while frames.len() < count {
        let n = timeout(TIMEOUT, stream.read(&mut buf))
            .await
            .expect("timed out reading from session")
            .expect("read failed");
        assert!(n > 0, "session closed the connection early");
        reassembler
            .push(&buf[..n], |f| frames.push(f))
            .expect("session sent an invalid frame");
    }
    frames
}

#[tokio::test]
async fn writes_before_connection_are_flushed_in_order() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let pty = spawn_with_launcher(PtyOptions::new(), launcher);

    pty.write("first");
    pty.write("second");
    pty.resize(100, 50);

    let port = port_rx.await.unwrap();
    let mut stream = connect(port).await;
    let frames = read_frames(&mut stream, 3).await;

    assert_eq!(frames[0], Frame::Data(Bytes::from_static(b"first")));
    assert_eq!(frames[1], Frame::Data(Bytes::from_static(b"second")));
    assert_eq!(frames[2], Frame::Resize { cols: 100, rows: 50 });
}

#[tokio::test]
async fn backend_output_is_emitted_as_data_events() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();

    let mut stream = connect(port_rx.await.unwrap()).await;
    stream
        .write_all(&frame::encode(&Frame::Data(Bytes::from_static(b"hello"))))
        .await
        .unwrap();

    match next_event(&mut events).await {
        PtyEvent::Data(data) => assert_eq!(data, "hello"),
        other => panic!("expected Data event, got {other:?}"),
    }
}

#[tokio::test]
async fn fragmented_frames_survive_the_socket() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();

    let mut stream = connect(port_rx.await.unwrap()).await;
    let encoded = frame::encode(&Frame::Data(Bytes::from_static(b"split across writes")));
    let (head, tail) = encoded.split_at(3);

    stream.write_all(head).await.unwrap();
    stream.flush().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(tail).await.unwrap();

    match next_event(&mut events).await {
        PtyEvent::Data(data) => assert_eq!(data, "split across writes"),
        other => panic!("expected Data event, got {other:?}"),
    }
}

#[tokio::test]
async fn name_and_cwd_frames_update_session_metadata() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let pty = spawn_with_launcher(PtyOptions::new().cwd("/start"), launcher);
    assert_eq!(pty.cwd(), "/start");
    assert_eq!(pty.process(), "");

    let mut stream = connect(port_rx.await.unwrap()).await;
    stream
        .write_all(&frame::encode(&Frame::Name("vim".to_string())))
        .await
        .unwrap();
    stream
        .write_all(&frame::encode(&Frame::Cwd("/srv/www".to_string())))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while pty.process() != "vim" || pty.cwd() != "/srv/www" {
        assert!(
            tokio::time::Instant::now() < deadline,
            "metadata never updated: process={:?} cwd={:?}",
            pty.process(),
            pty.cwd()
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn backend_resize_frames_are_ignored() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();

    let mut stream = connect(port_rx.await.unwrap()).await;
    stream
        .write_all(&frame::encode(&Frame::Resize { cols: 10, rows: 10 }))
        .await
        .unwrap();
    stream
        .write_all(&frame::encode(&Frame::Data(Bytes::from_static(b"after"))))
        .await
        .unwrap();

    // The resize produced no event; the next thing observed is the data.
    match next_event(&mut events).await {
        PtyEvent::Data(data) => assert_eq!(data, "after"),
        other => panic!("expected Data event, got {other:?}"),
    }
    assert_eq!(pty.cols(), 80);
    assert_eq!(pty.rows(), 30);
}

#[tokio::test]
async fn peer_disconnect_emits_exit_then_closes_the_stream() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();

    let stream = connect(port_rx.await.unwrap()).await;
    drop(stream);

    assert!(matches!(next_event(&mut events).await, PtyEvent::Exit));
    let end = timeout(TIMEOUT, events.recv()).await.unwrap();
    assert!(end.is_none(), "expected channel close after Exit, got {end:?}");
}

#[tokio::test]
async fn kill_suppresses_exit_and_error() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();

    let mut stream = connect(port_rx.await.unwrap()).await;

    // Confirm the session is streaming before killing it.
    stream
        .write_all(&frame::encode(&Frame::Data(Bytes::from_static(b"ready"))))
        .await
        .unwrap();
    assert!(matches!(next_event(&mut events).await, PtyEvent::Data(_)));

    pty.kill();
    drop(stream);

    // No Exit, no Error: the channel just closes.
    let end = timeout(TIMEOUT, events.recv()).await.unwrap();
    assert!(end.is_none(), "kill must suppress further events, got {end:?}");
}

#[tokio::test]
async fn operations_after_kill_are_no_ops() {
    init_tracing();
    let (launcher, _port_rx) = port_reporter();
    let pty = spawn_with_launcher(PtyOptions::new(), launcher);

    pty.kill();
    pty.kill();
    pty.write("ignored");
    pty.resize(1, 1);
}

#[tokio::test]
async fn second_connection_is_refused_without_disturbing_the_first() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();
    let port = port_rx.await.unwrap();

    let mut first = connect(port).await;
    pty.write("probe");
    let frames = read_frames(&mut first, 1).await;
    assert_eq!(frames[0], Frame::Data(Bytes::from_static(b"probe")));

    let mut second = connect(port).await;
    let mut buf = [0u8; 16];
    let n = timeout(TIMEOUT, second.read(&mut buf))
        .await
        .expect("timed out waiting for the second connection to be dropped")
        .expect("read on second connection failed");
    assert_eq!(n, 0, "second connection should be closed immediately");

    // The original session still streams.
    first
        .write_all(&frame::encode(&Frame::Data(Bytes::from_static(b"still here"))))
        .await
        .unwrap();
    match next_event(&mut events).await {
        PtyEvent::Data(data) => assert_eq!(data, "still here"),
        other => panic!("expected Data event, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_frame_type_is_a_fatal_protocol_error() {
    init_tracing();
    let (launcher, port_rx) = port_reporter();
    let mut pty = spawn_with_launcher(PtyOptions::new(), launcher);
    let mut events = pty.take_events().unwrap();

    let mut stream = connect(port_rx.await.unwrap()).await;
    stream.write_all(&[0x00, 0x00, 0x00, 0x02, 0x09, 0x01]).await.unwrap();

    match next_event(&mut events).await {
        PtyEvent::Error(PtyError::Protocol(ProtocolError::UnknownFrameType(tag))) => {
            assert_eq!(tag, 9);
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn launch_failure_surfaces_as_an_error_event() {
    init_tracing();
    let mut pty = spawn_with_launcher(PtyOptions::new(), Arc::new(FailingLauncher));
    let mut events = pty.take_events().unwrap();

    match next_event(&mut events).await {
        PtyEvent::Error(PtyError::Launch(LaunchError::BackendNotFound(name))) => {
            assert_eq!(name, "missing-backend");
        }
        other => panic!("expected launch error, got {other:?}"),
    }
}

#[tokio::test]
async fn launcher_receives_requested_geometry() {
    init_tracing();

    struct GeometryCheck {
        seen: Mutex<Option<oneshot::Sender<(u16, u16, Option<String>)>>>,
    }

    #[async_trait]
    impl Launcher for GeometryCheck {
        async fn launch(
            &self,
            _port: u16,
            options: &PtyOptions,
        ) -> Result<BackendProcess, LaunchError> {
            if let Some(tx) = self.seen.lock().unwrap().take() {
                let _ = tx.send((options.cols, options.rows, options.shell.clone()));
            }
            Ok(BackendProcess::detached())
        }
    }

    let (tx, rx) = oneshot::channel();
    let launcher = Arc::new(GeometryCheck {
        seen: Mutex::new(Some(tx)),
    });
    let _pty = spawn_with_launcher(
        PtyOptions::new().cols(132).rows(43).shell("/bin/fish"),
        launcher,
    );

    let (cols, rows, shell) = timeout(TIMEOUT, rx).await.unwrap().unwrap();
    assert_eq!(cols, 132);
    assert_eq!(rows, 43);
    assert_eq!(shell.as_deref(), Some("/bin/fish"));
}
