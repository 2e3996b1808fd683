//! Session controller.
//!
//! One spawned task owns the listener, the accepted connection, the outbound
//! queue, and the reassembly buffer for a session. The caller-facing [`Pty`]
//! handle talks to it over an unbounded command channel, so no operation
//! blocks the caller. Exactly one peer connection is accepted per session;
//! later dialers are dropped without touching the live stream.
//!
//! Lifecycle: Listening -> Connected -> Streaming -> Closed, with Closed
//! reachable from every state via [`Pty::kill`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::PtyError;
use crate::frame::{self, Frame};
use crate::launch::Launcher;
use crate::options::PtyOptions;
use crate::reassembly::FrameReassembler;

const READ_BUFFER_SIZE: usize = 8192;

/// Events observable on a session.
///
/// The taxonomy is closed: there is no generic named-event bus, and nothing
/// fires after [`Pty::kill`].
#[derive(Debug)]
pub enum PtyEvent {
    /// One decoded Data frame of terminal output.
    Data(String),
    /// The peer disconnected. Fired at most once, and never as a consequence
    /// of a caller-initiated `kill()`.
    Exit,
    /// A terminal failure: launch, listen, or protocol. The session is torn
    /// down; retrying means calling [`spawn`](crate::spawn) again.
    Error(PtyError),
}

enum Command {
    Send(Frame),
    Shutdown,
}

/// Metadata the backend reports asynchronously through Name/Cwd frames.
#[derive(Default)]
struct Metadata {
    procname: RwLock<String>,
    cwd: RwLock<String>,
}

/// Handle to one remote pseudoterminal session.
///
/// Dropping the handle tears the session down the same way [`Pty::kill`]
/// does.
pub struct Pty {
    cols: u16,
    rows: u16,
    meta: Arc<Metadata>,
    closed: Arc<AtomicBool>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: Option<mpsc::UnboundedReceiver<PtyEvent>>,
}

impl Pty {
    pub(crate) fn spawn(options: PtyOptions, launcher: Arc<dyn Launcher>) -> Pty {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let meta = Arc::new(Metadata {
            procname: RwLock::new(String::new()),
            cwd: RwLock::new(options.cwd.clone().unwrap_or_default()),
        });
        let closed = Arc::new(AtomicBool::new(false));

        let task = SessionTask {
            options: options.clone(),
            launcher,
            meta: Arc::clone(&meta),
            closed: Arc::clone(&closed),
            event_tx,
        };
        tokio::spawn(task.run(cmd_rx));

        Pty {
            cols: options.cols,
            rows: options.rows,
            meta,
            closed,
            cmd_tx,
            events: Some(event_rx),
        }
    }

    /// Columns the session was requested with. The backend is the source of
    /// truth for actual geometry once connected; [`resize`](Self::resize)
    /// does not update this value.
    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Rows the session was requested with.
    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Name of the foreground process reported by the backend. Empty until
    /// the first Name frame arrives.
    pub fn process(&self) -> String {
        self.meta.procname.read().clone()
    }

    /// Working directory reported by the backend. Defaults to the requested
    /// cwd until the first Cwd frame arrives.
    pub fn cwd(&self) -> String {
        self.meta.cwd.read().clone()
    }

    /// Take the event stream. The first call returns the receiver; later
    /// calls return `None`. The channel closes once the session is torn
    /// down.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PtyEvent>> {
        self.events.take()
    }

    /// Write input to the terminal.
    ///
    /// Sent immediately when connected, queued otherwise; pre-connection
    /// writes are delivered in issue order as soon as the backend dials
    /// back. No-op after [`kill`](Self::kill).
    pub fn write(&self, data: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let payload = Bytes::copy_from_slice(data.as_bytes());
        let _ = self.cmd_tx.send(Command::Send(Frame::Data(payload)));
    }

    /// Ask the backend to resize the terminal. No-op after
    /// [`kill`](Self::kill).
    pub fn resize(&self, cols: u16, rows: u16) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.cmd_tx.send(Command::Send(Frame::Resize { cols, rows }));
    }

    /// Terminate the session: stop listening, drop the connection, kill the
    /// backend process, detach all observers. Idempotent; after this call no
    /// further events fire and every other operation is a no-op.
    pub fn kill(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        self.kill();
    }
}

struct SessionTask {
    options: PtyOptions,
    launcher: Arc<dyn Launcher>,
    meta: Arc<Metadata>,
    closed: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<PtyEvent>,
}

impl SessionTask {
    /// Closed flag is checked before every emit so a caller-initiated kill
    /// never also surfaces the teardown it caused.
    fn emit(&self, event: PtyEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.event_tx.send(event);
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Data(payload) => {
                self.emit(PtyEvent::Data(
                    String::from_utf8_lossy(&payload).into_owned(),
                ));
            }
            // The backend may not resize the caller's view.
            Frame::Resize { .. } => {}
            Frame::Name(name) => *self.meta.procname.write() = name,
            Frame::Cwd(cwd) => *self.meta.cwd.write() = cwd,
        }
    }

    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let listener = match TcpListener::bind(("127.0.0.1", 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.emit(PtyEvent::Error(PtyError::Listen(e)));
                return;
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                self.emit(PtyEvent::Error(PtyError::Listen(e)));
                return;
            }
        };
        info!("[session] listening on 127.0.0.1:{port}");

        let mut backend = match self.launcher.launch(port, &self.options).await {
            Ok(backend) => backend,
            Err(e) => {
                self.emit(PtyEvent::Error(PtyError::Launch(e)));
                return;
            }
        };

        // A kill that raced the launch wins: ignore the completed launch and
        // tear the process down.
        if self.closed.load(Ordering::SeqCst) {
            backend.terminate();
            return;
        }

        // Listening: queue outbound frames until the backend dials back.
        let mut pending: Vec<Bytes> = Vec::new();
        let stream = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("[session] backend connected from {addr}");
                        break stream;
                    }
                    Err(e) => {
                        self.emit(PtyEvent::Error(PtyError::Listen(e)));
                        backend.terminate();
                        return;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(frame)) => pending.push(frame::encode(&frame)),
                    Some(Command::Shutdown) | None => {
                        backend.terminate();
                        return;
                    }
                },
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("[session] failed to set nodelay: {e}");
        }
        let (reader, mut writer) = stream.into_split();

        // Connected: flush frames queued before the connection existed, in
        // issue order.
        for buf in pending.drain(..) {
            if let Err(e) = writer.write_all(&buf).await {
                debug!("[session] flush failed: {e}");
                self.emit(PtyEvent::Exit);
                backend.terminate();
                return;
            }
        }

        self.stream_loop(listener, reader, writer, cmd_rx).await;
        backend.terminate();
        info!("[session] closed");
    }

    async fn stream_loop(
        &self,
        listener: TcpListener,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut reassembler = FrameReassembler::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    // Exactly one peer per session: refuse any extra dialer
                    // without touching the live stream.
                    if let Ok((extra, addr)) = accepted {
                        warn!("[session] refusing second connection from {addr}");
                        drop(extra);
                    }
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = writer.write_all(&frame::encode(&frame)).await {
                            debug!("[session] write failed: {e}");
                            self.emit(PtyEvent::Exit);
                            return;
                        }
                    }
                    Some(Command::Shutdown) | None => return,
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("[session] peer disconnected");
                        self.emit(PtyEvent::Exit);
                        return;
                    }
                    Ok(n) => {
                        if let Err(e) = reassembler.push(&buf[..n], |f| self.dispatch(f)) {
                            warn!("[session] fatal stream error: {e}");
                            self.emit(PtyEvent::Error(PtyError::Protocol(e)));
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("[session] read failed: {e}");
                        self.emit(PtyEvent::Exit);
                        return;
                    }
                },
            }
        }
    }
}
