//! Event-driven client for a pseudoterminal hosted in a separate execution
//! environment.
//!
//! The terminal process runs inside a backend environment (WSL in the stock
//! deployment) that is reachable only through a loopback TCP stream carrying
//! a length-prefixed frame protocol. [`spawn`] binds an ephemeral listener,
//! launches the backend pointed at it, and returns a [`Pty`] handle
//! immediately; writes issued before the backend dials back are queued, and
//! connection failures surface through the event stream rather than by
//! blocking the caller.
//!
//! ```no_run
//! use ptybridge::{spawn, PtyEvent, PtyOptions};
//!
//! # async fn demo() {
//! let mut pty = spawn(PtyOptions::new().cols(120).rows(40));
//! let mut events = pty.take_events().unwrap();
//! pty.write("ls -a\r");
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PtyEvent::Data(chunk) => print!("{chunk}"),
//!         PtyEvent::Exit => break,
//!         PtyEvent::Error(err) => {
//!             eprintln!("session failed: {err}");
//!             break;
//!         }
//!     }
//! }
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod launch;
pub mod options;
pub mod reassembly;
pub mod session;

pub use error::{LaunchError, ProtocolError, PtyError};
pub use frame::Frame;
pub use launch::{BackendProcess, Launcher, WslLauncher};
pub use options::PtyOptions;
pub use reassembly::FrameReassembler;
pub use session::{Pty, PtyEvent};

use std::sync::Arc;

/// Spawn a new pseudoterminal session with the stock [`WslLauncher`].
///
/// Returns immediately with a handle whose connection is not yet
/// established. Must be called from within a tokio runtime.
pub fn spawn(options: PtyOptions) -> Pty {
    spawn_with_launcher(options, Arc::new(WslLauncher))
}

/// Spawn a session with a caller-supplied [`Launcher`].
pub fn spawn_with_launcher(options: PtyOptions, launcher: Arc<dyn Launcher>) -> Pty {
    Pty::spawn(options, launcher)
}
