//! Backend process launching and path translation.
//!
//! The session controller never talks to the OS process layer directly: it
//! hands a port to a [`Launcher`] and gets back a [`BackendProcess`] it owns
//! for termination only. The stock [`WslLauncher`] runs the backend inside
//! WSL and translates host paths with `wslpath`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::LaunchError;
use crate::options::PtyOptions;

const WSL_EXE: &str = "wsl.exe";
const BACKEND_EXE: &str = "ptybridge-backend";

/// Handle to a launched backend process.
///
/// Owned by the session controller for termination only; the process itself
/// executes outside the session's control.
#[derive(Debug, Default)]
pub struct BackendProcess {
    child: Option<Child>,
}

impl BackendProcess {
    /// A handle with no OS process behind it, for launchers whose backend
    /// lifetime is managed elsewhere (tests, external supervisors).
    pub fn detached() -> Self {
        Self { child: None }
    }

    pub fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// Force-terminate the backend if it is still running. Idempotent.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("[launch] backend already exited with {status}");
                }
                _ => {
                    if let Err(e) = child.start_kill() {
                        warn!("[launch] failed to kill backend process: {e}");
                    }
                }
            }
        }
    }
}

/// Resolves and starts the backend that dials back into the session's
/// listener and speaks the frame protocol as its sole peer.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    async fn launch(
        &self,
        port: u16,
        options: &PtyOptions,
    ) -> Result<BackendProcess, LaunchError>;
}

/// Production launcher: runs the backend inside WSL via `wsl.exe`.
#[derive(Debug, Default)]
pub struct WslLauncher;

#[async_trait]
impl Launcher for WslLauncher {
    async fn launch(
        &self,
        port: u16,
        options: &PtyOptions,
    ) -> Result<BackendProcess, LaunchError> {
        let backend = wsl_path(&resolve_backend(options)?).await?;
        let cwd = match &options.cwd {
            Some(cwd) => Some(wsl_path(cwd).await?),
            None => None,
        };
        let args = backend_args(&backend, port, options, cwd.as_deref());

        debug!("[launch] spawning backend: {WSL_EXE} {args:?}");
        let child = Command::new(WSL_EXE)
            .args(&args)
            .env_clear()
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        Ok(BackendProcess::from_child(child))
    }
}

/// Build the backend argument list: positional port, then startup flags.
fn backend_args(backend: &str, port: u16, options: &PtyOptions, cwd: Option<&str>) -> Vec<String> {
    let mut args = vec![backend.to_string(), port.to_string()];
    args.push("--cols".to_string());
    args.push(options.cols.to_string());
    args.push("--rows".to_string());
    args.push(options.rows.to_string());
    if let Some(cwd) = cwd {
        args.push("--cwd".to_string());
        args.push(cwd.to_string());
    }
    if let Some(shell) = &options.shell {
        args.push("--shell".to_string());
        args.push(shell.clone());
    }
    args
}

fn resolve_backend(options: &PtyOptions) -> Result<String, LaunchError> {
    match &options.backend {
        Some(path) => Ok(path.to_string_lossy().into_owned()),
        None => which::which(BACKEND_EXE)
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|_| LaunchError::BackendNotFound(BACKEND_EXE.to_string())),
    }
}

/// Translate a host path into the backend environment's POSIX syntax.
///
/// Paths that already look POSIX (leading `/` or `~`) pass through
/// untouched. A failed `wslpath` run is reported as a structured error
/// rather than being left to crash the backend at startup.
async fn wsl_path(path: &str) -> Result<String, LaunchError> {
    if path.starts_with('/') || path.starts_with('~') {
        return Ok(path.to_string());
    }

    // WSL unescapes the argument once before wslpath sees it, so
    // backslashes must be doubled.
    let escaped = path.replace('\\', "\\\\");
    let output = Command::new(WSL_EXE)
        .args(["wslpath", &escaped])
        .output()
        .await
        .map_err(|e| LaunchError::PathTranslation {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LaunchError::PathTranslation {
            path: path.to_string(),
            reason: format!("wslpath exited with {}", output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
