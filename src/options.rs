//! Caller-facing session configuration.

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for a new pseudoterminal session.
///
/// The fluent setters make the common case short:
///
/// ```
/// use ptybridge::PtyOptions;
///
/// let options = PtyOptions::new().cols(120).rows(40).cwd("/home/user");
/// ```
#[derive(Debug, Clone)]
pub struct PtyOptions {
    /// Terminal columns.
    pub cols: u16,
    /// Terminal rows.
    pub rows: u16,
    /// Directory where the terminal starts, in host path syntax.
    pub cwd: Option<String>,
    /// Startup shell. Falls back to the SHELL variable in the backend.
    pub shell: Option<String>,
    /// Environment for the backend process.
    pub env: HashMap<String, String>,
    /// Explicit path to the backend executable. Resolved from PATH when
    /// unset.
    pub backend: Option<PathBuf>,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 30,
            cwd: None,
            shell: None,
            env: std::env::vars().collect(),
            backend: None,
        }
    }
}

impl PtyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cols(mut self, cols: u16) -> Self {
        self.cols = cols;
        self
    }

    pub fn rows(mut self, rows: u16) -> Self {
        self.rows = rows;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Replace the backend environment entirely.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Add or override a single environment variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn backend(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = Some(path.into());
        self
    }
}
