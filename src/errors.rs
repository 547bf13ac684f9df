//! Watch-and-render engine error hierarchy.
//!
//! Errors are grouped by the layer that produces them: fetching from a
//! backend, template parsing and evaluation, rendering to disk, child
//! command execution, and configuration. Views recover what they can
//! locally; only unrecoverable or retry-exhausted conditions reach the
//! Runner.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend fetch failures (network, auth, malformed responses)
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Template parse and evaluation failures
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Destination write failures
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Child command failures
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Unrecoverable failures requiring process termination
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Errors produced by `Dependency::fetch`. The `is_transient` split
/// decides whether a View retries or terminates.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure (connect, reset, 5xx equivalent). Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid or expired token, forbidden path. Not retryable.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend answered with something the dependency cannot decode.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Vault returned a renewable lease with TTL=0. Retried on its own
    /// capped ladder, unbounded by default.
    #[error("vault returned a secret with TTL=0")]
    VaultTtlZero,

    /// The queried entity does not exist and the dependency was asked to
    /// treat absence as an error (block-on-missing semantics).
    #[error("not found: {0}")]
    NotFound(String),

    /// Local file dependency I/O failure.
    #[error("file {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The fetch was aborted by a stop signal.
    #[error("fetch canceled")]
    Canceled,
}

impl FetchError {
    /// Whether a View should keep retrying after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::File { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template parse error at {line}:{col}: {msg}")]
    Parse { line: usize, col: usize, msg: String },

    /// Strict-mode lookup failure (`error_on_missing_key`).
    #[error("map has no entry for key {key:?}")]
    MissingKey { key: String },

    /// A file helper tried to escape the configured sandbox root.
    #[error("sandbox violation: {path:?} is outside {root:?}")]
    Sandbox { path: PathBuf, root: PathBuf },

    /// Runtime evaluation failure (bad argument types, arity, division
    /// by zero, denied function, ...).
    #[error("template execution error: {0}")]
    Exec(String),

    #[error("failed to read template source {path:?}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to write {dest:?}: {source}")]
    Write {
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file mode {0:?}")]
    InvalidPerms(String),

    #[error("destination has no parent directory: {0:?}")]
    NoParent(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {command:?} exited with {code:?}")]
    NonZeroExit { command: String, code: Option<i32> },

    #[error("command {command:?} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}
