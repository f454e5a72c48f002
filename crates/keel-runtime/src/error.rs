use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::{client::ProcessStatus, killer::KillError, rootfs::RootfsError};

/// Error reported by the container runtime client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    /// The runtime's own description of the failure.
    pub fn message(&self) -> &str {
        match self {
            RuntimeError::NotFound(m)
            | RuntimeError::AlreadyExists(m)
            | RuntimeError::Unavailable(m)
            | RuntimeError::Other(m) => m,
        }
    }
}

/// Error returned by container operations.
///
/// Callers branch on the distinguished variants to choose user-facing messages;
/// everything else is an opaque [`ContainerError::Runtime`] failure.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("user '{user}' not found: no matching entries in /etc/passwd")]
    UserNotFound { user: String },

    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("not implemented")]
    NotImplemented,

    #[error("{0}: not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("proc not running: status = {0}")]
    ProcessNotRunning(ProcessStatus),

    #[error("property '{key}' too long: key and value must not exceed {max} bytes")]
    PropertyTooLong { key: String, max: usize },

    #[error("waiting for exit status: {0}")]
    WaitFailed(String),

    #[error("kill: {0}")]
    Kill(#[source] KillError),

    #[error("{context}: {source}")]
    Rootfs {
        context: &'static str,
        #[source]
        source: RootfsError,
    },

    #[error("{context}: {source}")]
    Runtime {
        context: &'static str,
        #[source]
        source: RuntimeError,
    },
}

impl ContainerError {
    /// Build a `map_err` adapter wrapping a runtime error with `context`.
    pub(crate) fn runtime(context: &'static str) -> impl FnOnce(RuntimeError) -> ContainerError {
        move |source| ContainerError::Runtime { context, source }
    }

    pub(crate) fn rootfs(context: &'static str) -> impl FnOnce(RootfsError) -> ContainerError {
        move |source| ContainerError::Rootfs { context, source }
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;

static NO_SUCH_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"starting container process caused: exec: .*: stat .*: no such file or directory")
        .expect("static pattern")
});

static EXECUTABLE_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"starting container process caused: exec: .*: executable file not found in \$PATH",
    )
    .expect("static pattern")
});

/// Whether a process start failure means the executable is missing or not executable.
///
/// Matches the two messages the OCI runtime produces for this case:
/// - `starting container process caused: exec: <path>: stat <path>: no such file or directory`
/// - `starting container process caused: exec: <name>: executable file not found in $PATH`
pub fn is_missing_executable(message: &str) -> bool {
    NO_SUCH_FILE.is_match(message) || EXECUTABLE_NOT_FOUND.is_match(message)
}

/// Map a process start failure to [`ContainerError::ExecutableNotFound`] when it
/// matches a missing-executable pattern, otherwise to a generic runtime error.
pub fn classify_start_error(err: RuntimeError) -> ContainerError {
    if is_missing_executable(err.message()) {
        ContainerError::ExecutableNotFound(err.message().to_string())
    } else {
        ContainerError::Runtime {
            context: "proc start",
            source: err,
        }
    }
}
