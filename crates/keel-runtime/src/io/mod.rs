//! Process IO plumbing.
//!
//! Running a new process and re-attaching to an existing one both hand the
//! runtime an [`IoBinding`]. The [`IoManager`] remembers the binding of every
//! process so that a re-attach can cut off the previous consumer of its output.
use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

type Bindings = HashMap<String, HashMap<String, CancellationToken>>;

/// Caller-side streams of a process. Absent streams are discarded.
#[derive(Default)]
pub struct ProcessIo {
    pub stdin: Option<Reader>,
    pub stdout: Option<Writer>,
    pub stderr: Option<Writer>,
}

impl ProcessIo {
    pub fn null() -> Self {
        Self::default()
    }
}

impl fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Whether a binding belongs to a new process or re-attaches to a running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Create,
    Attach,
}

/// Streams handed to the runtime for one process.
///
/// The runtime copies between its fifos and `streams` until `detached` fires.
#[derive(Debug)]
pub struct IoBinding {
    pub mode: IoMode,
    pub terminal: bool,
    pub streams: ProcessIo,
    pub detached: CancellationToken,
}

/// Creates and tracks IO bindings per `(container, process)`.
pub trait IoManager: Send + Sync {
    /// Binding for a process about to be exec'd.
    fn creator(&self, container: &str, process: &str, streams: ProcessIo, terminal: bool)
    -> IoBinding;

    /// Binding re-attaching to a running process.
    fn attach(&self, container: &str, process: &str, streams: ProcessIo) -> IoBinding;

    /// Detach and forget the binding of one process.
    fn delete(&self, container: &str, process: &str);

    /// Detach and forget every binding of `container`.
    fn remove_container(&self, container: &str);
}

/// In-memory [`IoManager`]: one detach token per process.
///
/// Registering a binding for a process that already has one detaches the old
/// binding first, so only the latest caller receives the output.
#[derive(Default)]
pub struct StreamRegistry {
    bindings: Mutex<Bindings>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes with a live binding in `container`.
    pub fn bound(&self, container: &str) -> usize {
        self.lock().get(container).map_or(0, HashMap::len)
    }

    fn register(&self, container: &str, process: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .lock()
            .entry(container.to_string())
            .or_default()
            .insert(process.to_string(), token.clone());

        if let Some(previous) = previous {
            trace!(container, process, "detaching previous io binding");
            previous.cancel();
        }
        token
    }

    fn lock(&self) -> MutexGuard<'_, Bindings> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IoManager for StreamRegistry {
    fn creator(
        &self,
        container: &str,
        process: &str,
        streams: ProcessIo,
        terminal: bool,
    ) -> IoBinding {
        IoBinding {
            mode: IoMode::Create,
            terminal,
            streams,
            detached: self.register(container, process),
        }
    }

    fn attach(&self, container: &str, process: &str, streams: ProcessIo) -> IoBinding {
        IoBinding {
            mode: IoMode::Attach,
            terminal: false,
            streams,
            detached: self.register(container, process),
        }
    }

    fn delete(&self, container: &str, process: &str) {
        let mut bindings = self.lock();
        let Some(processes) = bindings.get_mut(container) else {
            return;
        };
        if let Some(token) = processes.remove(process) {
            token.cancel();
        }
        if processes.is_empty() {
            bindings.remove(container);
        }
    }

    fn remove_container(&self, container: &str) {
        if let Some(processes) = self.lock().remove(container) {
            for token in processes.values() {
                token.cancel();
            }
        }
    }
}
