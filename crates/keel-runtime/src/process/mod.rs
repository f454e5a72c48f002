use std::{fmt, sync::Arc};

use keel_model::{Signal, TtySpec};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::{
    client::{ExitStatus, RuntimeProcess},
    error::{ContainerError, ContainerResult},
    io::IoManager,
};

enum ExitState {
    Waiting(oneshot::Receiver<ExitStatus>),
    Reaped(i32),
    Failed(String),
}

/// IO binding released once the process has exited.
struct IoRelease {
    io: Arc<dyn IoManager>,
    container: String,
}

/// Handle to a process started by `Container::run` or found by `Container::attach`.
pub struct Process {
    inner: Arc<dyn RuntimeProcess>,
    exit: Mutex<ExitState>,
    release: Option<IoRelease>,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("id", &self.id()).finish()
    }
}

impl Process {
    /// `exited` must have been obtained before the process was started.
    pub fn new(inner: Arc<dyn RuntimeProcess>, exited: oneshot::Receiver<ExitStatus>) -> Self {
        Self {
            inner,
            exit: Mutex::new(ExitState::Waiting(exited)),
            release: None,
        }
    }

    /// Drop the process' binding in `io` once `wait` settles.
    pub(crate) fn releasing_io(mut self, io: Arc<dyn IoManager>, container: &str) -> Self {
        self.release = Some(IoRelease {
            io,
            container: container.to_string(),
        });
        self
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Block until the process exits and return its exit code.
    ///
    /// The first call releases the process in the runtime and its IO binding;
    /// later calls return the same outcome.
    pub async fn wait(&self) -> ContainerResult<i32> {
        let mut state = self.exit.lock().await;
        let exited = match &mut *state {
            ExitState::Reaped(code) => return Ok(*code),
            ExitState::Failed(reason) => return Err(ContainerError::WaitFailed(reason.clone())),
            ExitState::Waiting(exited) => exited,
        };

        let status = match exited.await {
            Ok(status) => status,
            Err(_) => ExitStatus::failed("exit status channel closed"),
        };
        if let Some(reason) = status.error {
            self.release_io();
            *state = ExitState::Failed(reason.clone());
            return Err(ContainerError::WaitFailed(reason));
        }

        if let Err(e) = self.inner.delete().await {
            // The exit code is known; a failed cleanup must not hide it.
            warn!(process = self.id(), error = %e, "failed to delete exited process");
        }

        self.release_io();
        debug!(process = self.id(), code = status.code, "process exited");
        *state = ExitState::Reaped(status.code);
        Ok(status.code)
    }

    fn release_io(&self) {
        if let Some(release) = &self.release {
            release.io.delete(&release.container, self.id());
        }
    }

    /// Resize the process' terminal.
    pub async fn set_tty(&self, tty: TtySpec) -> ContainerResult<()> {
        let Some(size) = tty.window_size else {
            return Ok(());
        };
        self.inner
            .resize(u32::from(size.columns), u32::from(size.rows))
            .await
            .map_err(ContainerError::runtime("resize"))
    }

    pub async fn signal(&self, signal: Signal) -> ContainerResult<()> {
        let number = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        self.inner
            .kill(number)
            .await
            .map_err(ContainerError::runtime("signal"))
    }
}
