//! Contract of the low-level, task-oriented container runtime client.
//!
//! A container owns at most one *task* (its init process group); additional
//! *processes* are exec'd inside that task. The adapter in [`crate::container`]
//! only talks to the runtime through these traits.
use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{error::RuntimeError, io::IoBinding};

mod spec;
pub use spec::{
    ConsoleSize, ContainerSpec, CpuResources, MemoryResources, ProcessConfig, Resources, User,
};

/// How the init task's own IO is handled when the task is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitIo {
    /// Do not attach to the init process IO.
    Detached,
    /// Re-open the init process IO left behind by the task's creator.
    Load,
}

/// Runtime-side state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Created,
    Running,
    Stopped,
    Paused,
    Pausing,
    Unknown,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessStatus::Created => "created",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Paused => "paused",
            ProcessStatus::Pausing => "pausing",
            ProcessStatus::Unknown => "unknown",
        })
    }
}

/// Exit status delivered once a process terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    /// Set when the runtime could not determine the exit code.
    pub error: Option<String>,
}

impl ExitStatus {
    pub fn exited(code: i32) -> Self {
        Self { code, error: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            code: -1,
            error: Some(reason.into()),
        }
    }
}

/// A process visible inside a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Exec identifier; `None` for the task's init process.
    pub exec_id: Option<String>,
}

/// Container metadata held by the runtime. Survives daemon restarts.
#[async_trait]
pub trait RuntimeContainer: Send + Sync {
    fn id(&self) -> &str;

    async fn spec(&self) -> Result<ContainerSpec, RuntimeError>;

    /// Load the container's task. Fails with [`RuntimeError::NotFound`] when the
    /// daemon lost it (e.g. after a restart).
    async fn task(&self, io: InitIo) -> Result<Arc<dyn RuntimeTask>, RuntimeError>;

    /// Create a fresh init task whose IO is discarded.
    async fn new_task(&self) -> Result<Arc<dyn RuntimeTask>, RuntimeError>;

    async fn labels(&self) -> Result<HashMap<String, String>, RuntimeError>;

    /// Upsert `labels`, returning the resulting full label set.
    async fn set_labels(
        &self,
        labels: HashMap<String, String>,
    ) -> Result<HashMap<String, String>, RuntimeError>;
}

/// A container's running init process group.
#[async_trait]
pub trait RuntimeTask: Send + Sync {
    fn id(&self) -> &str;

    async fn start(&self) -> Result<(), RuntimeError>;

    /// Register a new process. It does not run until [`RuntimeProcess::start`].
    async fn exec(
        &self,
        id: &str,
        config: &ProcessConfig,
        io: IoBinding,
    ) -> Result<Arc<dyn RuntimeProcess>, RuntimeError>;

    /// Load an existing process, optionally re-binding its IO.
    async fn load_process(
        &self,
        id: &str,
        io: Option<IoBinding>,
    ) -> Result<Arc<dyn RuntimeProcess>, RuntimeError>;

    async fn pids(&self) -> Result<Vec<ProcessInfo>, RuntimeError>;
}

/// One exec'd process.
#[async_trait]
pub trait RuntimeProcess: Send + Sync {
    fn id(&self) -> &str;

    async fn start(&self) -> Result<(), RuntimeError>;

    /// Subscribe to the exit status. Must be called before `start` to not miss a fast exit.
    async fn wait(&self) -> Result<oneshot::Receiver<ExitStatus>, RuntimeError>;

    async fn status(&self) -> Result<ProcessStatus, RuntimeError>;

    /// Mark stdin as closable once the caller's stream is exhausted.
    async fn close_stdin(&self) -> Result<(), RuntimeError>;

    async fn kill(&self, signal: i32) -> Result<(), RuntimeError>;

    async fn resize(&self, width: u32, height: u32) -> Result<(), RuntimeError>;

    /// Release the runtime's resources for an exited process.
    async fn delete(&self) -> Result<(), RuntimeError>;
}
