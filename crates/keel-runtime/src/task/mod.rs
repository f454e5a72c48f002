use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    client::{InitIo, RuntimeContainer, RuntimeTask},
    error::{ContainerError, ContainerResult},
};

/// Whether the runtime currently holds a task for a container.
///
/// A task goes `Missing` when the runtime daemon restarts: the container
/// metadata survives, the in-memory task does not.
pub enum TaskState {
    Missing,
    Running(Arc<dyn RuntimeTask>),
}

impl TaskState {
    pub fn is_missing(&self) -> bool {
        matches!(self, TaskState::Missing)
    }
}

/// Moves a container's task from `Missing` to `Running`.
///
/// Recreation is serialised through a lock shared by every lifecycle of the
/// same container, so concurrent callers never create two tasks.
#[derive(Clone)]
pub struct TaskLifecycle {
    container: Arc<dyn RuntimeContainer>,
    recreate: Arc<Mutex<()>>,
}

impl TaskLifecycle {
    pub fn new(container: Arc<dyn RuntimeContainer>, recreate: Arc<Mutex<()>>) -> Self {
        Self {
            container,
            recreate,
        }
    }

    /// Look the task up without changing anything.
    pub async fn probe(&self) -> ContainerResult<TaskState> {
        match self.container.task(InitIo::Detached).await {
            Ok(task) => Ok(TaskState::Running(task)),
            Err(e) if e.is_not_found() => Ok(TaskState::Missing),
            Err(e) => Err(ContainerError::runtime("task retrieval")(e)),
        }
    }

    /// The running task, recreating and starting it with discarded IO when missing.
    pub async fn materialize(&self) -> ContainerResult<Arc<dyn RuntimeTask>> {
        if let TaskState::Running(task) = self.probe().await? {
            return Ok(task);
        }

        let _guard = self.recreate.lock().await;
        match self.probe().await? {
            TaskState::Running(task) => {
                debug!(
                    target: "keel.runtime.task",
                    container = self.container.id(),
                    "task recreated concurrently"
                );
                Ok(task)
            }
            TaskState::Missing => {
                info!(
                    target: "keel.runtime.task",
                    container = self.container.id(),
                    "task missing; recreating"
                );
                let task = self
                    .container
                    .new_task()
                    .await
                    .map_err(ContainerError::runtime("recreating init task"))?;
                task.start()
                    .await
                    .map_err(ContainerError::runtime("restarting init task"))?;
                Ok(task)
            }
        }
    }
}
