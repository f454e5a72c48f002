use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    client::{RuntimeProcess, RuntimeTask},
    error::RuntimeError,
};

/// How the processes of a task are terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillBehaviour {
    /// SIGTERM, escalating to SIGKILL once the grace period expires.
    ///
    /// `None` uses [`KillerConfig::grace_period`].
    Graceful { grace_period: Option<Duration> },
    /// SIGKILL right away.
    Ungraceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillerConfig {
    /// How long processes may take to exit after SIGTERM.
    pub grace_period: Duration,
    /// How long processes may take to exit after SIGKILL.
    pub kill_timeout: Duration,
}

impl Default for KillerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KillError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("process '{process}' did not exit within {after:?}")]
    Timeout { process: String, after: Duration },
}

/// Terminates the processes running inside a task.
#[async_trait]
pub trait Killer: Send + Sync {
    async fn kill(&self, task: &dyn RuntimeTask, behaviour: KillBehaviour)
    -> Result<(), KillError>;
}

/// [`Killer`] signalling every exec'd process of a task.
///
/// The task's init process is left alone: it keeps the container alive so
/// that new processes can still be exec'd after a stop.
#[derive(Debug, Clone, Default)]
pub struct TaskKiller {
    config: KillerConfig,
}

impl TaskKiller {
    pub fn new(config: KillerConfig) -> Self {
        Self { config }
    }

    async fn signal_all(
        &self,
        task: &dyn RuntimeTask,
        signal: i32,
        timeout: Duration,
    ) -> Result<(), KillError> {
        let processes = exec_processes(task).await?;
        debug!(
            target: "keel.runtime.killer",
            count = processes.len(),
            signal,
            "signalling processes"
        );

        try_join_all(
            processes
                .iter()
                .map(|process| signal_and_wait(process.as_ref(), signal, timeout)),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Killer for TaskKiller {
    #[instrument(level = "debug", skip(self, task), fields(task = task.id()))]
    async fn kill(
        &self,
        task: &dyn RuntimeTask,
        behaviour: KillBehaviour,
    ) -> Result<(), KillError> {
        match behaviour {
            KillBehaviour::Ungraceful => {
                self.signal_all(task, libc::SIGKILL, self.config.kill_timeout)
                    .await
            }
            KillBehaviour::Graceful { grace_period } => {
                let grace = grace_period.unwrap_or(self.config.grace_period);
                match self.signal_all(task, libc::SIGTERM, grace).await
                {
                    Err(KillError::Timeout { process, after }) => {
                        warn!(
                            target: "keel.runtime.killer",
                            %process,
                            ?after,
                            "grace period expired; killing"
                        );
                        self.signal_all(task, libc::SIGKILL, self.config.kill_timeout)
                            .await
                    }
                    other => other,
                }
            }
        }
    }
}

/// Every process exec'd into `task`, skipping the init process.
async fn exec_processes(
    task: &dyn RuntimeTask,
) -> Result<Vec<Arc<dyn RuntimeProcess>>, KillError> {
    let mut processes = Vec::new();
    for info in task.pids().await? {
        let Some(exec_id) = info.exec_id else {
            continue;
        };
        match task.load_process(&exec_id, None).await {
            Ok(process) => processes.push(process),
            // Exited between listing and loading.
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(processes)
}

async fn signal_and_wait(
    process: &dyn RuntimeProcess,
    signal: i32,
    timeout: Duration,
) -> Result<(), KillError> {
    let exited = process.wait().await?;

    match process.kill(signal).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    // A dropped sender means the runtime no longer tracks the process.
    tokio::time::timeout(timeout, exited)
        .await
        .map(|_| ())
        .map_err(|_| KillError::Timeout {
            process: process.id().to_string(),
            after: timeout,
        })
}
