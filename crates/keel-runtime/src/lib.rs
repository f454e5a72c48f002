//! Container process lifecycle on top of a task-oriented container runtime.
pub mod client;

mod error;
pub use error::{
    ContainerError, ContainerResult, RuntimeError, classify_start_error, is_missing_executable,
};

pub mod io;
pub use io::{IoBinding, IoManager, IoMode, ProcessIo, StreamRegistry};

pub mod rootfs;
pub use rootfs::{HostRootfs, RootfsError, RootfsManager};

pub mod killer;
pub use killer::{KillBehaviour, KillError, Killer, KillerConfig, TaskKiller};

pub mod task;
pub use task::{TaskLifecycle, TaskState};

mod process;
pub use process::Process;

pub mod container;
pub use container::Container;

mod runtime;
pub use runtime::Runtime;

#[cfg(test)]
pub(crate) mod fakes;

pub mod prelude {
    pub use crate::client::{RuntimeContainer, RuntimeProcess, RuntimeTask};
    pub use crate::{Container, ContainerError, ContainerResult, Process, ProcessIo, Runtime};
}
