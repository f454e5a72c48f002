//! Contracts between the tracker and its collaborators.
//!
//! The persistence layer provides [`Build`] records and the [`BuildSource`] query,
//! the execution engine turns a build into a [`Runnable`].
use std::sync::Arc;

use async_trait::async_trait;
use keel_model::{BuildId, BuildStatus, ResourceId, TrackingKey};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

/// Shared handle to a build record.
pub type BuildRef = Arc<dyn Build>;

/// The subset of a build record the tracker relies on.
#[async_trait]
pub trait Build: Send + Sync + 'static {
    /// Persisted identifier, or `0` for in-memory checks.
    fn id(&self) -> BuildId;

    /// Resource the build checks. Only meaningful for in-memory checks.
    fn resource_id(&self) -> ResourceId;

    /// Record the terminal status of the build.
    async fn finish(&self, status: BuildStatus) -> Result<(), CoreError>;

    /// Key used to deduplicate concurrent executions of this build.
    fn tracking_key(&self) -> TrackingKey {
        TrackingKey::from_ids(self.id(), self.resource_id())
    }
}

/// Supplier of persisted builds that should currently be running.
#[async_trait]
pub trait BuildSource: Send + Sync + 'static {
    /// All builds whose persisted status is `started`.
    async fn started_builds(&self) -> Result<Vec<BuildRef>, CoreError>;
}

/// Execution engine producing one runnable per build.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    fn new_build(&self, build: BuildRef) -> Box<dyn Runnable>;

    /// Ask every in-flight build to stop taking on new work.
    async fn drain(&self, ctx: CancellationToken);
}

/// One build's execution.
///
/// Completion and failure are reported through the build record itself
/// (see [`Build::finish`]), so `run` returns nothing.
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn run(&self, ctx: CancellationToken);
}
