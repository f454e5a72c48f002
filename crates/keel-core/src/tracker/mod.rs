use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
};

use futures::FutureExt;
use keel_model::BuildStatus;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    build::{BuildRef, BuildSource, Engine},
    config::TrackerConfig,
    error::CoreError,
    running::{Enrollment, RunningSet},
};

/// Keeps every build that should be running, running exactly once.
///
/// Each call to [`Tracker::run`] enrolls the started builds and the buffered
/// in-memory checks that are not already executing, and spawns one task per
/// newly enrolled build. The key stays enrolled until that task has exited,
/// whether the build finished, failed or panicked.
pub struct Tracker {
    source: Arc<dyn BuildSource>,
    engine: Arc<dyn Engine>,
    in_memory: Mutex<mpsc::Receiver<BuildRef>>,
    running: RunningSet,
    config: TrackerConfig,
}

impl Tracker {
    pub fn new(
        source: Arc<dyn BuildSource>,
        engine: Arc<dyn Engine>,
        in_memory: mpsc::Receiver<BuildRef>,
    ) -> Self {
        Self {
            source,
            engine,
            in_memory: Mutex::new(in_memory),
            running: RunningSet::new(),
            config: TrackerConfig::default(),
        }
    }

    #[inline]
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds currently executing.
    #[inline]
    pub fn running(&self) -> &RunningSet {
        &self.running
    }

    /// Enroll and dispatch every build that should be running.
    ///
    /// Returns without waiting for the dispatched executions. Only a failing
    /// build source query is reported; in-memory checks buffered so far are
    /// still dispatched in that case.
    #[instrument(level = "debug", skip_all)]
    pub async fn run(&self, ctx: &CancellationToken) -> Result<(), CoreError> {
        let started = self.source.started_builds().await;

        if let Ok(builds) = &started {
            trace!(count = builds.len(), "fetched started builds");
            for build in builds {
                self.track(Arc::clone(build), ctx);
            }
        }

        for build in self.drain_in_memory() {
            self.track(build, ctx);
        }

        started.map(|_| ()).inspect_err(|e| {
            warn!(error = %e, "failed to fetch started builds");
        })
    }

    /// Ask the engine to stop starting new work in every in-flight build.
    pub async fn drain(&self, ctx: &CancellationToken) {
        info!(running = self.running.len(), "draining engine");
        self.engine.drain(ctx.clone()).await;
    }

    /// Call [`Tracker::run`] on every tick of the configured interval until `ctx` is cancelled.
    pub async fn run_periodically(&self, ctx: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("tracker loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    // Errors are already logged by `run`; the next tick retries.
                    let _ = self.run(ctx).await;
                }
            }
        }
    }

    /// Take every in-memory build buffered right now without waiting for more.
    fn drain_in_memory(&self) -> Vec<BuildRef> {
        let mut rx = self
            .in_memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut builds = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(build) => builds.push(build),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        builds
    }

    fn track(&self, build: BuildRef, ctx: &CancellationToken) {
        let key = build.tracking_key();
        let Some(enrollment) = self.running.try_enroll(key) else {
            trace!(%key, "already running");
            return;
        };

        debug!(%key, "dispatching build");
        tokio::spawn(execute(
            Arc::clone(&self.engine),
            build,
            enrollment,
            ctx.clone(),
        ));
    }
}

/// Run one build to completion, converting a panic into an `errored` status.
///
/// `enrollment` is dropped last, after the build has been finished, so the key
/// is never released while the execution is still observable.
async fn execute(
    engine: Arc<dyn Engine>,
    build: BuildRef,
    enrollment: Enrollment,
    ctx: CancellationToken,
) {
    let key = enrollment.key();

    let outcome = AssertUnwindSafe(async {
        let runnable = engine.new_build(Arc::clone(&build));
        runnable.run(ctx).await;
    })
    .catch_unwind()
    .await;

    if let Err(payload) = outcome {
        let err = CoreError::Panicked(panic_message(payload.as_ref()));
        error!(%key, error = %err, "build execution panicked");

        if let Err(e) = build.finish(BuildStatus::Errored).await {
            error!(%key, error = %e, "failed to mark panicked build as errored");
        }
    }

    trace!(%key, "build execution exited");
    drop(enrollment);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
