use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use tracing::debug;

use crate::{
    client::RuntimeContainer,
    container::Container,
    io::{IoManager, StreamRegistry},
    killer::{Killer, KillerConfig, TaskKiller},
    rootfs::{HostRootfs, RootfsManager},
    task::TaskLifecycle,
};

type RecreateLock = tokio::sync::Mutex<()>;

/// Builds [`Container`] adapters sharing one set of collaborators.
///
/// Adapters for the same handle share a task recreation lock for as long as
/// any of them is alive.
pub struct Runtime {
    killer: Arc<dyn Killer>,
    rootfs: Arc<dyn RootfsManager>,
    io: Arc<dyn IoManager>,
    recreate_locks: Mutex<HashMap<String, Weak<RecreateLock>>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::with_killer_config(KillerConfig::default())
    }
}

impl Runtime {
    pub fn new(
        killer: Arc<dyn Killer>,
        rootfs: Arc<dyn RootfsManager>,
        io: Arc<dyn IoManager>,
    ) -> Self {
        Self {
            killer,
            rootfs,
            io,
            recreate_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Host root filesystems, in-memory stream registry and the given kill timings.
    pub fn with_killer_config(config: KillerConfig) -> Self {
        Self::new(
            Arc::new(TaskKiller::new(config)),
            Arc::new(HostRootfs::default()),
            Arc::new(StreamRegistry::new()),
        )
    }

    pub fn container(&self, inner: Arc<dyn RuntimeContainer>) -> Container {
        let lock = self.recreate_lock(inner.id());
        let lifecycle = TaskLifecycle::new(Arc::clone(&inner), lock);
        Container::new(
            inner,
            lifecycle,
            Arc::clone(&self.killer),
            Arc::clone(&self.rootfs),
            Arc::clone(&self.io),
        )
    }

    /// Detach every IO binding of a destroyed container.
    ///
    /// The recreation lock stays shared while adapters for `handle` are alive
    /// and is pruned once the last one is dropped.
    pub fn forget(&self, handle: &str) {
        debug!(container = handle, "forgetting container");
        self.io.remove_container(handle);
    }

    fn recreate_lock(&self, handle: &str) -> Arc<RecreateLock> {
        let mut locks = self.locks();
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(handle).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(RecreateLock::default());
        locks.insert(handle.to_string(), Arc::downgrade(&lock));
        lock
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Weak<RecreateLock>>> {
        self.recreate_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
