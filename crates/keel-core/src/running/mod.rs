use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use keel_model::TrackingKey;
use tokio::sync::Notify;

/// Set of tracking keys whose builds are currently executing.
///
/// Membership test and insertion happen under one lock, so two concurrent
/// enrollments of the same key can never both succeed.
#[derive(Clone, Default)]
pub struct RunningSet {
    inner: Arc<RunningSetInner>,
}

#[derive(Default)]
struct RunningSetInner {
    /// Enrolled keys and the moment they were enrolled.
    entries: Mutex<HashMap<TrackingKey, Instant>>,
    /// Woken every time the set becomes empty.
    idle: Notify,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll `key` unless it is already present.
    ///
    /// Returns a guard that keeps the key enrolled until dropped, or `None`
    /// when another execution already holds the key.
    pub fn try_enroll(&self, key: TrackingKey) -> Option<Enrollment> {
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return None;
        }
        entries.insert(key, Instant::now());

        Some(Enrollment {
            key,
            set: self.clone(),
        })
    }

    pub fn contains(&self, key: &TrackingKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// How long `key` has been enrolled.
    pub fn running_for(&self, key: &TrackingKey) -> Option<Duration> {
        self.lock().get(key).map(Instant::elapsed)
    }

    /// Sorted copy of the enrolled keys.
    pub fn snapshot(&self) -> Vec<TrackingKey> {
        let mut keys: Vec<TrackingKey> = self.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Resolve once no key is enrolled.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the await is not missed.
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, key: &TrackingKey) {
        let now_empty = {
            let mut entries = self.lock();
            entries.remove(key);
            entries.is_empty()
        };
        if now_empty {
            self.inner.idle.notify_waiters();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackingKey, Instant>> {
        // Entries stay consistent even if a holder panicked: every critical section is a single map operation.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that a key is enrolled in a [`RunningSet`]. Dropping it removes the key.
#[must_use = "dropping the enrollment releases the key immediately"]
pub struct Enrollment {
    key: TrackingKey,
    set: RunningSet,
}

impl Enrollment {
    pub fn key(&self) -> TrackingKey {
        self.key
    }
}

impl Drop for Enrollment {
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}
