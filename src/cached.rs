mod builder;

pub use builder::CachedLoadableBuilder;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use std::convert::Infallible;
use std::sync::Arc;

use crate::channel::{ContractViolation, ResultChannel};
use crate::loadable::{Fetch, LoadState, Loadable, Machine, Snapshot, SyncHooks};
use crate::policy::InvalidationPolicy;
use crate::queue::SerialQueue;
use crate::storage::{Storage, StorageError, StoredValue};

/// A loadable that consults a [`Storage`] before syncing and persists every fresh result.
///
/// While no content is available a `sync` first tries storage. A stored value that is still
/// valid under the [`InvalidationPolicy`] is served without syncing at all. A stale one is
/// either skipped, or with populate-directly served right away while a refresh runs. Storage
/// errors are logged and treated like an empty storage, only a failing [`Fetch`] makes the
/// loadable fail, and it never evicts content that was already available.
pub struct CachedLoadable<T, E, F> {
    inner: Arc<Inner<T, E, F>>,
}

impl<T, E, F> Clone for CachedLoadable<T, E, F> {
    fn clone(&self) -> Self {
        CachedLoadable {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T, E, F> {
    key: String,
    fetch: F,
    storage: Option<Arc<dyn Storage<T>>>,
    policy: InvalidationPolicy,
    populate_directly: bool,
    delivery: Option<SerialQueue>,
    machine: Machine<T, E>,
    cache: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    // when the content we hold was stored, drives policy based staleness
    last_stored: Option<DateTime<Utc>>,
}

impl<T, E, F> CachedLoadable<T, E, F>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fetch<T, E>,
{
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn policy(&self) -> InvalidationPolicy {
        self.inner.policy
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.inner.machine.snapshot()
    }

    /// When the content currently held was stored, `None` if it never was
    pub fn last_stored(&self) -> Option<DateTime<Utc>> {
        self.inner.cache.lock().last_stored
    }

    pub fn last_error(&self) -> Option<Arc<E>> {
        self.inner.machine.last_error()
    }

    /// Call `observer` with a snapshot after every state transition
    pub fn subscribe<O>(&self, observer: O)
    where
        O: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        self.inner.machine.subscribe(Arc::new(observer));
    }

    /// Resolves with the next snapshot that is not `Syncing`
    pub fn settled(&self) -> ResultChannel<Snapshot<T>, Infallible> {
        self.inner.machine.settled()
    }
}

impl<T, E, F> Loadable for CachedLoadable<T, E, F>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fetch<T, E>,
{
    type Content = T;

    fn state(&self) -> LoadState {
        self.inner.machine.state()
    }

    fn content(&self) -> Option<T> {
        self.inner.machine.content()
    }

    fn is_content_available(&self) -> bool {
        self.inner.machine.is_content_available()
    }

    /// True when the base machine wants a sync, or when the stored content outlived the policy
    fn needs_sync(&self) -> bool {
        if self.inner.machine.needs_sync() {
            return true;
        }

        let last_stored = self.inner.cache.lock().last_stored;
        match last_stored {
            Some(stored_at) => self.inner.policy.is_expired(stored_at, Utc::now()),
            None => false,
        }
    }

    fn sync(&self) {
        let inner = &self.inner;

        if inner.machine.state() == LoadState::Syncing {
            return;
        }

        if inner.machine.is_content_available() {
            inner.machine.sync(inner);
        } else if inner.machine.begin_sync() {
            inner.load_from_storage();
        }
    }
}

impl<T, E, F> Inner<T, E, F>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fetch<T, E>,
{
    fn deliver<V, X, C>(&self, channel: &ResultChannel<V, X>, callback: C) -> Result<(), ContractViolation>
    where
        V: Send + 'static,
        X: Send + 'static,
        C: FnOnce(Result<V, X>) + Send + 'static,
    {
        match &self.delivery {
            Some(queue) => channel.on_complete_on(queue, callback).map(|_| ()),
            None => channel.on_complete(callback).map(|_| ()),
        }
    }

    fn load_from_storage(self: &Arc<Self>) {
        let Some(storage) = &self.storage else {
            return self.perform_sync();
        };

        tracing::trace!(key = %self.key, "consulting storage before syncing");

        let this = self.clone();
        let channel = storage.load(&self.key);

        if let Err(violation) = self.deliver(&channel, move |outcome| this.did_read_storage(outcome)) {
            tracing::error!(key = %self.key, %violation, "storage returned a spent channel, syncing instead");
            self.perform_sync();
        }
    }

    fn did_read_storage(self: &Arc<Self>, outcome: Result<Option<StoredValue<T>>, StorageError>) {
        let stored = match outcome {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::debug!(key = %self.key, "nothing stored, syncing");
                return self.perform_sync();
            }
            Err(error) => {
                tracing::warn!(key = %self.key, %error, "failed to load stored value, syncing");
                return self.perform_sync();
            }
        };

        if self.policy.is_valid(stored.stored_at, Utc::now()) {
            tracing::debug!(key = %self.key, stored_at = %stored.stored_at, "serving stored value");
            self.did_load_from_storage(stored, false);
        } else if self.populate_directly {
            tracing::debug!(key = %self.key, stored_at = %stored.stored_at, "serving stale stored value while refreshing");
            self.did_load_from_storage(stored, true);

            if self.machine.begin_sync() {
                self.perform_sync();
            }
        } else {
            tracing::debug!(key = %self.key, stored_at = %stored.stored_at, "stored value expired, syncing");
            self.perform_sync();
        }
    }

    fn did_load_from_storage(&self, stored: StoredValue<T>, directly_populated: bool) {
        // stale content served directly must not count as freshly stored
        if !directly_populated {
            self.cache.lock().last_stored = Some(stored.stored_at);
        }

        // content read from storage is never written back
        self.succeed(stored.content, false);
    }

    fn succeed(&self, content: T, persist: bool) {
        let write = match &self.storage {
            Some(storage) if persist => {
                let stored = StoredValue::new(content.clone());
                self.cache.lock().last_stored = Some(stored.stored_at);
                Some((storage, stored))
            }
            _ => None,
        };

        if let Some((storage, stored)) = write {
            tracing::trace!(key = %self.key, stored_at = %stored.stored_at, "persisting synced value");
            storage.save(&self.key, stored);
        }

        self.machine.set_sync_succeeded(content);
    }
}

impl<T, E, F> SyncHooks<T, E> for Inner<T, E, F>
where
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fetch<T, E>,
{
    fn perform_sync(self: &Arc<Self>) {
        tracing::trace!(key = %self.key, "syncing");

        let this = self.clone();
        let channel = self.fetch.fetch();

        let attached = self.deliver(&channel, move |outcome| match outcome {
            Ok(content) => this.on_sync_succeeded(content),
            Err(error) => this.on_sync_failed(error),
        });

        if let Err(violation) = attached {
            tracing::error!(key = %self.key, %violation, "fetch returned a spent channel");
            self.machine.set_sync_failed(None);
        }
    }

    fn on_sync_succeeded(&self, content: T) {
        self.succeed(content, true);
    }

    fn on_sync_failed(&self, error: E) {
        tracing::debug!(key = %self.key, content_available = self.machine.is_content_available(), "sync failed");

        self.machine.set_sync_failed(Some(error));
    }
}
