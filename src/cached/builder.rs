use parking_lot::Mutex;

use std::sync::Arc;

use super::{CacheState, CachedLoadable, Inner};
use crate::loadable::{Fetch, Machine};
use crate::policy::InvalidationPolicy;
use crate::queue::SerialQueue;
use crate::storage::Storage;

/// Configures a [`CachedLoadable`].
///
/// By default there is no storage, stored values never expire, stale values are not served and
/// results are delivered on [`SerialQueue::main`].
pub struct CachedLoadableBuilder<T> {
    key: String,
    storage: Option<Arc<dyn Storage<T>>>,
    policy: InvalidationPolicy,
    populate_directly: bool,
    delivery: Option<SerialQueue>,
}

impl<T: 'static> CachedLoadableBuilder<T> {
    /// `key` identifies the loadable's value in storage
    pub fn new(key: impl Into<String>) -> Self {
        CachedLoadableBuilder {
            key: key.into(),
            storage: None,
            policy: InvalidationPolicy::default(),
            populate_directly: false,
            delivery: Some(SerialQueue::main()),
        }
    }

    pub fn storage<S>(mut self, storage: Arc<S>) -> Self
    where
        S: Storage<T>,
    {
        let storage: Arc<dyn Storage<T>> = storage;
        self.storage = Some(storage);
        self
    }

    pub fn shared_storage(mut self, storage: Arc<dyn Storage<T>>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn policy(mut self, policy: InvalidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Serve expired stored values right away while a refresh runs
    pub fn populate_directly(mut self, populate_directly: bool) -> Self {
        self.populate_directly = populate_directly;
        self
    }

    /// The queue storage reads and sync results are delivered on, `None` delivers them on
    /// whatever queue produced them
    pub fn delivery(mut self, delivery: Option<SerialQueue>) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn build<E, F>(self, fetch: F) -> CachedLoadable<T, E, F>
    where
        T: Clone + Send,
        E: Send + Sync + 'static,
        F: Fetch<T, E>,
    {
        let settled_queue = self.delivery.clone().unwrap_or_else(SerialQueue::main);

        CachedLoadable {
            inner: Arc::new(Inner {
                key: self.key,
                fetch,
                storage: self.storage,
                policy: self.policy,
                populate_directly: self.populate_directly,
                delivery: self.delivery,
                machine: Machine::new(settled_queue),
                cache: Mutex::new(CacheState::default()),
            }),
        }
    }
}
