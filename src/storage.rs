pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::time::Duration;

use crate::channel::ResultChannel;
use crate::policy::{self, InvalidationPolicy};

/// A stored value together with the moment it was stored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredValue<T> {
    pub content: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> StoredValue<T> {
    /// Wrap `content`, stamped with the current time
    pub fn new(content: T) -> Self {
        StoredValue::at(content, Utc::now())
    }

    pub fn at(content: T, stored_at: DateTime<Utc>) -> Self {
        StoredValue { content, stored_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        policy::age(self.stored_at, now)
    }

    pub fn is_valid(&self, policy: &InvalidationPolicy, now: DateTime<Utc>) -> bool {
        policy.is_valid(self.stored_at, now)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode stored value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode stored value: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A key value store for [`StoredValue`]s.
///
/// Every operation for a key is serialized on a queue owned by the storage, so a write issued
/// before a read of the same key is always observed by that read. There is no ordering between
/// different keys.
pub trait Storage<T>: Send + Sync + 'static {
    /// Load the value stored for `key`, `None` if there is nothing stored
    fn load(&self, key: &str) -> ResultChannel<Option<StoredValue<T>>, StorageError>;

    /// Like [`Storage::load`] but blocks the caller until the storage queue has served the read
    fn load_sync(&self, key: &str) -> Result<Option<StoredValue<T>>, StorageError>;

    /// Schedule a write, failures are logged by the storage
    fn save(&self, key: &str, value: StoredValue<T>);

    /// Remove whatever is stored for `key`, resolving to whether anything was removed
    fn clean(&self, key: &str) -> ResultChannel<bool, StorageError>;

    fn clean_sync(&self, key: &str) -> Result<bool, StorageError>;

    /// Drop everything the storage keeps for `key`, including its stored value
    fn remove_container(&self, key: &str) -> bool;
}
