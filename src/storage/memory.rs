use hashbrown::HashMap;
use parking_lot::Mutex;

use std::sync::Arc;

use super::{Storage, StorageError, StoredValue};
use crate::channel::{ResultChannel, ResultSink};
use crate::queue::SerialQueue;

/// An in process [`Storage`], every key shares one queue
pub struct MemoryStorage<T> {
    queue: SerialQueue,
    // only touched from jobs running on `queue`
    entries: Arc<Mutex<HashMap<String, StoredValue<T>>>>,
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        MemoryStorage {
            queue: SerialQueue::new("promising-cache.memory-storage"),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }
}

impl<T> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryStorage<T>
where
    T: Send + 'static,
{
    pub fn len(&self) -> usize {
        let entries = self.entries.clone();
        self.queue.dispatch_sync(move || entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Storage<T> for MemoryStorage<T>
where
    T: Clone + Send + 'static,
{
    fn load(&self, key: &str) -> ResultChannel<Option<StoredValue<T>>, StorageError> {
        let sink = ResultSink::new(&self.queue);
        let channel = sink.channel();

        let entries = self.entries.clone();
        let key = key.to_owned();
        self.queue.dispatch(move || {
            let stored = entries.lock().get(&key).cloned();
            let _ = sink.push(Ok(stored));
        });

        channel
    }

    fn load_sync(&self, key: &str) -> Result<Option<StoredValue<T>>, StorageError> {
        let entries = self.entries.clone();
        let key = key.to_owned();

        Ok(self.queue.dispatch_sync(move || entries.lock().get(&key).cloned()))
    }

    fn save(&self, key: &str, value: StoredValue<T>) {
        let entries = self.entries.clone();
        let key = key.to_owned();

        self.queue.dispatch(move || {
            tracing::trace!(key = %key, "storing value in memory");
            entries.lock().insert(key, value);
        });
    }

    fn clean(&self, key: &str) -> ResultChannel<bool, StorageError> {
        let sink = ResultSink::new(&self.queue);
        let channel = sink.channel();

        let entries = self.entries.clone();
        let key = key.to_owned();
        self.queue.dispatch(move || {
            let removed = entries.lock().remove(&key).is_some();
            let _ = sink.push(Ok(removed));
        });

        channel
    }

    fn clean_sync(&self, key: &str) -> Result<bool, StorageError> {
        let entries = self.entries.clone();
        let key = key.to_owned();

        Ok(self.queue.dispatch_sync(move || entries.lock().remove(&key).is_some()))
    }

    fn remove_container(&self, key: &str) -> bool {
        // a single shared container, removing it is the same as cleaning the key
        self.clean_sync(key).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_load_sees_earlier_save() {
        let storage = MemoryStorage::new();

        storage.save("a", StoredValue::new(1));

        assert_eq!(storage.load_sync("a").unwrap().map(|s| s.content), Some(1));
        let loaded = storage.load("a").wait_timeout(WAIT).unwrap().unwrap();
        assert_eq!(loaded.map(|s| s.content), Some(1));
    }

    #[test]
    fn test_missing_key_loads_none() {
        let storage = MemoryStorage::<i32>::new();

        assert!(storage.load_sync("missing").unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_clean_reports_removal() {
        let storage = MemoryStorage::new();
        storage.save("a", StoredValue::new("value"));

        assert!(storage.clean("a").wait_timeout(WAIT).unwrap().unwrap());
        assert!(!storage.clean_sync("a").unwrap());
        assert!(!storage.remove_container("a"));
    }
}
