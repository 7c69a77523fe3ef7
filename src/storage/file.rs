use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use std::fmt::Write;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Storage, StorageError, StoredValue};
use crate::channel::{ResultChannel, ResultSink};
use crate::queue::SerialQueue;

const EXTENSION: &str = "json";
// idle containers are swept once the map grows past this
const PRUNE_THRESHOLD: usize = 64;

/// A disk backed [`Storage`], one JSON snapshot file per key.
///
/// Each key gets its own container with its own queue, so reads and writes of a key are
/// serialized while different keys proceed independently. Containers nobody is using are
/// pruned from the map by checking their reference count.
pub struct FileStorage<T> {
    root: PathBuf,
    containers: Mutex<HashMap<String, Arc<Container>>>,
    _content: PhantomData<fn() -> T>,
}

struct Container {
    path: PathBuf,
    queue: SerialQueue,
}

impl<T> FileStorage<T> {
    /// Open a storage rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(FileStorage {
            root,
            containers: Mutex::new(HashMap::new()),
            _content: PhantomData,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file a key's value is stored in
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", escape_key(key), EXTENSION))
    }

    /// Drop containers that no pending operation holds anymore, returns how many were removed
    pub fn prune(&self) -> usize {
        let mut containers = self.containers.lock();
        let before = containers.len();

        containers.retain(|_, container| Arc::strong_count(container) > 1);

        before - containers.len()
    }

    pub fn containers(&self) -> usize {
        self.containers.lock().len()
    }

    fn container(&self, key: &str) -> Arc<Container> {
        let mut containers = self.containers.lock();

        if let Some(container) = containers.get(key) {
            return container.clone();
        }

        if containers.len() >= PRUNE_THRESHOLD {
            containers.retain(|_, container| Arc::strong_count(container) > 1);
        }

        let escaped = escape_key(key);
        let container = Arc::new(Container {
            path: self.root.join(format!("{}.{}", escaped, EXTENSION)),
            queue: SerialQueue::new(format!("promising-cache.file-storage.{}", escaped)),
        });
        containers.insert(key.to_owned(), container.clone());

        container
    }
}

impl<T> Storage<T> for FileStorage<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn load(&self, key: &str) -> ResultChannel<Option<StoredValue<T>>, StorageError> {
        let container = self.container(key);
        let sink = ResultSink::new(&container.queue);
        let channel = sink.channel();

        container.queue.clone().dispatch(move || {
            let _ = sink.push(read(&container.path));
        });

        channel
    }

    fn load_sync(&self, key: &str) -> Result<Option<StoredValue<T>>, StorageError> {
        let container = self.container(key);

        container.queue.clone().dispatch_sync(move || read(&container.path))
    }

    fn save(&self, key: &str, value: StoredValue<T>) {
        let container = self.container(key);
        let key = key.to_owned();

        container.queue.clone().dispatch(move || {
            match write(&container.path, &value) {
                Ok(()) => tracing::trace!(key = %key, path = ?container.path, "stored value written"),
                Err(error) => tracing::warn!(key = %key, %error, "failed to write stored value"),
            }
        });
    }

    fn clean(&self, key: &str) -> ResultChannel<bool, StorageError> {
        let container = self.container(key);
        let sink = ResultSink::new(&container.queue);
        let channel = sink.channel();

        container.queue.clone().dispatch(move || {
            let _ = sink.push(remove(&container.path));
        });

        channel
    }

    fn clean_sync(&self, key: &str) -> Result<bool, StorageError> {
        let container = self.container(key);

        container.queue.clone().dispatch_sync(move || remove(&container.path))
    }

    fn remove_container(&self, key: &str) -> bool {
        let had_container = self.containers.lock().contains_key(key);

        // go through the key's queue so pending writes land before the file is removed
        let container = self.container(key);
        let path = container.path.clone();
        let removed = container.queue.dispatch_sync(move || remove(&path));

        {
            let mut containers = self.containers.lock();
            if containers.get(key).is_some_and(|current| Arc::ptr_eq(current, &container)) {
                containers.remove(key);
            }
        }

        match removed {
            Ok(removed) => had_container || removed,
            Err(error) => {
                tracing::warn!(key = %key, %error, "failed to remove stored value");
                had_container
            }
        }
    }
}

/// Escape `key` into a string that is safe to use as a file name.
///
/// ASCII alphanumerics, `-` and `_` are kept, every other byte becomes `%XX`.
pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());

    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            escaped.push(byte as char);
        } else {
            let _ = write!(escaped, "%{:02X}", byte);
        }
    }

    escaped
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<StoredValue<T>>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(StorageError::Decode)
}

// write to a sibling file first so a crash never leaves a half written snapshot behind
fn write<T: Serialize>(path: &Path, value: &StoredValue<T>) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(StorageError::Encode)?;
    let staging = path.with_extension(format!("{}.tmp", EXTENSION));

    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)?;

    Ok(())
}

fn remove(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn storage() -> (tempfile::TempDir, FileStorage<String>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("snapshots")).unwrap();

        (dir, storage)
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("user-1_a"), "user-1_a");
        assert_eq!(escape_key("a/b c"), "a%2Fb%20c");
        assert_eq!(escape_key("../etc"), "%2E%2E%2Fetc");
        assert_eq!(escape_key("é"), "%C3%A9");
    }

    #[test]
    fn test_save_then_load_sync_reads_the_write() {
        let (_dir, storage) = storage();

        storage.save("profile", StoredValue::new("hello".to_string()));
        let loaded = storage.load_sync("profile").unwrap().unwrap();

        assert_eq!(loaded.content, "hello");
        assert!(storage.path_for("profile").exists());
    }

    #[test]
    fn test_values_survive_reopening() {
        let (dir, storage) = storage();
        let stored = StoredValue::new("persisted".to_string());

        storage.save("a/b", stored.clone());
        storage.load_sync("a/b").unwrap();
        drop(storage);

        let reopened = FileStorage::<String>::open(dir.path().join("snapshots")).unwrap();
        let loaded = reopened.load("a/b").wait_timeout(WAIT).unwrap().unwrap();

        assert_eq!(loaded, Some(stored));
    }

    #[test]
    fn test_garbage_file_is_a_decode_error() {
        let (_dir, storage) = storage();
        fs::write(storage.path_for("broken"), b"not json").unwrap();

        assert!(matches!(storage.load_sync("broken"), Err(StorageError::Decode(_))));
    }

    #[test]
    fn test_clean_and_remove_container() {
        let (_dir, storage) = storage();

        storage.save("a", StoredValue::new("1".to_string()));
        assert!(storage.clean("a").wait_timeout(WAIT).unwrap().unwrap());
        assert!(!storage.clean_sync("a").unwrap());

        storage.save("b", StoredValue::new("2".to_string()));
        assert!(storage.remove_container("b"));
        assert!(!storage.path_for("b").exists());
        assert!(storage.load_sync("b").unwrap().is_none());
    }

    #[test]
    fn test_remove_container_without_a_container_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();

        let writer = FileStorage::<String>::open(dir.path()).unwrap();
        writer.save("c", StoredValue::new("3".to_string()));
        writer.load_sync("c").unwrap();
        drop(writer);

        let storage = FileStorage::<String>::open(dir.path()).unwrap();
        assert_eq!(storage.containers(), 0);
        assert!(storage.path_for("c").exists());

        assert!(storage.remove_container("c"));
        assert!(!storage.path_for("c").exists());
        assert_eq!(storage.containers(), 0);
        assert!(!storage.remove_container("c"));
    }

    #[test]
    fn test_idle_containers_are_pruned() {
        let (_dir, storage) = storage();

        storage.load_sync("a").unwrap();
        storage.load_sync("b").unwrap();
        assert_eq!(storage.containers(), 2);

        assert_eq!(storage.prune(), 2);
        assert_eq!(storage.containers(), 0);
    }
}
