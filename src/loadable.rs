use parking_lot::Mutex;

use std::convert::Infallible;
use std::sync::Arc;

use crate::channel::{ResultChannel, ResultSink};
use crate::queue::SerialQueue;

/// Where a loadable is in its sync lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// What observers see after every transition
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub state: LoadState,
    pub content: Option<T>,
}

impl<T> Snapshot<T> {
    pub fn is_content_available(&self) -> bool {
        self.content.is_some()
    }
}

/// A `Fetch` produces fresh content asynchronously, it is the work a loadable syncs with
pub trait Fetch<T, E>: Send + Sync + 'static {
    fn fetch(&self) -> ResultChannel<T, E>;
}

impl<T, E, F> Fetch<T, E> for F
where
    F: Fn() -> ResultChannel<T, E> + Send + Sync + 'static,
{
    fn fetch(&self) -> ResultChannel<T, E> {
        self()
    }
}

/// Something whose content is loaded on demand and can go stale
pub trait Loadable {
    type Content;

    fn state(&self) -> LoadState;

    fn content(&self) -> Option<Self::Content>;

    fn is_content_available(&self) -> bool;

    fn needs_sync(&self) -> bool;

    fn sync(&self);

    fn sync_if_needed(&self) {
        if self.needs_sync() {
            self.sync();
        }
    }
}

/// The hooks a [`Machine`] drives.
///
/// `perform_sync` starts the real work and must eventually report back through
/// `on_sync_succeeded` or `on_sync_failed`.
pub trait SyncHooks<T, E> {
    fn perform_sync(self: &Arc<Self>);

    fn on_sync_succeeded(&self, content: T);

    fn on_sync_failed(&self, error: E);
}

pub type Observer<T> = Arc<dyn Fn(&Snapshot<T>) + Send + Sync>;

/// The base Idle / Syncing / Synced / Failed state machine.
///
/// A failed sync never clears content that was already available.
pub struct Machine<T, E> {
    inner: Mutex<MachineInner<T, E>>,
    queue: SerialQueue,
}

struct MachineInner<T, E> {
    state: LoadState,
    content: Option<T>,
    last_error: Option<Arc<E>>,
    observers: Vec<Observer<T>>,
    settled: Vec<ResultSink<Snapshot<T>, Infallible>>,
}

impl<T, E> Machine<T, E>
where
    T: Clone + Send + 'static,
{
    /// `queue` is where [`Machine::settled`] results are delivered
    pub fn new(queue: SerialQueue) -> Self {
        Machine {
            inner: Mutex::new(MachineInner {
                state: LoadState::Idle,
                content: None,
                last_error: None,
                observers: Vec::new(),
                settled: Vec::new(),
            }),
            queue,
        }
    }

    pub fn state(&self) -> LoadState {
        self.inner.lock().state
    }

    pub fn content(&self) -> Option<T> {
        self.inner.lock().content.clone()
    }

    pub fn is_content_available(&self) -> bool {
        self.inner.lock().content.is_some()
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        let inner = self.inner.lock();

        Snapshot {
            state: inner.state,
            content: inner.content.clone(),
        }
    }

    pub fn last_error(&self) -> Option<Arc<E>> {
        self.inner.lock().last_error.clone()
    }

    /// Base staleness: nothing was synced yet, or the last attempt failed
    pub fn needs_sync(&self) -> bool {
        matches!(self.state(), LoadState::Idle | LoadState::Failed)
    }

    pub fn subscribe(&self, observer: Observer<T>) {
        self.inner.lock().observers.push(observer);
    }

    /// Resolves with the next snapshot that is not `Syncing`, right away if nothing is in flight
    pub fn settled(&self) -> ResultChannel<Snapshot<T>, Infallible> {
        let sink = ResultSink::new(&self.queue);
        let channel = sink.channel();

        let mut inner = self.inner.lock();
        if inner.state == LoadState::Syncing {
            inner.settled.push(sink);
        } else {
            let snapshot = Snapshot {
                state: inner.state,
                content: inner.content.clone(),
            };
            drop(inner);
            let _ = sink.push(Ok(snapshot));
        }

        channel
    }

    /// Move to `Syncing`, returns false if a sync is already in flight
    pub fn begin_sync(&self) -> bool {
        let began = self.transition(|inner| {
            if inner.state == LoadState::Syncing {
                return false;
            }

            inner.state = LoadState::Syncing;
            true
        });

        if !began {
            tracing::trace!("sync already in flight");
        }

        began
    }

    /// The base `sync`: start a sync through `hooks` unless one is in flight
    pub fn sync<H>(&self, hooks: &Arc<H>)
    where
        H: SyncHooks<T, E>,
    {
        if self.begin_sync() {
            hooks.perform_sync();
        }
    }

    pub fn set_sync_succeeded(&self, content: T) {
        self.transition(|inner| {
            inner.content = Some(content);
            inner.state = LoadState::Synced;
            inner.last_error = None;
        });
    }

    pub fn set_sync_failed(&self, error: Option<E>) {
        self.transition(|inner| {
            inner.state = LoadState::Failed;
            inner.last_error = error.map(Arc::new);
        });
    }

    fn transition<R>(&self, f: impl FnOnce(&mut MachineInner<T, E>) -> R) -> R {
        let (result, snapshot, observers, settled) = {
            let mut inner = self.inner.lock();
            let before = inner.state;
            let result = f(&mut inner);

            let snapshot = Snapshot {
                state: inner.state,
                content: inner.content.clone(),
            };

            let settled = if inner.state != LoadState::Syncing {
                std::mem::take(&mut inner.settled)
            } else {
                Vec::new()
            };

            // an unchanged `Syncing` is a refused transition, nobody needs to hear about it
            let observers = if before == LoadState::Syncing && inner.state == LoadState::Syncing {
                Vec::new()
            } else {
                inner.observers.clone()
            };

            (result, snapshot, observers, settled)
        };

        // observers may call back into the machine, never run them under the lock
        for observer in &observers {
            observer(&snapshot);
        }

        for sink in settled {
            let _ = sink.push(Ok(snapshot.clone()));
        }

        result
    }
}
