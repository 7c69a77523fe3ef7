use parking_lot::{Condvar, Mutex};

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

static MAIN: OnceLock<SerialQueue> = OnceLock::new();

#[derive(Clone)]
/// A serial execution context.
///
/// Jobs run one at a time, in submission order, on a dedicated worker thread.
/// Cloning the queue hands out another reference to the same worker.
pub struct SerialQueue {
    shared: Arc<Shared>,
    // the worker only holds `shared`, once every handle is gone it drains what is left and exits
    _owner: Arc<Owner>,
}

struct Shared {
    label: String,
    jobs: Mutex<Jobs>,
    ready: Condvar,
    worker: OnceLock<ThreadId>,
}

struct Jobs {
    pending: VecDeque<Job>,
    closed: bool,
}

struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.jobs.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

impl SerialQueue {
    /// Spawn a new queue whose worker thread is named after `label`
    ///
    /// # Panics
    /// If the worker thread cannot be spawned, see [`SerialQueue::try_new`].
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();

        match Self::try_new(label.clone()) {
            Ok(queue) => queue,
            Err(error) => panic!("failed to spawn serial queue {:?}: {}", label, error),
        }
    }

    /// Spawn a new queue, returning the error if the OS refuses to start its worker thread
    pub fn try_new(label: impl Into<String>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            label: label.into(),
            jobs: Mutex::new(Jobs {
                pending: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            worker: OnceLock::new(),
        });

        let worker = shared.clone();
        thread::Builder::new()
            .name(shared.label.clone())
            .spawn(move || run(worker))?;

        Ok(SerialQueue {
            _owner: Arc::new(Owner {
                shared: shared.clone(),
            }),
            shared,
        })
    }

    /// The process wide queue used to deliver results when nothing else is configured
    pub fn main() -> SerialQueue {
        MAIN.get_or_init(|| SerialQueue::new("promising-cache.main")).clone()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Returns true if both handles point at the same worker
    pub fn ptr_eq(&self, other: &SerialQueue) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Returns true if the calling thread is this queue's worker
    pub fn is_current(&self) -> bool {
        self.shared.worker.get() == Some(&thread::current().id())
    }

    /// Schedule `job` to run after everything already submitted to this queue
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.jobs.lock().pending.push_back(Box::new(job));
        self.shared.ready.notify_one();
    }

    /// Run `job` on this queue and block until it has finished.
    ///
    /// Everything submitted before this call completes first. Calling this from the queue itself
    /// runs `job` inline, since waiting on ourselves could never finish.
    pub fn dispatch_sync<R, F>(&self, job: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return job();
        }

        let rendezvous = Arc::new((Mutex::new(None), Condvar::new()));
        let filled = rendezvous.clone();

        self.dispatch(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job));

            let (slot, ready) = &*filled;
            *slot.lock() = Some(result);
            ready.notify_one();
        });

        let (slot, ready) = &*rendezvous;
        let mut slot = slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return match result {
                    Ok(value) => value,
                    Err(payload) => panic::resume_unwind(payload),
                };
            }

            ready.wait(&mut slot);
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.shared.label)
            .finish()
    }
}

fn run(shared: Arc<Shared>) {
    let _ = shared.worker.set(thread::current().id());

    loop {
        let job = {
            let mut jobs = shared.jobs.lock();
            loop {
                if let Some(job) = jobs.pending.pop_front() {
                    break job;
                }

                if jobs.closed {
                    tracing::trace!(queue = %shared.label, "serial queue closed");
                    return;
                }

                shared.ready.wait(&mut jobs);
            }
        };

        // a panicking job must not take the rest of the queue down with it
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(queue = %shared.label, "job panicked on serial queue");
        }
    }
}
