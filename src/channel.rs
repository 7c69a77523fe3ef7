mod future;
mod slot;

pub use future::{ChannelFuture, WaitError};
pub use slot::ContractViolation;

use future::Rendezvous;
use slot::{Attach, Continuation, Fire, Slot};

use parking_lot::Mutex;

use std::any::Any;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::SerialQueue;

type KeepAlive = Arc<dyn Any + Send + Sync>;

/// The state a sink and its channels share
struct Shared<V, E> {
    queue: SerialQueue,
    slot: Mutex<Slot<V, E>>,
    // an upstream producer this sink depends on, held until our outcome is known
    upstream: Mutex<Option<KeepAlive>>,
}

impl<V, E> Shared<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    fn fire(&self, fire: Fire<V, E>) {
        let Fire {
            continuation,
            outcome,
        } = fire;

        self.queue.dispatch(move || continuation(outcome));
    }
}

/// The producer side of a single-fulfillment result.
///
/// Exactly one outcome may be pushed. Dropping the sink without pushing abandons the result:
/// any attached continuation is dropped and never invoked.
pub struct ResultSink<V, E> {
    shared: Arc<Shared<V, E>>,
}

/// The consumer side of a single-fulfillment result.
///
/// At most one continuation may be attached, either directly with [`Self::on_complete`] or
/// through one of the chaining methods. It runs exactly once, on the channel's queue, after the
/// outcome has been pushed.
pub struct ResultChannel<V, E> {
    shared: Arc<Shared<V, E>>,
}

impl<V, E> Clone for ResultChannel<V, E> {
    fn clone(&self) -> Self {
        ResultChannel {
            shared: self.shared.clone(),
        }
    }
}

impl<V, E> ResultSink<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    /// Create a sink bound to `queue`, all continuations for it will run there
    pub fn new(queue: &SerialQueue) -> Self {
        ResultSink {
            shared: Arc::new(Shared {
                queue: queue.clone(),
                slot: Mutex::new(Slot::Empty),
                upstream: Mutex::new(None),
            }),
        }
    }

    pub fn channel(&self) -> ResultChannel<V, E> {
        ResultChannel {
            shared: self.shared.clone(),
        }
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.shared.queue
    }

    /// Push the one and only outcome for this sink.
    ///
    /// If a continuation is already attached it is scheduled right away. A second push is
    /// reported as a [`ContractViolation`] and leaves the first outcome in place.
    pub fn push(&self, outcome: Result<V, E>) -> Result<(), ContractViolation> {
        let pushed = self.shared.slot.lock().push(outcome);

        match pushed {
            Ok(fire) => {
                // the outcome is known, whatever we were keeping alive has done its job
                let upstream = self.shared.upstream.lock().take();
                drop(upstream);

                if let Some(fire) = fire {
                    self.shared.fire(fire);
                }

                Ok(())
            }
            Err(violation) => {
                tracing::error!(%violation, queue = %self.shared.queue.label(), "result sink pushed twice");
                Err(violation)
            }
        }
    }

    /// Keep `upstream` alive for as long as this sink may still receive an outcome
    pub fn source_from<U>(&self, upstream: U)
    where
        U: Any + Send + Sync,
    {
        *self.shared.upstream.lock() = Some(Arc::new(upstream));
    }

    pub fn is_completed(&self) -> bool {
        self.shared.slot.lock().is_completed()
    }
}

impl<V, E> Drop for ResultSink<V, E> {
    fn drop(&mut self) {
        let abandoned = self.shared.slot.lock().abandon();
        let upstream = self.shared.upstream.lock().take();

        if abandoned.is_some() {
            tracing::trace!(queue = %self.shared.queue.label(), "result sink dropped before pushing, continuation abandoned");
        }

        // both may own other sinks, so drop them without holding our locks
        drop(abandoned);
        drop(upstream);
    }
}

impl<V, E> ResultChannel<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    /// A channel that already holds `value`
    pub fn success(value: V, queue: &SerialQueue) -> Self {
        Self::completed(Ok(value), queue)
    }

    /// A channel that already holds `error`
    pub fn failure(error: E, queue: &SerialQueue) -> Self {
        Self::completed(Err(error), queue)
    }

    fn completed(outcome: Result<V, E>, queue: &SerialQueue) -> Self {
        let sink = ResultSink::new(queue);
        let channel = sink.channel();

        // a fresh sink always accepts its first push
        let _ = sink.push(outcome);

        channel
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.shared.queue
    }

    pub fn has_outcome(&self) -> bool {
        self.shared.slot.lock().has_outcome()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.slot.lock().is_completed()
    }

    fn attach(&self, continuation: Continuation<V, E>) -> Result<(), ContractViolation> {
        let attached = self.shared.slot.lock().attach(continuation);

        match attached {
            Ok(Attach::Waiting) => Ok(()),
            Ok(Attach::Fire(fire)) => {
                self.shared.fire(fire);
                Ok(())
            }
            Ok(Attach::Abandoned(continuation)) => {
                tracing::trace!(queue = %self.shared.queue.label(), "attached to an abandoned channel");
                drop(continuation);
                Ok(())
            }
            Err(violation) => {
                tracing::error!(%violation, queue = %self.shared.queue.label(), "result channel continuation rejected");
                Err(violation)
            }
        }
    }

    /// Attach `callback`, invoked on this channel's queue with the outcome once it is available
    pub fn on_complete<F>(&self, callback: F) -> Result<&Self, ContractViolation>
    where
        F: FnOnce(Result<V, E>) + Send + 'static,
    {
        self.attach(Box::new(callback))?;

        Ok(self)
    }

    /// Like [`Self::on_complete`] but `callback` is redispatched onto `queue`
    pub fn on_complete_on<F>(&self, queue: &SerialQueue, callback: F) -> Result<&Self, ContractViolation>
    where
        F: FnOnce(Result<V, E>) + Send + 'static,
    {
        let queue = queue.clone();
        self.attach(Box::new(move |outcome| queue.dispatch(move || callback(outcome))))?;

        Ok(self)
    }

    /// Map this channel's outcome into a new channel on the same queue
    ///
    /// The new channel keeps this one alive, so holding on to just the result is enough for `f`
    /// to eventually run.
    pub fn transform<V2, E2, F>(&self, f: F) -> Result<ResultChannel<V2, E2>, ContractViolation>
    where
        V2: Send + 'static,
        E2: Send + 'static,
        F: FnOnce(Result<V, E>) -> Result<V2, E2> + Send + 'static,
    {
        let sink = ResultSink::new(&self.shared.queue);
        sink.source_from(self.shared.clone());
        let channel = sink.channel();

        self.attach(Box::new(move |outcome| {
            let _ = sink.push(f(outcome));
        }))?;

        Ok(channel)
    }

    pub fn transform_success<V2, F>(&self, f: F) -> Result<ResultChannel<V2, E>, ContractViolation>
    where
        V2: Send + 'static,
        F: FnOnce(V) -> V2 + Send + 'static,
    {
        self.transform(move |outcome| outcome.map(f))
    }

    pub fn transform_error<E2, F>(&self, f: F) -> Result<ResultChannel<V, E2>, ContractViolation>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.transform(move |outcome| outcome.map_err(f))
    }

    /// Chain another asynchronous step after a success.
    ///
    /// On success `f` runs on `queue` (or this channel's queue) and the channel it returns feeds
    /// the result. On failure `f` never runs and the error is forwarded as is.
    pub fn then<V2, F>(&self, queue: Option<&SerialQueue>, f: F) -> Result<ResultChannel<V2, E>, ContractViolation>
    where
        V2: Send + 'static,
        F: FnOnce(V) -> ResultChannel<V2, E> + Send + 'static,
    {
        let queue = queue.unwrap_or(&self.shared.queue).clone();
        let sink = ResultSink::new(&queue);
        sink.source_from(self.shared.clone());
        let channel = sink.channel();

        let step = move |outcome: Result<V, E>| match outcome {
            Ok(value) => {
                let next = f(value);
                // on a rejected attach the sink is dropped with the closure and the chain is abandoned
                let _ = next.on_complete(move |outcome| {
                    let _ = sink.push(outcome);
                });
            }
            Err(error) => {
                let _ = sink.push(Err(error));
            }
        };

        if queue.ptr_eq(&self.shared.queue) {
            self.on_complete(step)?;
        } else {
            self.on_complete_on(&queue, step)?;
        }

        Ok(channel)
    }

    /// Block the calling thread until the outcome arrives or `timeout` elapses.
    ///
    /// This attaches the channel's one continuation. Never call it from the channel's own queue,
    /// the continuation could not run while the queue is blocked.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Result<V, E>, WaitError> {
        let (rendezvous, deliver) = Rendezvous::<V, E>::new();
        self.attach(Box::new(move |outcome| deliver.deliver(outcome)))?;

        rendezvous.wait_timeout(timeout)
    }
}

impl<V, E> IntoFuture for ResultChannel<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<Result<V, E>, WaitError>;
    type IntoFuture = ChannelFuture<V, E>;

    fn into_future(self) -> Self::IntoFuture {
        let (rendezvous, deliver) = Rendezvous::<V, E>::new();

        match self.attach(Box::new(move |outcome| deliver.deliver(outcome))) {
            Ok(()) => ChannelFuture {
                rendezvous: Some(rendezvous),
                violation: None,
            },
            Err(violation) => ChannelFuture {
                rendezvous: None,
                violation: Some(violation),
            },
        }
    }
}

impl<V, E> std::fmt::Debug for ResultChannel<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultChannel")
            .field("queue", &self.shared.queue)
            .field("slot", &*self.shared.slot.lock())
            .finish()
    }
}
