use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use super::ContractViolation;

/// Why waiting on a channel produced no outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error(transparent)]
    Violation(#[from] ContractViolation),
    #[error("the producer went away without pushing an outcome")]
    Abandoned,
    #[error("timed out waiting for an outcome")]
    Timeout,
}

enum State<V, E> {
    Waiting(Option<Waker>),
    Delivered(Result<V, E>),
    Taken,
    Abandoned,
}

/// Where a continuation parks its outcome for a blocking or async waiter
pub(crate) struct Rendezvous<V, E> {
    state: Mutex<State<V, E>>,
    ready: Condvar,
}

/// The continuation's half of a [`Rendezvous`]
///
/// Dropping it without delivering marks the rendezvous abandoned, which is how a waiter learns
/// that the producer dropped its sink.
pub(crate) struct Deliver<V, E> {
    rendezvous: Option<Arc<Rendezvous<V, E>>>,
}

impl<V, E> Rendezvous<V, E> {
    pub(crate) fn new() -> (Arc<Self>, Deliver<V, E>) {
        let rendezvous = Arc::new(Rendezvous {
            state: Mutex::new(State::Waiting(None)),
            ready: Condvar::new(),
        });

        let deliver = Deliver {
            rendezvous: Some(rendezvous.clone()),
        };

        (rendezvous, deliver)
    }

    fn settle(&self, settled: State<V, E>) {
        let waker = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, settled) {
                State::Waiting(waker) => waker,
                previous => {
                    *state = previous;
                    None
                }
            }
        };

        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn take(state: &mut State<V, E>) -> Option<Result<Result<V, E>, WaitError>> {
        match std::mem::replace(state, State::Taken) {
            State::Delivered(outcome) => Some(Ok(outcome)),
            State::Abandoned => {
                *state = State::Abandoned;
                Some(Err(WaitError::Abandoned))
            }
            State::Taken => Some(Err(WaitError::Abandoned)),
            waiting @ State::Waiting(_) => {
                *state = waiting;
                None
            }
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<Result<V, E>, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(taken) = Self::take(&mut state) {
                return taken;
            }

            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return Self::take(&mut state).unwrap_or(Err(WaitError::Timeout));
            }
        }
    }

    fn poll(&self, cx: &mut Context<'_>) -> Poll<Result<Result<V, E>, WaitError>> {
        let mut state = self.state.lock();

        if let Some(taken) = Self::take(&mut state) {
            return Poll::Ready(taken);
        }

        if let State::Waiting(waker) = &mut *state {
            let stale = match waker {
                Some(registered) => !registered.will_wake(cx.waker()),
                None => true,
            };

            if stale {
                *waker = Some(cx.waker().clone());
            }
        }

        Poll::Pending
    }
}

impl<V, E> Deliver<V, E> {
    pub(crate) fn deliver(mut self, outcome: Result<V, E>) {
        if let Some(rendezvous) = self.rendezvous.take() {
            rendezvous.settle(State::Delivered(outcome));
        }
    }
}

impl<V, E> Drop for Deliver<V, E> {
    fn drop(&mut self) {
        if let Some(rendezvous) = self.rendezvous.take() {
            rendezvous.settle(State::Abandoned);
        }
    }
}

/// A [`super::ResultChannel`] being awaited
///
/// Resolves to the channel's outcome, or a [`WaitError`] if the producer went away or the channel
/// already had a continuation attached.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ChannelFuture<V, E> {
    pub(crate) rendezvous: Option<Arc<Rendezvous<V, E>>>,
    pub(crate) violation: Option<ContractViolation>,
}

impl<V, E> Future for ChannelFuture<V, E> {
    type Output = Result<Result<V, E>, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(violation) = this.violation.take() {
            return Poll::Ready(Err(WaitError::Violation(violation)));
        }

        match &this.rendezvous {
            Some(rendezvous) => rendezvous.poll(cx),
            None => Poll::Ready(Err(WaitError::Abandoned)),
        }
    }
}
