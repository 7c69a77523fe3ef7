use thiserror::Error;

pub(crate) type Continuation<V, E> = Box<dyn FnOnce(Result<V, E>) + Send + 'static>;

/// A caller broke the single-fulfillment contract of a channel.
///
/// These are bugs at the call site, the channel reports them and leaves its state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("an outcome was already pushed into this sink")]
    AlreadyPushed,
    #[error("a continuation is already attached to this channel")]
    AlreadyAttached,
    #[error("the channel already completed, nothing more can be attached")]
    AttachedAfterCompletion,
}

/// The single-shot slot shared by a sink and its channel.
///
/// `Empty -> OutcomeOnly | ContinuationOnly -> Completed`, or `Abandoned` if the producer
/// goes away before pushing anything.
pub(crate) enum Slot<V, E> {
    Empty,
    OutcomeOnly(Result<V, E>),
    ContinuationOnly(Continuation<V, E>),
    Completed,
    Abandoned,
}

/// Both halves are present, the continuation should be invoked with the outcome
pub(crate) struct Fire<V, E> {
    pub(crate) continuation: Continuation<V, E>,
    pub(crate) outcome: Result<V, E>,
}

pub(crate) enum Attach<V, E> {
    Waiting,
    Fire(Fire<V, E>),
    // the producer is gone, the continuation is handed back so it is dropped outside the lock
    Abandoned(Continuation<V, E>),
}

impl<V, E> Slot<V, E> {
    pub(crate) fn push(&mut self, outcome: Result<V, E>) -> Result<Option<Fire<V, E>>, ContractViolation> {
        match std::mem::replace(self, Slot::Completed) {
            Slot::Empty => {
                *self = Slot::OutcomeOnly(outcome);
                Ok(None)
            }
            Slot::ContinuationOnly(continuation) => Ok(Some(Fire {
                continuation,
                outcome,
            })),
            already @ (Slot::OutcomeOnly(_) | Slot::Completed | Slot::Abandoned) => {
                *self = already;
                Err(ContractViolation::AlreadyPushed)
            }
        }
    }

    pub(crate) fn attach(&mut self, continuation: Continuation<V, E>) -> Result<Attach<V, E>, ContractViolation> {
        match std::mem::replace(self, Slot::Completed) {
            Slot::Empty => {
                *self = Slot::ContinuationOnly(continuation);
                Ok(Attach::Waiting)
            }
            Slot::OutcomeOnly(outcome) => Ok(Attach::Fire(Fire {
                continuation,
                outcome,
            })),
            Slot::Abandoned => {
                *self = Slot::Abandoned;
                Ok(Attach::Abandoned(continuation))
            }
            attached @ Slot::ContinuationOnly(_) => {
                *self = attached;
                Err(ContractViolation::AlreadyAttached)
            }
            Slot::Completed => Err(ContractViolation::AttachedAfterCompletion),
        }
    }

    /// The producer is gone. Returns the continuation that will now never run, if any.
    pub(crate) fn abandon(&mut self) -> Option<Continuation<V, E>> {
        match std::mem::replace(self, Slot::Abandoned) {
            Slot::Empty => None,
            Slot::ContinuationOnly(continuation) => Some(continuation),
            settled => {
                *self = settled;
                None
            }
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        matches!(self, Slot::Completed)
    }

    pub(crate) fn has_outcome(&self) -> bool {
        matches!(self, Slot::OutcomeOnly(_) | Slot::Completed)
    }
}

impl<V, E> std::fmt::Debug for Slot<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Slot::Empty => "Empty",
            Slot::OutcomeOnly(_) => "OutcomeOnly",
            Slot::ContinuationOnly(_) => "ContinuationOnly",
            Slot::Completed => "Completed",
            Slot::Abandoned => "Abandoned",
        };

        f.write_str(name)
    }
}
