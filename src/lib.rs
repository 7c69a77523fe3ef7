//! Single-fulfillment result channels, and a loadable cache built on top of them.
//!
//! # Quick Start
//! The easiest way to get started is to wrap a [`Fetch`] in a [`CachedLoadable`]
//! using a [`CachedLoadableBuilder`], backed by a [`storage::FileStorage`].

/// Serial execution contexts. Every channel is bound to one, and all of its callbacks run there.
pub mod queue;
#[doc(inline)]
pub use queue::SerialQueue;

/// A producer pushes exactly one outcome into a [`ResultSink`], a consumer attaches exactly one continuation to its [`ResultChannel`].
pub mod channel;
#[doc(inline)]
pub use channel::{ContractViolation, ResultChannel, ResultSink, WaitError};

/// Time based invalidation of stored values.
pub mod policy;
#[doc(inline)]
pub use policy::InvalidationPolicy;

/// Key value storage for timestamped values, in memory or on disk.
pub mod storage;
#[doc(inline)]
pub use storage::{Storage, StorageError, StoredValue};

/// The Idle / Syncing / Synced / Failed state machine that loadables share.
pub mod loadable;
#[doc(inline)]
pub use loadable::{Fetch, LoadState, Loadable, Snapshot};

/// A loadable that consults storage before syncing and persists what it syncs.
pub mod cached;
#[doc(inline)]
pub use cached::{CachedLoadable, CachedLoadableBuilder};
