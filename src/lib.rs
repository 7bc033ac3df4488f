//! # Resource Store
//!
//! Reactive in-memory resources: a single mutable message ([`Value`]) or a
//! keyed set of messages ([`Collection`]) that broadcast every change to any
//! number of subscribers.
//!
//! ## Core Concepts
//!
//! - **Optimistic updates**: writes are computed off-lock and committed only
//!   if nothing else committed in between, otherwise `ConcurrentUpdate`
//! - **Field masks**: writes and reads can be restricted to a set of paths
//! - **Pull**: each subscription replays the current state as seed events,
//!   then streams live changes in commit order until its context is cancelled
//! - **Backpressure merging**: slow collection consumers can receive one
//!   coalesced change per id instead of every change
//!
//! ## Example
//!
//! ```ignore
//! use resource_store::{Context, ReadOptions, ResourceConfig, Value, WriteOptions};
//!
//! let value = Value::new(Light::default(), ResourceConfig::default());
//!
//! let (ctx, cancel) = Context::with_cancel();
//! let changes = value.pull(ctx, &ReadOptions::default())?;
//!
//! value.set(Light { level: 50, ..Default::default() }, &WriteOptions::default())?;
//!
//! let seed = changes.recv()?;   // seed_value = true
//! let update = changes.recv()?; // level = 50
//! cancel.cancel();
//! ```

pub mod changes;
pub mod cmp;
pub mod collection;
pub mod context;
pub mod error;
pub mod ids;
pub mod masks;
pub mod merge;
pub mod options;
pub mod types;
pub mod value;

mod bus;
mod shape;
mod update;

// Re-exports
pub use changes::{ChangeType, CollectionChange, ValueChange};
pub use cmp::Equivalence;
pub use collection::Collection;
pub use context::{CancelHandle, Context};
pub use error::{ErrorKind, Result, StoreError};
pub use ids::{generate_unique_id, MAX_ID_ATTEMPTS};
pub use masks::FieldMask;
pub use merge::{merge_collection_changes, merge_collection_excess};
pub use options::{
    shared_rng, IncludeFn, Interceptor, ReadOptions, ResourceConfig, SharedRng, WriteOptions,
};
pub use types::{Clock, FixedClock, Message, SystemClock, Timestamp};
pub use value::Value;
