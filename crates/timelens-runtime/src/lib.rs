#![forbid(unsafe_code)]

//! Fine-grained change observation with copy-on-write snapshots.
//!
//! This crate provides the interception and history layer:
//!
//! - [`Runtime`]: the service owning wrappers, observers, snapshots, the
//!   active read context and the tick queue.
//! - [`Wrapper`]: the observable handle for a [`Target`]. Every read goes
//!   through the read context; every write is recorded and published.
//! - [`Snapshot`]: a point-in-time view of all targets, reconstructed from
//!   first-write diffs.
//! - [`Derived`]: a memoized value that subscribes to exactly what it read.
//!
//! # Architecture
//!
//! Everything is single-threaded and shared through `Rc`. A write decomposes
//! into minimal change records (positional for sequences, plus key-order
//! records for enumeration) and, for each touched path, stores the
//! pre-mutation value into the newest live snapshot. Changes are delivered
//! per tick, grouped by `(target, property)`, or immediately when configured.
//!
//! # Invariants
//!
//! 1. One live wrapper per target per runtime.
//! 2. A snapshot's recorded diffs never change after their first write.
//! 3. No writes while a snapshot context is active or a read is in progress.
//! 4. A panicking callback never prevents delivery to the others.

pub mod config;
pub mod context;
pub mod derived;
pub mod notifier;
pub mod runtime;
pub mod snapshot;
pub mod target;
pub mod value;
pub mod wrapper;

mod assoc;
mod mutation;
mod record;
mod sequence;

pub use config::{DeliveryMode, RuntimeConfig};
pub use context::ReadContext;
pub use derived::Derived;
pub use notifier::{Change, ObserverInfo, ObserversChange, Subscription};
pub use runtime::Runtime;
pub use snapshot::{Snapshot, TargetSnapshot};
pub use target::{Kind, NativeFn, Target, TargetId};
pub use timelens_core::{Error, KeyIndex, Result};
pub use value::{KeyPath, PropKey, Slot, Value};
pub use wrapper::Wrapper;
