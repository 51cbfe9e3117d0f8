#![forbid(unsafe_code)]

//! timelens public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use timelens_runtime::{
    Change, DeliveryMode, Derived, Error, Kind, ObserverInfo, ObserversChange, PropKey,
    ReadContext, Result, Runtime, RuntimeConfig, Slot, Snapshot, Subscription, Target, Value,
    Wrapper,
};

pub mod prelude {
    pub use timelens_core as core;
    pub use timelens_runtime as runtime;

    pub use timelens_runtime::{
        Derived, PropKey, ReadContext, Runtime, Slot, Snapshot, Target, Value, Wrapper,
    };
}
