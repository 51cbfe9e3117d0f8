#![forbid(unsafe_code)]

//! Core building blocks for timelens.
//!
//! - [`KeyIndex`]: a prefix tree over ordered key sequences, used for the
//!   snapshot diff store and the observer registry.
//! - [`Error`] / [`Result`]: the usage-contract error taxonomy.

pub mod error;
pub mod key_index;

pub use error::{Error, Result};
pub use key_index::{KeyIndex, Node};
