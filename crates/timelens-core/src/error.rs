#![forbid(unsafe_code)]

//! Error taxonomy shared by every timelens crate.
//!
//! All variants are usage-contract violations raised synchronously to the
//! immediate caller. None of them are retried or recovered internally.

use std::fmt;

/// Errors raised by the interception layer, the notifier and the container
/// helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Wrapping a value that is already a wrapper, or mutating a raw target
    /// directly after a wrapper exists for it.
    AlreadyWrapped,
    /// The operation needs a wrapper but received a raw target.
    NotAWrapper,
    /// The value is a scalar and cannot be wrapped.
    NotObservable,
    /// Subscribing to something that is not a wrapper.
    CannotObserve,
    /// Monitoring observers of something that is not a wrapper.
    CannotMonitor,
    /// A write was attempted while a historical snapshot view is active.
    ReadOnlyContext,
    /// A write was attempted while a read is in progress.
    SideEffectInGetter,
    /// The container operation does not apply to this kind of target.
    WrongKind {
        /// Kind the operation requires.
        expected: &'static str,
        /// Kind of the target it was applied to.
        found: &'static str,
    },
    /// The property key does not address anything in this kind of target.
    InvalidKey,
    /// A sequence index past the end (appending at `len` is allowed).
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Sequence length at the time of the call.
        len: usize,
    },
    /// The target cannot be invoked.
    NotCallable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyWrapped => write!(f, "target is already wrapped"),
            Self::NotAWrapper => write!(f, "expected a wrapper, got a raw target"),
            Self::NotObservable => write!(f, "only targets can be wrapped"),
            Self::CannotObserve => write!(f, "cannot observe a value that is not a wrapper"),
            Self::CannotMonitor => write!(f, "cannot monitor a value that is not a wrapper"),
            Self::ReadOnlyContext => write!(f, "cannot make changes while reading a snapshot"),
            Self::SideEffectInGetter => write!(f, "reads must not have side effects"),
            Self::WrongKind { expected, found } => {
                write!(f, "expected a {expected} target, found a {found}")
            }
            Self::InvalidKey => write!(f, "property key does not apply to this target"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::NotCallable => write!(f, "target is not callable"),
        }
    }
}

impl std::error::Error for Error {}

/// Shorthand result type for timelens operations.
pub type Result<T> = std::result::Result<T, Error>;
