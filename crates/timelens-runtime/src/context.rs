#![forbid(unsafe_code)]

//! Read contexts.
//!
//! A [`ReadContext`] is installed for the duration of a closure with
//! [`Runtime::with_read_context`](crate::Runtime::with_read_context). It can
//!
//! - pin every read to a historical [`Snapshot`] (writes are then rejected),
//! - report each `(wrapper, key)` pair that is read, for fine-grained
//!   subscription later,
//! - report each write,
//! - tag the changes it makes with an origin.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::snapshot::Snapshot;
use crate::value::{PropKey, Slot};
use crate::wrapper::Wrapper;

type GetHook = Rc<dyn Fn(&Wrapper, &PropKey)>;
type SetHook = Rc<dyn Fn(&Wrapper, &PropKey, &Slot)>;

/// Ambient state consulted by every read and write.
#[derive(Clone, Default)]
pub struct ReadContext {
    origin: Option<Rc<str>>,
    snapshot: Option<Snapshot>,
    on_get: Option<GetHook>,
    on_set: Option<SetHook>,
}

impl fmt::Debug for ReadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadContext")
            .field("origin", &self.origin)
            .field("snapshot", &self.snapshot.as_ref().map(Snapshot::id))
            .field("on_get", &self.on_get.is_some())
            .field("on_set", &self.on_set.is_some())
            .finish()
    }
}

impl ReadContext {
    /// Context with no snapshot, no hooks and no origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag changes made in this context.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<Rc<str>>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Read through `snapshot` instead of live state.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Call `hook` after every tracked read.
    #[must_use]
    pub fn on_get(mut self, hook: impl Fn(&Wrapper, &PropKey) + 'static) -> Self {
        self.on_get = Some(Rc::new(hook));
        self
    }

    /// Call `hook` after every successful property write or delete.
    #[must_use]
    pub fn on_set(mut self, hook: impl Fn(&Wrapper, &PropKey, &Slot) + 'static) -> Self {
        self.on_set = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn origin(&self) -> Option<&Rc<str>> {
        self.origin.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub(crate) fn notify_get(&self, wrapper: &Wrapper, key: &PropKey) {
        if let Some(hook) = &self.on_get {
            hook(wrapper, key);
        }
    }

    pub(crate) fn notify_set(&self, wrapper: &Wrapper, key: &PropKey, value: &Slot) {
        if let Some(hook) = &self.on_set {
            hook(wrapper, key, value);
        }
    }
}

/// Restores the previous context on drop, including during unwinding.
pub(crate) struct ContextGuard<'a> {
    slot: &'a RefCell<Rc<ReadContext>>,
    previous: Option<Rc<ReadContext>>,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn install(slot: &'a RefCell<Rc<ReadContext>>, context: ReadContext) -> Self {
        let previous = slot.replace(Rc::new(context));
        Self {
            slot,
            previous: Some(previous),
        }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.slot.borrow_mut() = previous;
        }
    }
}

/// Counts in-progress reads; writes are refused while it is non-zero.
pub(crate) struct ReadGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> ReadGuard<'a> {
    pub(crate) fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}
