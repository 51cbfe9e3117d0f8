#![forbid(unsafe_code)]

//! Change notification: the observer registry and batched delivery.
//!
//! Observers subscribe to a (target, key path) pair. Changes are published as
//! [`Change`] records and dispatched to the observers of
//! `(change.target, [change.property])`.
//!
//! # Invariants
//!
//! 1. A key path with no remaining observers is pruned from the registry
//!    immediately, and a target with no observers at all is dropped.
//! 2. Dispatch iterates a copy of the observer list, so callbacks may
//!    subscribe or unsubscribe freely.
//! 3. Within one flush, changes for the same (target, property) pair reach
//!    each observer in a single invocation, in the order they were raised.
//! 4. The pending queue is captured and cleared before dispatch; changes
//!    raised by callbacks land in a fresh queue and a fresh flush.
//! 5. Queued changes hold their wrapper weakly. Changes to a wrapper dropped
//!    before the flush are discarded; nobody can be observing it.
//!
//! # Failure Modes
//!
//! - **Callback panics**: with panic isolation enabled the panic is caught,
//!   logged at `warn`, and delivery continues with the next observer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use indexmap::IndexMap;
use timelens_core::KeyIndex;

use crate::target::TargetId;
use crate::value::{PropKey, Slot};
use crate::wrapper::{Wrapper, WrapperInner};

/// One elementary mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Wrapper of the mutated target.
    pub target: Wrapper,
    /// Property that changed.
    pub property: PropKey,
    /// Value before the mutation.
    pub old: Slot,
    /// Value after the mutation.
    pub new: Slot,
    /// Origin tag of the context that made the change.
    pub origin: Option<Rc<str>>,
}

/// Public description of a registered observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverInfo {
    /// Registry-unique observer id.
    pub id: u64,
    /// Origin tag given at subscription time.
    pub origin: Option<Rc<str>>,
}

/// Observer set change reported to monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserversChange {
    Added(ObserverInfo),
    Removed(ObserverInfo),
}

/// Callback receiving the grouped changes for one (target, property) pair.
pub type ChangeCallback = dyn Fn(&[Change]);
/// Callback receiving observer additions and removals for one target.
pub type MonitorCallback = dyn Fn(&Wrapper, &ObserversChange);

/// RAII guard for a registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct Observer {
    info: ObserverInfo,
    callback: Box<ChangeCallback>,
}

struct Monitor {
    id: u64,
    callback: Box<MonitorCallback>,
}

type ObserverList = Vec<Rc<Observer>>;

/// Registry path segment. Observer lists sit under a terminal
/// [`Segment::Observers`], so a path and its extensions never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Key(PropKey),
    Observers,
}

fn prefix_segments(path: &[PropKey]) -> Vec<Segment> {
    path.iter().cloned().map(Segment::Key).collect()
}

fn observer_segments(path: &[PropKey]) -> Vec<Segment> {
    let mut segments = prefix_segments(path);
    segments.push(Segment::Observers);
    segments
}

/// A change waiting for the next flush.
struct Queued {
    wrapper: Weak<WrapperInner>,
    property: PropKey,
    old: Slot,
    new: Slot,
    origin: Option<Rc<str>>,
}

impl Queued {
    fn new(change: Change) -> Self {
        Self {
            wrapper: change.target.downgrade(),
            property: change.property,
            old: change.old,
            new: change.new,
            origin: change.origin,
        }
    }

    fn revive(self) -> Option<Change> {
        let inner = self.wrapper.upgrade()?;
        Some(Change {
            target: Wrapper::from_inner(inner),
            property: self.property,
            old: self.old,
            new: self.new,
            origin: self.origin,
        })
    }
}

/// Observer registry plus the pending change queue.
pub(crate) struct Notifier {
    registry: RefCell<AHashMap<TargetId, KeyIndex<Segment, ObserverList>>>,
    monitors: RefCell<AHashMap<TargetId, Vec<Rc<Monitor>>>>,
    queue: RefCell<Vec<Queued>>,
    flush_scheduled: Cell<bool>,
    next_id: Cell<u64>,
    isolate_panics: bool,
}

impl Notifier {
    pub(crate) fn new(isolate_panics: bool) -> Self {
        Self {
            registry: RefCell::new(AHashMap::new()),
            monitors: RefCell::new(AHashMap::new()),
            queue: RefCell::new(Vec::new()),
            flush_scheduled: Cell::new(false),
            next_id: Cell::new(1),
            isolate_panics,
        }
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    // -- Registry -----------------------------------------------------------

    pub(crate) fn subscribe(
        &self,
        wrapper: &Wrapper,
        path: &[PropKey],
        callback: impl Fn(&[Change]) + 'static,
        origin: Option<Rc<str>>,
    ) -> ObserverInfo {
        let info = ObserverInfo {
            id: self.allocate_id(),
            origin,
        };
        let observer = Rc::new(Observer {
            info: info.clone(),
            callback: Box::new(callback),
        });
        {
            let key = observer_segments(path);
            let mut registry = self.registry.borrow_mut();
            let index = registry.entry(wrapper.id()).or_default();
            match index.get_mut(&key) {
                Some(list) => list.push(observer),
                None => {
                    index.set(&key, vec![observer]);
                }
            }
        }
        self.observers_changed(wrapper, &ObserversChange::Added(info.clone()));
        info
    }

    /// Remove an observer. Unknown ids are ignored.
    pub(crate) fn unsubscribe(&self, wrapper: &Wrapper, path: &[PropKey], id: u64) {
        let removed = {
            let key = observer_segments(path);
            let mut registry = self.registry.borrow_mut();
            let Some(index) = registry.get_mut(&wrapper.id()) else {
                return;
            };
            let Some(list) = index.get_mut(&key) else {
                return;
            };
            let Some(pos) = list.iter().position(|o| o.info.id == id) else {
                return;
            };
            let removed = list.remove(pos);
            if list.is_empty() {
                index.delete(&key);
            }
            if index.is_empty() {
                registry.remove(&wrapper.id());
            }
            removed
        };
        self.observers_changed(wrapper, &ObserversChange::Removed(removed.info.clone()));
    }

    pub(crate) fn observers(&self, id: TargetId, path: &[PropKey]) -> Vec<ObserverInfo> {
        self.observer_list(id, path)
            .iter()
            .map(|o| o.info.clone())
            .collect()
    }

    /// Keys one level below `path` that lead to at least one observer.
    pub(crate) fn observed_properties(&self, id: TargetId, path: &[PropKey]) -> Vec<PropKey> {
        let registry = self.registry.borrow();
        let Some(index) = registry.get(&id) else {
            return Vec::new();
        };
        index
            .keys(&prefix_segments(path))
            .filter_map(|segment| match segment {
                Segment::Key(key) => Some(key.clone()),
                Segment::Observers => None,
            })
            .collect()
    }

    pub(crate) fn has_observers(&self, id: TargetId) -> bool {
        self.registry.borrow().contains_key(&id)
    }

    fn observer_list(&self, id: TargetId, path: &[PropKey]) -> ObserverList {
        self.registry
            .borrow()
            .get(&id)
            .and_then(|index| index.get(&observer_segments(path)))
            .cloned()
            .unwrap_or_default()
    }

    // -- Monitors -----------------------------------------------------------

    pub(crate) fn add_monitor(
        &self,
        id: TargetId,
        callback: impl Fn(&Wrapper, &ObserversChange) + 'static,
    ) -> u64 {
        let monitor = Rc::new(Monitor {
            id: self.allocate_id(),
            callback: Box::new(callback),
        });
        let monitor_id = monitor.id;
        self.monitors.borrow_mut().entry(id).or_default().push(monitor);
        monitor_id
    }

    pub(crate) fn remove_monitor(&self, id: TargetId, monitor_id: u64) {
        let mut monitors = self.monitors.borrow_mut();
        if let Some(list) = monitors.get_mut(&id) {
            list.retain(|m| m.id != monitor_id);
            if list.is_empty() {
                monitors.remove(&id);
            }
        }
    }

    fn observers_changed(&self, wrapper: &Wrapper, change: &ObserversChange) {
        let monitors: Vec<Rc<Monitor>> = self
            .monitors
            .borrow()
            .get(&wrapper.id())
            .cloned()
            .unwrap_or_default();
        for monitor in monitors {
            self.invoke(monitor.id, &PropKey::OwnKeys, || {
                (monitor.callback)(wrapper, change)
            });
        }
    }

    // -- Delivery -----------------------------------------------------------

    /// Queue changes. Returns `true` when the caller must schedule a flush.
    pub(crate) fn enqueue(&self, changes: Vec<Change>) -> bool {
        if changes.is_empty() {
            return false;
        }
        self.queue
            .borrow_mut()
            .extend(changes.into_iter().map(Queued::new));
        !self.flush_scheduled.replace(true)
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Deliver one change per callback invocation, synchronously.
    pub(crate) fn deliver_immediate(&self, changes: Vec<Change>) {
        for change in changes {
            let property = change.property.clone();
            let target = change.target.id();
            self.dispatch(target, &property, std::slice::from_ref(&change));
        }
    }

    /// Drain the queue and deliver grouped by (target, property).
    pub(crate) fn flush(&self) {
        let queued = std::mem::take(&mut *self.queue.borrow_mut());
        self.flush_scheduled.set(false);
        if queued.is_empty() {
            return;
        }
        let total = queued.len();
        let mut groups: IndexMap<(TargetId, PropKey), Vec<Change>> = IndexMap::new();
        for change in queued.into_iter().filter_map(Queued::revive) {
            groups
                .entry((change.target.id(), change.property.clone()))
                .or_default()
                .push(change);
        }
        tracing::debug!(message = "notifier.flush", changes = total, groups = groups.len());
        for ((target, property), group) in &groups {
            self.dispatch(*target, property, group);
        }
    }

    fn dispatch(&self, target: TargetId, property: &PropKey, changes: &[Change]) {
        let observers = self.observer_list(target, std::slice::from_ref(property));
        for observer in observers {
            self.invoke(observer.info.id, property, || (observer.callback)(changes));
        }
    }

    fn invoke(&self, observer: u64, property: &PropKey, f: impl FnOnce()) {
        if !self.isolate_panics {
            f();
            return;
        }
        if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
            tracing::warn!(
                message = "notifier.callback_panic",
                observer,
                property = %property
            );
        }
    }
}
