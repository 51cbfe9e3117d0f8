#![forbid(unsafe_code)]

//! The runtime service.
//!
//! A [`Runtime`] owns every piece of process-wide state: the target to
//! wrapper table, the observer registry, the snapshot chain, snapshot
//! exclusions, the active read context, the read-depth guard and the tick
//! queue used for batched delivery. Runtimes are independent; tests build
//! one each.
//!
//! # Ticks
//!
//! Batched delivery is cooperative. Publishing the first change of a tick
//! queues exactly one flush task; [`Runtime::run_pending`] (or
//! [`Runtime::tick`]) runs queued tasks until none remain, including flushes
//! queued by callbacks during an earlier flush.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use timelens_core::{Error, Result};

use crate::config::{DeliveryMode, RuntimeConfig};
use crate::context::{ContextGuard, ReadContext, ReadGuard};
use crate::notifier::{Change, Notifier, ObserverInfo, ObserversChange, Subscription};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::target::{Kind, Target, TargetId};
use crate::value::{PropKey, Slot, Value};
use crate::wrapper::{Wrapper, WrapperInner};

type Task = Box<dyn FnOnce()>;

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    default_origin: Option<Rc<str>>,
    wrappers: RefCell<AHashMap<TargetId, Weak<WrapperInner>>>,
    excluded: RefCell<AHashSet<TargetId>>,
    notifier: Notifier,
    snapshots: SnapshotStore,
    context: RefCell<Rc<ReadContext>>,
    read_depth: Cell<usize>,
    tasks: RefCell<VecDeque<Task>>,
}

/// Handle to the observation runtime. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("wrappers", &self.inner.wrappers.borrow().len())
            .field("pending_changes", &self.pending_changes())
            .field("pending_tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

impl Runtime {
    /// Runtime with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Runtime with an explicit configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let default_origin = config.default_origin.as_deref().map(Rc::from);
        Self {
            inner: Rc::new(RuntimeInner {
                notifier: Notifier::new(config.isolate_callback_panics),
                snapshots: SnapshotStore::new(),
                default_origin,
                config,
                wrappers: RefCell::new(AHashMap::new()),
                excluded: RefCell::new(AHashSet::new()),
                context: RefCell::new(Rc::new(ReadContext::new())),
                read_depth: Cell::new(0),
                tasks: RefCell::new(VecDeque::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    // ── Interception ────────────────────────────────────────────────────

    /// The unique wrapper for `target`, created on first use.
    pub fn wrap(&self, target: &Target) -> Wrapper {
        let id = target.id();
        let existing = self
            .inner
            .wrappers
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade);
        if let Some(inner) = existing {
            return Wrapper::from_inner(inner);
        }
        let wrapper = Wrapper::new(target.clone(), self.clone());
        self.inner
            .wrappers
            .borrow_mut()
            .insert(id, wrapper.downgrade());
        wrapper
    }

    /// Wrap an arbitrary value.
    ///
    /// Fails with [`Error::AlreadyWrapped`] for wrappers and
    /// [`Error::NotObservable`] for scalars.
    pub fn wrap_value(&self, value: &Value) -> Result<Wrapper> {
        match value {
            Value::Target(target) => Ok(self.wrap(target)),
            Value::Wrapper(_) => Err(Error::AlreadyWrapped),
            _ => Err(Error::NotObservable),
        }
    }

    /// Require `value` to be a wrapper.
    pub fn as_wrapper(&self, value: &Value) -> Result<Wrapper> {
        match value {
            Value::Wrapper(wrapper) => Ok(wrapper.clone()),
            _ => Err(Error::NotAWrapper),
        }
    }

    /// The raw target behind `wrapper`.
    #[must_use]
    pub fn unwrap(&self, wrapper: &Wrapper) -> Target {
        wrapper.target().clone()
    }

    /// Whether `value` is a wrapper.
    #[must_use]
    pub fn is_wrapped(&self, value: &Value) -> bool {
        matches!(value, Value::Wrapper(_))
    }

    /// Number of live wrappers in this runtime.
    #[must_use]
    pub fn wrapper_count(&self) -> usize {
        self.inner
            .wrappers
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn forget_wrapper(&self, id: TargetId) {
        if let Ok(mut table) = self.inner.wrappers.try_borrow_mut()
            && table.get(&id).is_some_and(|w| w.strong_count() == 0)
        {
            table.remove(&id);
        }
    }

    /// Replace a raw callable target read out of a container with its wrapper.
    pub(crate) fn wrap_nested(&self, value: Value) -> Value {
        match value {
            Value::Target(target) if target.kind() == Kind::Callable => {
                Value::Wrapper(self.wrap(&target))
            }
            other => other,
        }
    }

    // ── Observation ─────────────────────────────────────────────────────

    /// Subscribe `callback` to changes of `path` on `wrapper`.
    ///
    /// Changes are matched on `[change.property]`, so single-key paths are
    /// the useful ones; longer paths still register and show up in
    /// introspection.
    pub fn observe(
        &self,
        wrapper: &Wrapper,
        path: &[PropKey],
        callback: impl Fn(&[Change]) + 'static,
        origin: Option<&str>,
    ) -> Subscription {
        let info = self
            .inner
            .notifier
            .subscribe(wrapper, path, callback, origin.map(Rc::from));
        let weak = Rc::downgrade(&self.inner);
        let wrapper = wrapper.clone();
        let path = path.to_vec();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.notifier.unsubscribe(&wrapper, &path, info.id);
            }
        })
    }

    /// [`observe`](Self::observe) for an arbitrary value.
    pub fn observe_value(
        &self,
        value: &Value,
        path: &[PropKey],
        callback: impl Fn(&[Change]) + 'static,
        origin: Option<&str>,
    ) -> Result<Subscription> {
        match value {
            Value::Wrapper(wrapper) => Ok(self.observe(wrapper, path, callback, origin)),
            _ => Err(Error::CannotObserve),
        }
    }

    /// Observers registered at exactly `path`.
    #[must_use]
    pub fn active_observers(&self, wrapper: &Wrapper, path: &[PropKey]) -> Vec<ObserverInfo> {
        self.inner.notifier.observers(wrapper.id(), path)
    }

    /// Keys directly under `path` that have observers (or deeper paths).
    #[must_use]
    pub fn observed_properties(&self, wrapper: &Wrapper, path: &[PropKey]) -> Vec<PropKey> {
        self.inner.notifier.observed_properties(wrapper.id(), path)
    }

    /// Whether any observer is registered for `wrapper`.
    #[must_use]
    pub fn is_observed(&self, wrapper: &Wrapper) -> bool {
        self.inner.notifier.has_observers(wrapper.id())
    }

    /// Watch observer additions and removals on `wrapper`.
    pub fn monitor_observers(
        &self,
        wrapper: &Wrapper,
        callback: impl Fn(&Wrapper, &ObserversChange) + 'static,
    ) -> Subscription {
        let id = wrapper.id();
        let monitor = self.inner.notifier.add_monitor(id, callback);
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.notifier.remove_monitor(id, monitor);
            }
        })
    }

    /// [`monitor_observers`](Self::monitor_observers) for an arbitrary value.
    pub fn monitor_observers_value(
        &self,
        value: &Value,
        callback: impl Fn(&Wrapper, &ObserversChange) + 'static,
    ) -> Result<Subscription> {
        match value {
            Value::Wrapper(wrapper) => Ok(self.monitor_observers(wrapper, callback)),
            _ => Err(Error::CannotMonitor),
        }
    }

    // ── Read contexts ───────────────────────────────────────────────────

    /// Run `f` with `context` installed, restoring the previous context
    /// afterwards (also when `f` panics).
    pub fn with_read_context<R>(&self, context: ReadContext, f: impl FnOnce() -> R) -> R {
        let _guard = ContextGuard::install(&self.inner.context, context);
        f()
    }

    /// The active read context.
    #[must_use]
    pub fn read_context(&self) -> Rc<ReadContext> {
        Rc::clone(&self.inner.context.borrow())
    }

    /// Whether a read is in progress.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.inner.read_depth.get() > 0
    }

    /// Run a tracked read of `tracked` on `wrapper`.
    ///
    /// `f` receives the snapshot to read through, if any. The read-depth
    /// guard is held for the whole read, including the `on_get` hook.
    pub(crate) fn read<T>(
        &self,
        wrapper: &Wrapper,
        tracked: &PropKey,
        f: impl FnOnce(Option<&Snapshot>) -> Result<T>,
    ) -> Result<T> {
        let context = self.read_context();
        let _guard = ReadGuard::enter(&self.inner.read_depth);
        let value = f(context.snapshot())?;
        context.notify_get(wrapper, tracked);
        Ok(value)
    }

    /// Check the write guards and return the context the write runs in.
    pub(crate) fn begin_write(&self) -> Result<Rc<ReadContext>> {
        let context = self.read_context();
        if context.snapshot().is_some() {
            return Err(Error::ReadOnlyContext);
        }
        if self.is_reading() {
            return Err(Error::SideEffectInGetter);
        }
        Ok(context)
    }

    pub(crate) fn origin_for(&self, context: &ReadContext) -> Option<Rc<str>> {
        context
            .origin()
            .cloned()
            .or_else(|| self.inner.default_origin.clone())
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    /// A snapshot of the current state.
    ///
    /// Returns the newest snapshot again if nothing was recorded into it.
    pub fn create_snapshot(&self) -> Snapshot {
        self.inner.snapshots.create()
    }

    /// The newest snapshot, if anyone still holds it.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.inner.snapshots.latest()
    }

    /// Call `callback` whenever a new snapshot is created.
    pub fn monitor_snapshot_creation(&self, callback: impl Fn(&Snapshot) + 'static) -> Subscription {
        let id = self.inner.snapshots.add_monitor(callback);
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.snapshots.remove_monitor(id);
            }
        })
    }

    /// Stop recording history for `target`. Notifications continue.
    pub fn exclude_from_snapshotting(&self, target: &Target) {
        self.inner.excluded.borrow_mut().insert(target.id());
    }

    #[must_use]
    pub fn is_excluded(&self, target: &Target) -> bool {
        self.inner.excluded.borrow().contains(&target.id())
    }

    pub(crate) fn record_first_write(&self, wrapper: &Wrapper, path: &[PropKey], old: &Slot) {
        if self.inner.excluded.borrow().contains(&wrapper.id()) {
            return;
        }
        self.inner
            .snapshots
            .record_first_write(wrapper, path, old.clone());
    }

    // ── Delivery ────────────────────────────────────────────────────────

    pub(crate) fn publish(&self, changes: Vec<Change>) {
        match self.inner.config.delivery {
            DeliveryMode::Immediate => self.inner.notifier.deliver_immediate(changes),
            DeliveryMode::Batched => {
                if self.inner.notifier.enqueue(changes) {
                    let weak = Rc::downgrade(&self.inner);
                    self.defer(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.notifier.flush();
                        }
                    });
                }
            }
        }
    }

    /// Queue `task` to run on the next [`run_pending`](Self::run_pending).
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run queued tasks until the queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.tasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Run `f` as one tick: everything it publishes is delivered before
    /// `tick` returns.
    pub fn tick<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = f();
        self.run_pending();
        result
    }

    /// Changes queued for the next flush.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.inner.notifier.pending()
    }
}
