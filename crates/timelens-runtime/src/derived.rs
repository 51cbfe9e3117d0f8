#![forbid(unsafe_code)]

//! Memoized values derived from observed reads.
//!
//! # Design
//!
//! [`Derived<T>`] runs its compute function inside a read context whose
//! `on_get` hook collects every `(wrapper, key)` pair read. After each
//! computation it drops its old subscriptions and observes exactly the pairs
//! read this time, so dependencies are re-tracked on every recompute. Any
//! delivered change to a dependency marks the value dirty; the next
//! [`get()`](Derived::get) recomputes.
//!
//! # Invariants
//!
//! 1. The compute function runs only when the value is dirty (or has never
//!    been computed).
//! 2. `version` increments by exactly 1 per successful recomputation.
//! 3. The subscribed set equals the set of pairs read by the last successful
//!    computation.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the previous value and subscriptions stay
//!   in place and the dirty flag stays set, so the next `get()` retries.
//! - **Batched delivery**: a write marks the value dirty only once its change
//!   is delivered, i.e. after the pending tick runs.
//! - **Snapshot contexts**: a `Derived` always caches the live value. The
//!   compute function runs in a fresh read context, so a read made while a
//!   snapshot (or origin) is installed neither sees nor stores historical
//!   state. Read the underlying wrappers directly for historical values.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::context::ReadContext;
use crate::notifier::Subscription;
use crate::runtime::Runtime;
use crate::value::PropKey;
use crate::wrapper::Wrapper;

type Dependency = (Wrapper, PropKey);

struct DerivedState<T> {
    cached: Option<T>,
    version: u64,
    dependencies: Vec<Dependency>,
    _subscriptions: Vec<Subscription>,
}

/// A lazily evaluated value that tracks the properties it reads.
///
/// Cloning a `Derived` creates a new handle to the same state.
pub struct Derived<T> {
    runtime: Runtime,
    compute: Rc<dyn Fn() -> T>,
    dirty: Rc<Cell<bool>>,
    state: Rc<RefCell<DerivedState<T>>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            compute: Rc::clone(&self.compute),
            dirty: Rc::clone(&self.dirty),
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Derived")
            .field("cached", &state.cached)
            .field("dirty", &self.dirty.get())
            .field("version", &state.version)
            .field("dependencies", &state.dependencies.len())
            .finish()
    }
}

impl<T: 'static> Derived<T> {
    /// A derived value computed by `compute`. Nothing runs until the first
    /// read.
    pub fn new(runtime: &Runtime, compute: impl Fn() -> T + 'static) -> Self {
        Self {
            runtime: runtime.clone(),
            compute: Rc::new(compute),
            dirty: Rc::new(Cell::new(true)),
            state: Rc::new(RefCell::new(DerivedState {
                cached: None,
                version: 0,
                dependencies: Vec::new(),
                _subscriptions: Vec::new(),
            })),
        }
    }

    fn refresh(&self) {
        if !self.dirty.get() && self.state.borrow().cached.is_some() {
            return;
        }
        let reads: Rc<RefCell<IndexSet<Dependency>>> = Rc::default();
        let sink = Rc::clone(&reads);
        let context = ReadContext::new().on_get(move |wrapper, key| {
            sink.borrow_mut().insert((wrapper.clone(), key.clone()));
        });
        let compute = Rc::clone(&self.compute);
        let value = self.runtime.with_read_context(context, || compute());

        let dependencies: Vec<Dependency> = std::mem::take(&mut *reads.borrow_mut())
            .into_iter()
            .collect();
        let subscriptions = dependencies
            .iter()
            .map(|(wrapper, key)| {
                let dirty = Rc::clone(&self.dirty);
                self.runtime.observe(
                    wrapper,
                    std::slice::from_ref(key),
                    move |_| dirty.set(true),
                    None,
                )
            })
            .collect();

        let mut state = self.state.borrow_mut();
        state.cached = Some(value);
        state.version += 1;
        state.dependencies = dependencies;
        state._subscriptions = subscriptions;
        self.dirty.set(false);
        tracing::trace!(
            message = "derived.recompute",
            version = state.version,
            dependencies = state.dependencies.len()
        );
    }

    /// Run `f` on the current value, recomputing first if dirty.
    ///
    /// The value is always computed against live state, whatever read
    /// context the caller has installed.
    ///
    /// # Panics
    ///
    /// Panics if `f` reads this same `Derived` (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.refresh();
        let state = self.state.borrow();
        match &state.cached {
            Some(value) => f(value),
            None => unreachable!("refresh stores a value or unwinds"),
        }
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Force the next read to recompute.
    pub fn invalidate(&self) {
        self.dirty.set(true);
    }

    /// Number of successful computations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.borrow().version
    }

    /// The `(wrapper, key)` pairs read by the last computation.
    #[must_use]
    pub fn dependencies(&self) -> Vec<(Wrapper, PropKey)> {
        self.state.borrow().dependencies.clone()
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// The current value, recomputing first if dirty.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::config::{DeliveryMode, RuntimeConfig};
    use crate::target::Target;
    use crate::value::{Slot, Value};

    fn immediate() -> Runtime {
        Runtime::with_config(RuntimeConfig::default().with_delivery(DeliveryMode::Immediate))
    }

    fn int(w: &Wrapper, key: &str) -> i64 {
        w.get(key)
            .ok()
            .and_then(Slot::into_value)
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    }

    #[test]
    fn computes_lazily_and_memoizes() {
        let rt = immediate();
        let w = rt.wrap(&Target::record_from([("a", 2), ("b", 3)]));
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let reader = w.clone();
        let sum = Derived::new(&rt, move || {
            counter.set(counter.get() + 1);
            int(&reader, "a") + int(&reader, "b")
        });
        assert_eq!(runs.get(), 0);
        assert_eq!(sum.get(), 5);
        assert_eq!(sum.get(), 5);
        assert_eq!(runs.get(), 1);
        assert_eq!(sum.version(), 1);
    }

    #[test]
    fn tracked_write_marks_dirty() {
        let rt = immediate();
        let w = rt.wrap(&Target::record_from([("a", 2), ("b", 3)]));
        let reader = w.clone();
        let sum = Derived::new(&rt, move || int(&reader, "a") + int(&reader, "b"));
        assert_eq!(sum.get(), 5);
        assert_eq!(sum.dependencies().len(), 2);

        w.set("unrelated", 1).expect("write");
        assert!(!sum.is_dirty());

        w.set("a", 10).expect("write");
        assert!(sum.is_dirty());
        assert_eq!(sum.get(), 13);
        assert_eq!(sum.version(), 2);
    }

    #[test]
    fn dependencies_are_retracked() {
        let rt = immediate();
        let w = rt.wrap(&Target::record_from([("flag", 1), ("x", 10), ("y", 20)]));
        let reader = w.clone();
        let pick = Derived::new(&rt, move || {
            if int(&reader, "flag") == 1 {
                int(&reader, "x")
            } else {
                int(&reader, "y")
            }
        });
        assert_eq!(pick.get(), 10);
        w.set("flag", 0).expect("write");
        assert_eq!(pick.get(), 20);
        assert!(!rt.active_observers(&w, &["y".into()]).is_empty());
        assert!(rt.active_observers(&w, &["x".into()]).is_empty());

        w.set("x", 99).expect("write");
        assert!(!pick.is_dirty());
    }

    #[test]
    fn batched_changes_mark_dirty_after_the_tick() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::sequence([Value::Int(1)]));
        let reader = w.clone();
        let len = Derived::new(&rt, move || reader.len().unwrap_or(0));
        assert_eq!(len.get(), 1);
        w.push([Value::Int(2)]).expect("push");
        assert!(!len.is_dirty());
        rt.run_pending();
        assert!(len.is_dirty());
        assert_eq!(len.get(), 2);
    }

    #[test]
    fn panicking_compute_stays_dirty() {
        let rt = immediate();
        let fail = Rc::new(Cell::new(true));
        let flag = Rc::clone(&fail);
        let d = Derived::new(&rt, move || {
            assert!(!flag.get(), "compute failed");
            7
        });
        assert!(catch_unwind(AssertUnwindSafe(|| d.get())).is_err());
        assert!(d.is_dirty());
        assert_eq!(d.version(), 0);
        fail.set(false);
        assert_eq!(d.get(), 7);
        assert!(d.dependencies().is_empty());
        assert_eq!(rt.read_context().origin(), None);
    }

    #[test]
    fn reads_inside_a_snapshot_context_compute_live_state() {
        let rt = immediate();
        let w = rt.wrap(&Target::record_from([("a", 1)]));
        let reader = w.clone();
        let a = Derived::new(&rt, move || int(&reader, "a"));
        let before = rt.create_snapshot();
        w.set("a", 2).expect("write");

        let (historical, derived) =
            rt.with_read_context(ReadContext::new().with_snapshot(before), || {
                (int(&w, "a"), a.get())
            });
        assert_eq!(historical, 1);
        assert_eq!(derived, 2);
        assert_eq!(a.get(), 2);
        assert_eq!(a.version(), 1);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let rt = immediate();
        let d = Derived::new(&rt, || 1);
        assert_eq!(d.get(), 1);
        d.invalidate();
        assert!(d.is_dirty());
        assert_eq!(d.get(), 1);
        assert_eq!(d.version(), 2);
    }
}
