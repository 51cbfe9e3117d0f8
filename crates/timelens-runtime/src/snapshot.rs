#![forbid(unsafe_code)]

//! Copy-on-write snapshots of the whole object graph.
//!
//! # Design
//!
//! Every [`Snapshot`] records, per (target, key path), the value that path
//! held *before* the first mutation made after the snapshot was created.
//! Snapshots form a forward-linked chain ordered by creation: each one only
//! knows its successor. Reading path `P` of target `T` through snapshot `S`:
//!
//! 1. walk the global chain from `S` to the first snapshot that touched `T`,
//!    yielding that target's [`TargetSnapshot`];
//! 2. walk the per-target chain from there to the first diff set that
//!    recorded `P`;
//! 3. if nothing recorded `P`, the live value applies.
//!
//! # Invariants
//!
//! 1. Once written, a recorded diff never changes (first write wins).
//! 2. Creating a snapshot only fills in its predecessor's forward link.
//! 3. The store holds only weak references: a snapshot lives exactly as long
//!    as someone outside holds it (or an older, still-held snapshot links to
//!    it).
//! 4. If the newest snapshot has recorded nothing yet, `create` returns it
//!    again instead of growing the chain.
//!
//! # Failure Modes
//!
//! - **No live snapshot**: writes record nothing; history only exists while
//!   someone holds a snapshot.
//! - **Very long chains**: dropping the head releases links iteratively, so
//!   chain length is not bounded by stack depth.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use timelens_core::KeyIndex;

use crate::target::TargetId;
use crate::value::{PropKey, Slot};
use crate::wrapper::Wrapper;

// ---------------------------------------------------------------------------
// Per-target diff sets
// ---------------------------------------------------------------------------

struct TargetSnapshotInner {
    id: u64,
    values: RefCell<KeyIndex<PropKey, Slot>>,
    size: Cell<usize>,
    next: RefCell<Option<TargetSnapshot>>,
}

impl Drop for TargetSnapshotInner {
    fn drop(&mut self) {
        let mut next = self.next.get_mut().take();
        while let Some(link) = next {
            match Rc::try_unwrap(link.0) {
                Ok(mut inner) => next = inner.next.get_mut().take(),
                Err(_) => break,
            }
        }
    }
}

/// Diff set of a single target, chained per target.
#[derive(Clone)]
pub struct TargetSnapshot(Rc<TargetSnapshotInner>);

impl fmt::Debug for TargetSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSnapshot")
            .field("id", &self.0.id)
            .field("size", &self.0.size.get())
            .finish()
    }
}

impl PartialEq for TargetSnapshot {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl TargetSnapshot {
    fn new(id: u64) -> Self {
        Self(Rc::new(TargetSnapshotInner {
            id,
            values: RefCell::new(KeyIndex::new()),
            size: Cell::new(0),
            next: RefCell::new(None),
        }))
    }

    /// Per-target sequence number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The next diff set for the same target, if one was created.
    #[must_use]
    pub fn next(&self) -> Option<TargetSnapshot> {
        self.0.next.borrow().clone()
    }

    /// Number of recorded paths in this diff set alone.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.size.get()
    }

    /// Copy of the recorded diffs of this diff set alone.
    #[must_use]
    pub fn recorded(&self) -> KeyIndex<PropKey, Slot> {
        self.0.values.borrow().clone()
    }

    fn record(&self, path: &[PropKey], old: Slot) -> bool {
        let mut values = self.0.values.borrow_mut();
        if values.has(path) {
            return false;
        }
        values.set(path, old);
        self.0.size.set(self.0.size.get() + 1);
        true
    }

    /// Iterate this diff set and its successors, stopping before `stop`.
    fn chain(&self, stop: Option<&TargetSnapshot>) -> impl Iterator<Item = TargetSnapshot> {
        let stop = stop.cloned();
        std::iter::successors(Some(self.clone()), TargetSnapshot::next)
            .take_while(move |snap| stop.as_ref() != Some(snap))
    }

    /// Recorded value at `path`, walking toward newer diff sets. `None` when
    /// no diff set before `stop` recorded it.
    #[must_use]
    pub fn get(&self, path: &[PropKey], stop: Option<&TargetSnapshot>) -> Option<Slot> {
        self.chain(stop)
            .find_map(|snap| snap.0.values.borrow().get(path).cloned())
    }

    /// Whether `path` was present, if recorded.
    #[must_use]
    pub fn has(&self, path: &[PropKey], stop: Option<&TargetSnapshot>) -> Option<bool> {
        self.get(path, stop).map(|slot| slot.is_present())
    }

    /// Union of recorded child keys under `path` across the chain.
    #[must_use]
    pub fn keys(&self, path: &[PropKey], stop: Option<&TargetSnapshot>) -> Vec<PropKey> {
        let mut keys = IndexSet::new();
        for snap in self.chain(stop) {
            keys.extend(snap.0.values.borrow().keys(path).cloned());
        }
        keys.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Global snapshots
// ---------------------------------------------------------------------------

struct SnapshotInner {
    id: u64,
    targets: RefCell<IndexMap<TargetId, (Wrapper, TargetSnapshot)>>,
    size: Cell<usize>,
    next: RefCell<Option<Snapshot>>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        let mut next = self.next.get_mut().take();
        while let Some(link) = next {
            match Rc::try_unwrap(link.0) {
                Ok(mut inner) => next = inner.next.get_mut().take(),
                Err(_) => break,
            }
        }
    }
}

/// Point-in-time view of every target.
///
/// Cloning yields another handle to the same snapshot; holding any handle
/// keeps the snapshot (and every newer one) alive.
#[derive(Clone)]
pub struct Snapshot(Rc<SnapshotInner>);

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.0.id)
            .field("size", &self.0.size.get())
            .field("targets", &self.0.targets.borrow().len())
            .finish()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Snapshot {}

impl Snapshot {
    fn new(id: u64) -> Self {
        Self(Rc::new(SnapshotInner {
            id,
            targets: RefCell::new(IndexMap::new()),
            size: Cell::new(0),
            next: RefCell::new(None),
        }))
    }

    /// Creation sequence number; newer snapshots have larger ids.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The snapshot created after this one, if any.
    #[must_use]
    pub fn next(&self) -> Option<Snapshot> {
        self.0.next.borrow().clone()
    }

    /// Number of diffs recorded into this snapshot.
    #[must_use]
    pub fn diff_size(&self) -> usize {
        self.0.size.get()
    }

    fn chain(&self, stop: Option<&Snapshot>) -> impl Iterator<Item = Snapshot> {
        let stop = stop.cloned();
        std::iter::successors(Some(self.clone()), Snapshot::next)
            .take_while(move |snap| stop.as_ref() != Some(snap))
    }

    /// Diff set for `wrapper`: the one attached to the first snapshot, from
    /// this one up to `stop`, that touched it.
    #[must_use]
    pub fn target_snapshot(&self, wrapper: &Wrapper, stop: Option<&Snapshot>) -> Option<TargetSnapshot> {
        let id = wrapper.id();
        self.chain(stop)
            .find_map(|snap| snap.0.targets.borrow().get(&id).map(|(_, ts)| ts.clone()))
    }

    /// Every target touched from this snapshot up to `stop`.
    #[must_use]
    pub fn touched_targets(&self, stop: Option<&Snapshot>) -> Vec<Wrapper> {
        let mut touched: IndexMap<TargetId, Wrapper> = IndexMap::new();
        for snap in self.chain(stop) {
            for (id, (wrapper, _)) in snap.0.targets.borrow().iter() {
                touched.entry(*id).or_insert_with(|| wrapper.clone());
            }
        }
        touched.into_values().collect()
    }

    /// Value of `path` as of this snapshot. `None` means nothing was recorded
    /// and the live value applies.
    #[must_use]
    pub fn get(&self, wrapper: &Wrapper, path: &[PropKey]) -> Option<Slot> {
        self.target_snapshot(wrapper, None)?.get(path, None)
    }

    /// Value of `path` as of this snapshot, considering only changes recorded
    /// before `stop` was created.
    #[must_use]
    pub fn get_until(&self, wrapper: &Wrapper, path: &[PropKey], stop: &Snapshot) -> Option<Slot> {
        let ts = self.target_snapshot(wrapper, Some(stop))?;
        let stop_ts = stop.target_snapshot(wrapper, None);
        ts.get(path, stop_ts.as_ref())
    }

    /// Value of `path` as of this snapshot, falling back to `live`.
    pub fn get_or_live(&self, wrapper: &Wrapper, path: &[PropKey], live: impl FnOnce() -> Slot) -> Slot {
        self.get(wrapper, path).unwrap_or_else(live)
    }

    /// Whether `path` existed as of this snapshot, falling back to `live`.
    pub fn has(&self, wrapper: &Wrapper, path: &[PropKey], live: impl FnOnce() -> bool) -> bool {
        self.target_snapshot(wrapper, None)
            .and_then(|ts| ts.has(path, None))
            .unwrap_or_else(live)
    }

    /// Recorded child keys under `path` for `wrapper`, up to `stop`.
    #[must_use]
    pub fn keys(&self, wrapper: &Wrapper, path: &[PropKey], stop: Option<&Snapshot>) -> Vec<PropKey> {
        let Some(ts) = self.target_snapshot(wrapper, stop) else {
            return Vec::new();
        };
        let stop_ts = stop.and_then(|s| s.target_snapshot(wrapper, None));
        ts.keys(path, stop_ts.as_ref())
    }

    fn record(&self, store: &SnapshotStore, wrapper: &Wrapper, path: &[PropKey], old: Slot) -> bool {
        let id = wrapper.id();
        let ts = {
            let mut targets = self.0.targets.borrow_mut();
            match targets.get(&id) {
                Some((_, ts)) => ts.clone(),
                None => {
                    let ts = store.create_target_snapshot(id);
                    targets.insert(id, (wrapper.clone(), ts.clone()));
                    ts
                }
            }
        };
        if ts.record(path, old) {
            self.0.size.set(self.0.size.get() + 1);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

type SnapshotMonitor = Rc<dyn Fn(&Snapshot)>;

/// Owner of the snapshot chain heads. Holds only weak references.
pub(crate) struct SnapshotStore {
    latest: RefCell<Weak<SnapshotInner>>,
    latest_id: Cell<u64>,
    target_latest: RefCell<AHashMap<TargetId, (u64, Weak<TargetSnapshotInner>)>>,
    monitors: RefCell<IndexMap<u64, SnapshotMonitor>>,
    next_monitor: Cell<u64>,
}

impl SnapshotStore {
    pub(crate) fn new() -> Self {
        Self {
            latest: RefCell::new(Weak::new()),
            latest_id: Cell::new(0),
            target_latest: RefCell::new(AHashMap::new()),
            monitors: RefCell::new(IndexMap::new()),
            next_monitor: Cell::new(1),
        }
    }

    pub(crate) fn latest(&self) -> Option<Snapshot> {
        self.latest.borrow().upgrade().map(Snapshot)
    }

    pub(crate) fn create(&self) -> Snapshot {
        let previous = self.latest();
        if let Some(latest) = &previous
            && latest.diff_size() == 0
        {
            return latest.clone();
        }
        let id = self.latest_id.get() + 1;
        self.latest_id.set(id);
        let snapshot = Snapshot::new(id);
        if let Some(previous) = &previous {
            *previous.0.next.borrow_mut() = Some(snapshot.clone());
        }
        *self.latest.borrow_mut() = Rc::downgrade(&snapshot.0);
        tracing::debug!(
            message = "snapshot.create",
            id,
            previous = ?previous.as_ref().map(Snapshot::id)
        );

        let monitors: Vec<SnapshotMonitor> = self.monitors.borrow().values().cloned().collect();
        for monitor in monitors {
            monitor(&snapshot);
        }
        snapshot
    }

    fn create_target_snapshot(&self, target: TargetId) -> TargetSnapshot {
        let mut latest = self.target_latest.borrow_mut();
        let (last_id, previous) = match latest.get(&target) {
            Some((last_id, weak)) => (*last_id, weak.upgrade().map(TargetSnapshot)),
            None => (0, None),
        };
        if let Some(previous) = &previous
            && previous.size() == 0
        {
            return previous.clone();
        }
        let ts = TargetSnapshot::new(last_id + 1);
        if let Some(previous) = previous {
            *previous.0.next.borrow_mut() = Some(ts.clone());
        }
        latest.insert(target, (ts.id(), Rc::downgrade(&ts.0)));
        ts
    }

    /// Record the pre-mutation value into the newest live snapshot.
    pub(crate) fn record_first_write(&self, wrapper: &Wrapper, path: &[PropKey], old: Slot) -> bool {
        let Some(latest) = self.latest() else {
            return false;
        };
        let recorded = latest.record(self, wrapper, path, old);
        if recorded {
            tracing::trace!(
                message = "snapshot.record",
                snapshot = latest.id(),
                target = %wrapper.id(),
                path = ?path
            );
        }
        recorded
    }

    pub(crate) fn add_monitor(&self, callback: impl Fn(&Snapshot) + 'static) -> u64 {
        let id = self.next_monitor.get();
        self.next_monitor.set(id + 1);
        self.monitors.borrow_mut().insert(id, Rc::new(callback));
        id
    }

    pub(crate) fn remove_monitor(&self, id: u64) {
        self.monitors.borrow_mut().shift_remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::target::Target;
    use crate::value::Value;

    fn slot(n: i64) -> Slot {
        Slot::Present(Value::Int(n))
    }

    fn key(name: &str) -> Vec<PropKey> {
        vec![PropKey::from(name)]
    }

    #[test]
    fn create_reuses_empty_latest() {
        let store = SnapshotStore::new();
        let a = store.create();
        let b = store.create();
        assert_eq!(a, b);
        assert_eq!(a.id(), 1);
    }

    #[test]
    fn store_does_not_keep_snapshots_alive() {
        let store = SnapshotStore::new();
        let a = store.create();
        drop(a);
        assert!(store.latest().is_none());
        assert_eq!(store.create().id(), 2);
    }

    #[test]
    fn first_write_wins_within_a_snapshot() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let store = SnapshotStore::new();
        let s = store.create();
        assert!(store.record_first_write(&w, &key("x"), slot(1)));
        assert!(!store.record_first_write(&w, &key("x"), slot(2)));
        assert_eq!(s.get(&w, &key("x")), Some(slot(1)));
        assert_eq!(s.diff_size(), 1);
    }

    #[test]
    fn reads_walk_forward_through_the_chain() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let store = SnapshotStore::new();
        let s1 = store.create();
        store.record_first_write(&w, &key("x"), slot(1));
        let s2 = store.create();
        assert_eq!(s1.next(), Some(s2.clone()));
        store.record_first_write(&w, &key("x"), slot(2));
        store.record_first_write(&w, &key("y"), slot(10));

        assert_eq!(s1.get(&w, &key("x")), Some(slot(1)));
        assert_eq!(s2.get(&w, &key("x")), Some(slot(2)));
        // Written only after s2, so s1 sees the same pre-write value.
        assert_eq!(s1.get(&w, &key("y")), Some(slot(10)));
        assert_eq!(s1.get(&w, &key("z")), None);
        assert_eq!(s1.get_or_live(&w, &key("z"), || slot(99)), slot(99));

        // Bounded by s2, s1 only knows about its own diff.
        assert_eq!(s1.get_until(&w, &key("x"), &s2), Some(slot(1)));
        assert_eq!(s1.get_until(&w, &key("y"), &s2), None);
    }

    #[test]
    fn absent_is_recorded_distinctly() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let store = SnapshotStore::new();
        let s = store.create();
        store.record_first_write(&w, &key("x"), Slot::Absent);
        assert_eq!(s.get(&w, &key("x")), Some(Slot::Absent));
        assert!(!s.has(&w, &key("x"), || true));
        assert!(s.has(&w, &key("other"), || true));
    }

    #[test]
    fn keys_and_touched_targets() {
        let rt = Runtime::new();
        let a = rt.wrap(&Target::record());
        let b = rt.wrap(&Target::record());
        let store = SnapshotStore::new();
        let s1 = store.create();
        store.record_first_write(&a, &[PropKey::OwnKeys, PropKey::Index(0)], slot(0));
        let s2 = store.create();
        store.record_first_write(&b, &key("x"), slot(0));
        store.record_first_write(&a, &[PropKey::OwnKeys, PropKey::Length], slot(1));

        assert_eq!(s1.touched_targets(None), vec![a.clone(), b.clone()]);
        assert_eq!(s1.touched_targets(Some(&s2)), vec![a.clone()]);
        assert_eq!(
            s1.keys(&a, &[PropKey::OwnKeys], None),
            vec![PropKey::Index(0), PropKey::Length]
        );
        assert_eq!(
            s1.keys(&a, &[PropKey::OwnKeys], Some(&s2)),
            vec![PropKey::Index(0)]
        );
    }

    #[test]
    fn target_snapshots_chain_per_target() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let store = SnapshotStore::new();
        let s1 = store.create();
        store.record_first_write(&w, &key("x"), slot(1));
        let s2 = store.create();
        store.record_first_write(&w, &key("x"), slot(2));

        let ts1 = s1.target_snapshot(&w, None).expect("touched in s1");
        let ts2 = s2.target_snapshot(&w, None).expect("touched in s2");
        assert_eq!(ts1.id(), 1);
        assert_eq!(ts2.id(), 2);
        assert_eq!(ts1.next(), Some(ts2.clone()));
        assert_eq!(ts1.recorded().get(&key("x")), Some(&slot(1)));
        assert_eq!(ts1.size(), 1);
    }

    #[test]
    fn monitors_fire_on_new_snapshots_only() {
        let store = SnapshotStore::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = store.add_monitor(move |s| sink.borrow_mut().push(s.id()));
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let _s1 = store.create();
        let _again = store.create();
        store.record_first_write(&w, &key("x"), slot(1));
        let _s2 = store.create();
        store.remove_monitor(id);
        store.record_first_write(&w, &key("x"), slot(2));
        let _s3 = store.create();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn long_chain_drops_without_overflow() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let store = SnapshotStore::new();
        let head = store.create();
        let mut current = head.clone();
        for i in 0..200_000 {
            store.record_first_write(&w, &key("x"), slot(i));
            current = store.create();
        }
        drop(current);
        drop(head);
        assert!(store.latest().is_none());
    }
}
