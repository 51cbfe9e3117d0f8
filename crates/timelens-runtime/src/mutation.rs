#![forbid(unsafe_code)]

//! Write bookkeeping shared by every container kind.
//!
//! A [`Mutation`] is opened before a target is changed. It checks the write
//! guards, then collects snapshot records and change records while the
//! container-specific code decomposes the operation, and finally publishes
//! all changes at once.
//!
//! Ordering per write: capture old state, mutate (releasing the target
//! borrow), record pre-mutation values, publish, run the `on_set` hook.

use std::rc::Rc;

use timelens_core::Result;

use crate::context::ReadContext;
use crate::notifier::Change;
use crate::value::{PropKey, Slot, Value};
use crate::wrapper::Wrapper;

pub(crate) struct Mutation<'w> {
    wrapper: &'w Wrapper,
    context: Rc<ReadContext>,
    origin: Option<Rc<str>>,
    changes: Vec<Change>,
}

impl<'w> Mutation<'w> {
    /// Open a write on `wrapper`, failing if a snapshot view is active or a
    /// read is in progress.
    pub(crate) fn begin(wrapper: &'w Wrapper) -> Result<Self> {
        let runtime = wrapper.runtime();
        let context = runtime.begin_write()?;
        let origin = runtime.origin_for(&context);
        Ok(Self {
            wrapper,
            context,
            origin,
            changes: Vec::new(),
        })
    }

    /// Record the pre-mutation value of `path` into the current snapshot.
    pub(crate) fn record(&self, path: &[PropKey], old: &Slot) {
        self.wrapper
            .runtime()
            .record_first_write(self.wrapper, path, old);
    }

    /// Queue a change record.
    pub(crate) fn emit(&mut self, property: PropKey, old: Slot, new: Slot) {
        self.changes.push(Change {
            target: self.wrapper.clone(),
            property,
            old,
            new,
            origin: self.origin.clone(),
        });
    }

    /// Record `[key]` and emit its change.
    pub(crate) fn record_and_emit(&mut self, key: PropKey, old: Slot, new: Slot) {
        self.record(std::slice::from_ref(&key), &old);
        self.emit(key, old, new);
    }

    /// Diff an ordered key sequence positionally.
    ///
    /// Records `[structural, Index(i)]` for every position whose key changed
    /// and `[structural, Length]` when the length changed, then emits a single
    /// change for `structural`. Emits nothing if the order is unchanged.
    pub(crate) fn key_order(&mut self, structural: PropKey, before: Vec<Value>, after: Vec<Value>) {
        let mut changed = false;
        for i in 0..before.len().max(after.len()) {
            if before.get(i) != after.get(i) {
                self.record(
                    &[structural.clone(), PropKey::Index(i)],
                    &Slot::of(before.get(i)),
                );
                changed = true;
            }
        }
        if before.len() != after.len() {
            self.record(
                &[structural.clone(), PropKey::Length],
                &Slot::Present(before.len().into()),
            );
            changed = true;
        }
        if changed {
            self.emit(
                structural,
                Slot::Present(Value::from(before)),
                Slot::Present(Value::from(after)),
            );
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.changes.len()
    }

    /// Publish the collected changes.
    pub(crate) fn commit(self) {
        self.wrapper.runtime().publish(self.changes);
    }

    /// Publish, then report the write of `key` to the `on_set` hook.
    pub(crate) fn commit_with_hook(self, key: &PropKey, value: &Slot) {
        let wrapper = self.wrapper;
        let context = Rc::clone(&self.context);
        self.commit();
        context.notify_set(wrapper, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::target::Target;

    #[test]
    fn key_order_diff_records_positions_and_length() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let s = rt.create_snapshot();
        let mut m = Mutation::begin(&w).expect("writable");
        m.key_order(
            PropKey::OwnKeys,
            vec![Value::from("a"), Value::from("b")],
            vec![Value::from("a"), Value::from("c"), Value::from("b")],
        );
        assert_eq!(m.len(), 1);
        assert_eq!(
            s.get(&w, &[PropKey::OwnKeys, PropKey::Index(1)]),
            Some(Slot::Present(Value::from("b")))
        );
        assert_eq!(
            s.get(&w, &[PropKey::OwnKeys, PropKey::Index(2)]),
            Some(Slot::Absent)
        );
        assert_eq!(
            s.get(&w, &[PropKey::OwnKeys, PropKey::Length]),
            Some(Slot::Present(Value::Int(2)))
        );
        assert_eq!(s.get(&w, &[PropKey::OwnKeys, PropKey::Index(0)]), None);
    }

    #[test]
    fn unchanged_key_order_emits_nothing() {
        let rt = Runtime::new();
        let w = rt.wrap(&Target::record());
        let mut m = Mutation::begin(&w).expect("writable");
        m.key_order(PropKey::OwnKeys, vec![Value::from("a")], vec![Value::from("a")]);
        assert_eq!(m.len(), 0);
    }
}
