#![forbid(unsafe_code)]

//! Sequence operations.
//!
//! Every structural edit is expressed as a splice and diffed positionally:
//! a change record is produced for exactly the indices whose value differs
//! between the old and the new contents, plus one for `Length` when the
//! length changed. `push`/`unshift` insert at a boundary and `pop`/`shift`
//! remove one element at a boundary, so they share the splice diff shape.
//!
//! `reverse` walks symmetric index pairs and touches only pairs whose values
//! differ; the middle element of an odd-length sequence is never touched.

use timelens_core::{Error, Result};

use crate::mutation::Mutation;
use crate::target::{Kind, TargetData};
use crate::value::{PropKey, Slot, Value};
use crate::wrapper::{Wrapper, historical_or_live};

impl Wrapper {
    // ── Reads ───────────────────────────────────────────────────────────

    /// Length as of the active read context.
    pub fn len(&self) -> Result<usize> {
        self.require(Kind::Sequence)?;
        let slot = self.runtime().read(self, &PropKey::Length, |snapshot| {
            historical_or_live(snapshot, self, &[PropKey::Length], || {
                self.target().raw_get(&PropKey::Length)
            })
        })?;
        Ok(slot.value().and_then(Value::as_len).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Element `index` as of the active read context.
    pub fn at(&self, index: usize) -> Result<Slot> {
        self.require(Kind::Sequence)?;
        let key = PropKey::Index(index);
        let slot = self.runtime().read(self, &key, |snapshot| {
            historical_or_live(snapshot, self, std::slice::from_ref(&key), || {
                self.target().raw_get(&key)
            })
        })?;
        Ok(match slot {
            Slot::Present(value) => Slot::Present(self.runtime().wrap_nested(value)),
            Slot::Absent => Slot::Absent,
        })
    }

    /// All elements as of the active read context.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let len = self.len()?;
        (0..len)
            .map(|i| Ok(self.at(i)?.into_value().unwrap_or(Value::Null)))
            .collect()
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Remove `delete_count` elements at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the current length. Returns
    /// the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>> {
        self.require(Kind::Sequence)?;
        let mut m = Mutation::begin(self)?;
        let removed = self.apply_splice(&mut m, start, delete_count, items.into_iter().collect())?;
        m.commit();
        Ok(removed)
    }

    /// Append `items`. Returns the new length.
    pub fn push(&self, items: impl IntoIterator<Item = Value>) -> Result<usize> {
        let len = self.live_len()?;
        self.splice(len, 0, items)?;
        self.live_len()
    }

    /// Prepend `items`. Returns the new length.
    pub fn unshift(&self, items: impl IntoIterator<Item = Value>) -> Result<usize> {
        self.splice(0, 0, items)?;
        self.live_len()
    }

    /// Remove the last element.
    pub fn pop(&self) -> Result<Option<Value>> {
        let last = self.live_len()?.saturating_sub(1);
        Ok(self.splice(last, 1, [])?.into_iter().next())
    }

    /// Remove the first element.
    pub fn shift(&self) -> Result<Option<Value>> {
        Ok(self.splice(0, 1, [])?.into_iter().next())
    }

    /// Reverse in place.
    pub fn reverse(&self) -> Result<()> {
        self.require(Kind::Sequence)?;
        let mut m = Mutation::begin(self)?;
        let old = self.edit_items(|items| {
            let old = items.clone();
            items.reverse();
            old
        })?;
        let len = old.len();
        for s in 0..len / 2 {
            let e = len - 1 - s;
            if old[s] != old[e] {
                m.record(&[PropKey::Index(s)], &Slot::Present(old[s].clone()));
                m.record(&[PropKey::Index(e)], &Slot::Present(old[e].clone()));
                m.emit(
                    PropKey::Index(s),
                    Slot::Present(old[s].clone()),
                    Slot::Present(old[e].clone()),
                );
                m.emit(
                    PropKey::Index(e),
                    Slot::Present(old[e].clone()),
                    Slot::Present(old[s].clone()),
                );
            }
        }
        m.commit();
        Ok(())
    }

    /// `index < len` replaces, `index == len` appends.
    pub(crate) fn set_index(&self, index: usize, value: Value) -> Result<()> {
        self.require(Kind::Sequence)?;
        let mut m = Mutation::begin(self)?;
        let key = PropKey::Index(index);
        let new = Slot::Present(value.clone());
        let len = self.live_len()?;
        if index < len {
            let old = self.edit_items(|items| std::mem::replace(&mut items[index], value))?;
            m.record_and_emit(key.clone(), Slot::Present(old), new.clone());
        } else if index == len {
            self.apply_splice(&mut m, index, 0, vec![value])?;
        } else {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        m.commit_with_hook(&key, &new);
        Ok(())
    }

    /// Truncate, or pad with [`Value::Null`].
    pub(crate) fn set_len(&self, value: &Value) -> Result<()> {
        self.require(Kind::Sequence)?;
        let Some(target_len) = value.as_len() else {
            return Err(Error::WrongKind {
                expected: "non-negative int",
                found: value.type_name(),
            });
        };
        let mut m = Mutation::begin(self)?;
        let len = self.live_len()?;
        if target_len == len {
            return Ok(());
        }
        if target_len < len {
            self.apply_splice(&mut m, target_len, len - target_len, Vec::new())?;
        } else if target_len > len {
            self.apply_splice(&mut m, len, 0, vec![Value::Null; target_len - len])?;
        }
        m.commit_with_hook(&PropKey::Length, &Slot::Present(value.clone()));
        Ok(())
    }

    /// Remove the element at `index`, shifting the rest down.
    pub(crate) fn remove_at(&self, index: usize) -> Result<bool> {
        self.require(Kind::Sequence)?;
        let mut m = Mutation::begin(self)?;
        if index >= self.live_len()? {
            return Ok(false);
        }
        self.apply_splice(&mut m, index, 1, Vec::new())?;
        m.commit_with_hook(&PropKey::Index(index), &Slot::Absent);
        Ok(true)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn live_len(&self) -> Result<usize> {
        self.edit_items(|items| items.len())
    }

    fn edit_items<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        let kind = self.kind();
        let mut data = self.target().data_mut();
        let TargetData::Sequence(items) = &mut *data else {
            return Err(Error::WrongKind {
                expected: Kind::Sequence.as_str(),
                found: kind.as_str(),
            });
        };
        Ok(f(items))
    }

    /// Splice the live contents and record the positional diff into `m`.
    fn apply_splice(
        &self,
        m: &mut Mutation<'_>,
        start: usize,
        delete_count: usize,
        inserted: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let inserted_len = inserted.len();
        let (old, new, removed) = self.edit_items(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let old = items.clone();
            let removed: Vec<Value> = items.splice(start..end, inserted).collect();
            (old, items.clone(), removed)
        })?;
        let start = start.min(old.len());
        let replaced_end = start + removed.len();

        for i in start..replaced_end {
            diff_index(m, &old, &new, i);
        }
        if inserted_len != removed.len() {
            for i in replaced_end..old.len().max(new.len()) {
                diff_index(m, &old, &new, i);
            }
        }
        if old.len() != new.len() {
            m.record_and_emit(
                PropKey::Length,
                Slot::Present(old.len().into()),
                Slot::Present(new.len().into()),
            );
        }
        m.key_order(PropKey::OwnKeys, indices(old.len()), indices(new.len()));
        Ok(removed)
    }
}

fn diff_index(m: &mut Mutation<'_>, old: &[Value], new: &[Value], i: usize) {
    let before = Slot::of(old.get(i));
    let after = Slot::of(new.get(i));
    if before != after {
        m.record_and_emit(PropKey::Index(i), before, after);
    }
}

fn indices(len: usize) -> Vec<Value> {
    (0..len).map(Value::from).collect()
}
