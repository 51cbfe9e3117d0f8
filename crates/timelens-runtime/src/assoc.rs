#![forbid(unsafe_code)]

//! Associative container operations.
//!
//! Values are recorded under `[MapValues, Entry(key)]`, the size under
//! `[Size]` and the key order under `[MapKeys, ..]`. Change records use the
//! coarse `MapValues` property, so an observer of `[MapValues]` hears about
//! every value write.

use timelens_core::{Error, Result};

use crate::mutation::Mutation;
use crate::target::{Kind, TargetData};
use crate::value::{PropKey, Slot, Value};
use crate::wrapper::{Wrapper, historical_key_order, historical_or_live};

impl Wrapper {
    /// Value stored under `key` as of the active read context.
    pub fn map_get(&self, key: &Value) -> Result<Slot> {
        self.require(Kind::Map)?;
        let path = [PropKey::MapValues, PropKey::Entry(key.clone())];
        let slot = self.runtime().read(self, &PropKey::MapValues, |snapshot| {
            historical_or_live(snapshot, self, &path, || {
                self.target().raw_get(&path[1])
            })
        })?;
        Ok(match slot {
            Slot::Present(value) => Slot::Present(self.runtime().wrap_nested(value)),
            Slot::Absent => Slot::Absent,
        })
    }

    /// Whether `key` is present as of the active read context.
    pub fn map_has(&self, key: &Value) -> Result<bool> {
        self.require(Kind::Map)?;
        let path = [PropKey::MapValues, PropKey::Entry(key.clone())];
        self.runtime().read(self, &PropKey::MapKeys, |snapshot| {
            let live = self.target().raw_get(&path[1])?.is_present();
            Ok(match snapshot {
                Some(snapshot) => snapshot.has(self, &path, || live),
                None => live,
            })
        })
    }

    /// Keys in insertion order as of the active read context.
    pub fn map_keys(&self) -> Result<Vec<Value>> {
        self.require(Kind::Map)?;
        self.runtime().read(self, &PropKey::MapKeys, |snapshot| {
            let live = self.target().key_order(&PropKey::MapKeys)?;
            Ok(historical_key_order(snapshot, self, PropKey::MapKeys, live))
        })
    }

    /// `(key, value)` pairs in key order as of the active read context.
    pub fn map_entries(&self) -> Result<Vec<(Value, Value)>> {
        let keys = self.map_keys()?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.map_get(&key)?.into_value() {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    /// Number of entries as of the active read context.
    pub fn size(&self) -> Result<usize> {
        self.require(Kind::Map)?;
        let slot = self.runtime().read(self, &PropKey::Size, |snapshot| {
            historical_or_live(snapshot, self, &[PropKey::Size], || {
                self.target().raw_get(&PropKey::Size)
            })
        })?;
        Ok(slot.value().and_then(Value::as_len).unwrap_or(0))
    }

    /// Insert or overwrite `key`.
    pub fn map_set(&self, key: Value, value: Value) -> Result<()> {
        self.require(Kind::Map)?;
        let mut m = Mutation::begin(self)?;
        let keys_before = self.target().key_order(&PropKey::MapKeys)?;
        let (old, old_size, new_size) = self.edit_entries(|entries| {
            let old_size = entries.len();
            let old = Slot::of(entries.insert(key.clone(), value.clone()).as_ref());
            (old, old_size, entries.len())
        })?;
        let keys_after = self.target().key_order(&PropKey::MapKeys)?;
        let new = Slot::Present(value);

        m.record(&[PropKey::MapValues, PropKey::Entry(key.clone())], &old);
        let size_changed = old_size != new_size;
        if size_changed {
            m.record(&[PropKey::Size], &Slot::Present(old_size.into()));
        }
        m.emit(PropKey::MapValues, old, new.clone());
        m.key_order(PropKey::MapKeys, keys_before, keys_after);
        if size_changed {
            m.emit(
                PropKey::Size,
                Slot::Present(old_size.into()),
                Slot::Present(new_size.into()),
            );
        }
        m.commit_with_hook(&PropKey::Entry(key), &new);
        Ok(())
    }

    /// Remove `key`. Absent keys produce no records.
    pub fn map_delete(&self, key: &Value) -> Result<bool> {
        self.require(Kind::Map)?;
        let mut m = Mutation::begin(self)?;
        let keys_before = self.target().key_order(&PropKey::MapKeys)?;
        let (removed, old_size, new_size) = self.edit_entries(|entries| {
            let old_size = entries.len();
            let removed = entries.shift_remove(key);
            (removed, old_size, entries.len())
        })?;
        let Some(old) = removed else {
            return Ok(false);
        };
        let keys_after = self.target().key_order(&PropKey::MapKeys)?;
        let old = Slot::Present(old);

        m.record(&[PropKey::Size], &Slot::Present(old_size.into()));
        m.record(&[PropKey::MapValues, PropKey::Entry(key.clone())], &old);
        m.emit(
            PropKey::Size,
            Slot::Present(old_size.into()),
            Slot::Present(new_size.into()),
        );
        m.emit(PropKey::MapValues, old, Slot::Absent);
        m.key_order(PropKey::MapKeys, keys_before, keys_after);
        m.commit_with_hook(&PropKey::Entry(key.clone()), &Slot::Absent);
        Ok(true)
    }

    fn edit_entries<R>(
        &self,
        f: impl FnOnce(&mut indexmap::IndexMap<Value, Value>) -> R,
    ) -> Result<R> {
        let kind = self.kind();
        let mut data = self.target().data_mut();
        let TargetData::Map(entries) = &mut *data else {
            return Err(Error::WrongKind {
                expected: Kind::Map.as_str(),
                found: kind.as_str(),
            });
        };
        Ok(f(entries))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::{DeliveryMode, RuntimeConfig};
    use crate::context::ReadContext;
    use crate::notifier::Change;
    use crate::runtime::Runtime;
    use crate::target::Target;

    fn immediate() -> Runtime {
        Runtime::with_config(RuntimeConfig::default().with_delivery(DeliveryMode::Immediate))
    }

    fn record_all(rt: &Runtime, w: &Wrapper) -> (Rc<RefCell<Vec<Change>>>, Vec<crate::Subscription>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let subs = [PropKey::MapValues, PropKey::MapKeys, PropKey::Size]
            .into_iter()
            .map(|key| {
                let sink = Rc::clone(&seen);
                rt.observe(w, &[key], move |c| sink.borrow_mut().extend_from_slice(c), None)
            })
            .collect();
        (seen, subs)
    }

    fn properties(seen: &RefCell<Vec<Change>>) -> Vec<PropKey> {
        seen.borrow().iter().map(|c| c.property.clone()).collect()
    }

    #[test]
    fn insert_emits_value_keys_and_size() -> Result<()> {
        let rt = immediate();
        let w = rt.wrap(&Target::map([("a", 1)]));
        let (seen, _subs) = record_all(&rt, &w);
        w.map_set("b".into(), 2.into())?;
        assert_eq!(
            properties(&seen),
            vec![PropKey::MapValues, PropKey::MapKeys, PropKey::Size]
        );
        Ok(())
    }

    #[test]
    fn overwrite_emits_value_only() -> Result<()> {
        let rt = immediate();
        let w = rt.wrap(&Target::map([("a", 1)]));
        let (seen, _subs) = record_all(&rt, &w);
        w.map_set("a".into(), 5.into())?;
        assert_eq!(properties(&seen), vec![PropKey::MapValues]);
        assert_eq!(seen.borrow()[0].old, Slot::Present(Value::Int(1)));
        Ok(())
    }

    #[test]
    fn delete_is_symmetric_and_absent_is_silent() -> Result<()> {
        let rt = immediate();
        let w = rt.wrap(&Target::map([("a", 1), ("b", 2)]));
        let (seen, _subs) = record_all(&rt, &w);
        assert!(!w.map_delete(&"zzz".into())?);
        assert!(seen.borrow().is_empty());
        assert!(w.map_delete(&"a".into())?);
        assert_eq!(
            properties(&seen),
            vec![PropKey::Size, PropKey::MapValues, PropKey::MapKeys]
        );
        let size = &seen.borrow()[0];
        assert_eq!(size.old, Slot::Present(Value::Int(2)));
        assert_eq!(size.new, Slot::Present(Value::Int(1)));
        Ok(())
    }

    #[test]
    fn snapshot_reconstructs_entries_and_order() -> Result<()> {
        let rt = immediate();
        let w = rt.wrap(&Target::map([("a", 1), ("b", 2)]));
        let s = rt.create_snapshot();
        w.map_delete(&"a".into())?;
        w.map_set("c".into(), 3.into())?;
        w.map_set("b".into(), 20.into())?;
        assert_eq!(w.map_keys()?, vec![Value::from("b"), Value::from("c")]);

        rt.with_read_context(ReadContext::new().with_snapshot(s), || -> Result<()> {
            assert_eq!(
                w.map_entries()?,
                vec![(Value::from("a"), Value::Int(1)), (Value::from("b"), Value::Int(2))]
            );
            assert_eq!(w.size()?, 2);
            assert!(w.map_has(&"a".into())?);
            assert!(!w.map_has(&"c".into())?);
            Ok(())
        })?;
        assert_eq!(w.size()?, 2);
        assert!(!w.map_has(&"a".into())?);
        Ok(())
    }

    #[test]
    fn generic_set_and_delete_route_to_entries() -> Result<()> {
        let rt = immediate();
        let w = rt.wrap(&Target::map(Vec::<(Value, Value)>::new()));
        w.set(PropKey::Entry(Value::Int(1)), "one")?;
        assert_eq!(w.map_get(&Value::Int(1))?, Slot::Present(Value::from("one")));
        assert!(w.delete(PropKey::Entry(Value::Int(1)))?);
        assert_eq!(w.size()?, 0);
        Ok(())
    }
}
