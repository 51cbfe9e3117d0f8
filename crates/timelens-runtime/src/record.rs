#![forbid(unsafe_code)]

//! Record operations: named fields in insertion order.

use std::rc::Rc;

use timelens_core::Result;

use crate::mutation::Mutation;
use crate::target::{Kind, TargetData};
use crate::value::{PropKey, Slot, Value};
use crate::wrapper::{Wrapper, historical_or_live};

impl Wrapper {
    pub(crate) fn field(&self, name: &Rc<str>) -> Result<Slot> {
        self.require(Kind::Record)?;
        let key = PropKey::Field(Rc::clone(name));
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

    pub(crate) fn has_field(&self, name: &Rc<str>) -> Result<bool> {
        self.require(Kind::Record)?;
        let key = PropKey::Field(Rc::clone(name));
        self.runtime().read(self, &PropKey::OwnKeys, |snapshot| {
            let live = self.target().raw_get(&key)?;
            Ok(match snapshot {
                Some(snapshot) => snapshot.has(self, std::slice::from_ref(&key), || live.is_present()),
                None => live.is_present(),
            })
        })
    }

    pub(crate) fn set_field(&self, name: Rc<str>, value: Value) -> Result<()> {
        self.require(Kind::Record)?;
        let mut m = Mutation::begin(self)?;
        let key = PropKey::Field(Rc::clone(&name));
        let keys_before = self.target().key_order(&PropKey::OwnKeys)?;
        let old = {
            let mut data = self.target().data_mut();
            match &mut *data {
                TargetData::Record(fields) => Slot::of(fields.insert(name, value.clone()).as_ref()),
                _ => Slot::Absent,
            }
        };
        let keys_after = self.target().key_order(&PropKey::OwnKeys)?;
        let new = Slot::Present(value);
        m.record_and_emit(key.clone(), old, new.clone());
        m.key_order(PropKey::OwnKeys, keys_before, keys_after);
        m.commit_with_hook(&key, &new);
        Ok(())
    }

    pub(crate) fn delete_field(&self, name: &Rc<str>) -> Result<bool> {
        self.require(Kind::Record)?;
        let mut m = Mutation::begin(self)?;
        let key = PropKey::Field(Rc::clone(name));
        let keys_before = self.target().key_order(&PropKey::OwnKeys)?;
        let removed = {
            let mut data = self.target().data_mut();
            match &mut *data {
                TargetData::Record(fields) => fields.shift_remove(name),
                _ => None,
            }
        };
        let Some(old) = removed else {
            return Ok(false);
        };
        let keys_after = self.target().key_order(&PropKey::OwnKeys)?;
        m.record_and_emit(key.clone(), Slot::Present(old), Slot::Absent);
        m.key_order(PropKey::OwnKeys, keys_before, keys_after);
        m.commit_with_hook(&key, &Slot::Absent);
        Ok(true)
    }
}
