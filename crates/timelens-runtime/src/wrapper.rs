#![forbid(unsafe_code)]

//! Wrappers: the observable handle for a target.
//!
//! A [`Wrapper`] is the only handle through which a target should be read or
//! written once it is wrapped. Reads consult the active read context (and its
//! snapshot); writes are checked against the write guards, recorded into the
//! current snapshot and published to observers.
//!
//! The generic operations here dispatch on the target kind. Kind-specific
//! operations live in `record`, `sequence` and `assoc`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use timelens_core::{Error, Result};

use crate::runtime::Runtime;
use crate::target::{Kind, Target, TargetData, TargetId};
use crate::value::{PropKey, Slot, Value};

pub(crate) struct WrapperInner {
    target: Target,
    runtime: Runtime,
}

impl Drop for WrapperInner {
    fn drop(&mut self) {
        self.runtime.forget_wrapper(self.target.id());
    }
}

/// Observable handle for a target.
///
/// Equality and hashing follow target identity.
#[derive(Clone)]
pub struct Wrapper(Rc<WrapperInner>);

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Wrapper").field(&self.0.target).finish()
    }
}

impl PartialEq for Wrapper {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Wrapper {}

impl Hash for Wrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl Wrapper {
    pub(crate) fn new(target: Target, runtime: Runtime) -> Self {
        target.mark_wrapped();
        Self(Rc::new(WrapperInner { target, runtime }))
    }

    pub(crate) fn from_inner(inner: Rc<WrapperInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<WrapperInner> {
        Rc::downgrade(&self.0)
    }

    /// Identity of the wrapped target.
    #[must_use]
    pub fn id(&self) -> TargetId {
        self.0.target.id()
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.0.target.kind()
    }

    /// The wrapped target.
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.0.target
    }

    /// The runtime this wrapper belongs to.
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    /// Whether `a` and `b` are the same wrapper object.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn require(&self, kind: Kind) -> Result<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(self.0.target.wrong_kind(kind))
        }
    }

    // ── Generic operations ──────────────────────────────────────────────

    /// Read a property.
    ///
    /// Records take field keys, sequences take [`PropKey::Index`] and
    /// [`PropKey::Length`], associative containers take [`PropKey::Entry`]
    /// and [`PropKey::Size`].
    pub fn get(&self, key: impl Into<PropKey>) -> Result<Slot> {
        let key = key.into();
        match (self.kind(), &key) {
            (Kind::Record, PropKey::Field(name)) => self.field(name),
            (Kind::Sequence, PropKey::Index(i)) => self.at(*i),
            (Kind::Sequence, PropKey::Length) => Ok(Slot::Present(self.len()?.into())),
            (Kind::Map, PropKey::Entry(k)) => self.map_get(k),
            (Kind::Map, PropKey::Size) => Ok(Slot::Present(self.size()?.into())),
            _ => Err(Error::InvalidKey),
        }
    }

    /// Whether a property exists.
    pub fn has(&self, key: impl Into<PropKey>) -> Result<bool> {
        let key = key.into();
        match (self.kind(), &key) {
            (Kind::Record, PropKey::Field(name)) => self.has_field(name),
            (Kind::Sequence, PropKey::Index(i)) => Ok(*i < self.len()?),
            (Kind::Map, PropKey::Entry(k)) => self.map_has(k),
            _ => Err(Error::InvalidKey),
        }
    }

    /// Enumeration order: field names, indices, or associative keys.
    pub fn keys(&self) -> Result<Vec<Value>> {
        match self.kind() {
            Kind::Map => self.map_keys(),
            Kind::Record | Kind::Sequence | Kind::Callable => self.own_keys(),
        }
    }

    /// Write a property.
    ///
    /// For sequences, `Index(len)` appends, `Index(i > len)` fails with
    /// [`Error::IndexOutOfBounds`], and `Length` truncates or pads with
    /// [`Value::Null`].
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        match (self.kind(), key) {
            (Kind::Record, PropKey::Field(name)) => self.set_field(name, value),
            (Kind::Sequence, PropKey::Index(i)) => self.set_index(i, value),
            (Kind::Sequence, PropKey::Length) => self.set_len(&value),
            (Kind::Map, PropKey::Entry(k)) => self.map_set(k, value),
            _ => Err(Error::InvalidKey),
        }
    }

    /// Remove a property. Returns whether anything was removed.
    ///
    /// Removing a sequence index removes the element and shifts the rest.
    pub fn delete(&self, key: impl Into<PropKey>) -> Result<bool> {
        let key = key.into();
        match (self.kind(), &key) {
            (Kind::Record, PropKey::Field(name)) => self.delete_field(name),
            (Kind::Sequence, PropKey::Index(i)) => self.remove_at(*i),
            (Kind::Map, PropKey::Entry(k)) => self.map_delete(k),
            _ => Err(Error::InvalidKey),
        }
    }

    /// Invoke a callable target.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let f = match &*self.0.target.data() {
            TargetData::Callable(f) => Rc::clone(f),
            _ => return Err(Error::NotCallable),
        };
        Ok(f(args))
    }

    /// Own keys as of the active read context.
    pub(crate) fn own_keys(&self) -> Result<Vec<Value>> {
        self.runtime().read(self, &PropKey::OwnKeys, |snapshot| {
            let live = self.0.target.key_order(&PropKey::OwnKeys)?;
            Ok(historical_key_order(snapshot, self, PropKey::OwnKeys, live))
        })
    }
}

/// Rebuild a key order as of `snapshot` from `[structural, Length]` and
/// `[structural, Index(i)]` records, falling back to `live` where nothing was
/// recorded.
pub(crate) fn historical_key_order(
    snapshot: Option<&crate::snapshot::Snapshot>,
    wrapper: &Wrapper,
    structural: PropKey,
    live: Vec<Value>,
) -> Vec<Value> {
    let Some(snapshot) = snapshot else {
        return live;
    };
    let len = snapshot
        .get(wrapper, &[structural.clone(), PropKey::Length])
        .and_then(|slot| slot.value().and_then(Value::as_len))
        .unwrap_or(live.len());
    (0..len)
        .filter_map(|i| {
            match snapshot.get(wrapper, &[structural.clone(), PropKey::Index(i)]) {
                Some(slot) => slot.into_value(),
                None => live.get(i).cloned(),
            }
        })
        .collect()
}

/// Resolve `path` through `snapshot`, or read it live.
pub(crate) fn historical_or_live(
    snapshot: Option<&crate::snapshot::Snapshot>,
    wrapper: &Wrapper,
    path: &[PropKey],
    live: impl FnOnce() -> Result<Slot>,
) -> Result<Slot> {
    match snapshot.and_then(|s| s.get(wrapper, path)) {
        Some(slot) => Ok(slot),
        None => live(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_target_identity() {
        let rt = Runtime::new();
        let t = Target::record();
        let a = rt.wrap(&t);
        let b = rt.wrap(&t);
        let c = rt.wrap(&Target::record());
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut set = ahash::AHashSet::new();
        set.insert(a.clone());
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn wrong_keys_are_rejected() {
        let rt = Runtime::new();
        let seq = rt.wrap(&Target::sequence([1]));
        assert_eq!(seq.get("x"), Err(Error::InvalidKey));
        assert_eq!(seq.set(PropKey::Size, 1), Err(Error::InvalidKey));
        let rec = rt.wrap(&Target::record());
        assert_eq!(rec.delete(PropKey::Index(0)), Err(Error::InvalidKey));
    }

    #[test]
    fn call_invokes_native_function() -> Result<()> {
        let rt = Runtime::new();
        let add = rt.wrap(&Target::callable(|args| {
            Value::Int(args.iter().filter_map(Value::as_int).sum())
        }));
        assert_eq!(add.call(&[Value::Int(2), Value::Int(3)])?, Value::Int(5));
        let rec = rt.wrap(&Target::record());
        assert_eq!(rec.call(&[]), Err(Error::NotCallable));
        Ok(())
    }

    #[test]
    fn generic_get_dispatches_by_kind() -> Result<()> {
        let rt = Runtime::new();
        let seq = rt.wrap(&Target::sequence([10, 20]));
        assert_eq!(seq.get(1usize)?, Slot::Present(Value::Int(20)));
        assert_eq!(seq.get(PropKey::Length)?, Slot::Present(Value::Int(2)));
        assert!(seq.has(0usize)?);
        assert!(!seq.has(2usize)?);
        let map = rt.wrap(&Target::map([("k", 1)]));
        assert_eq!(map.get(PropKey::Entry("k".into()))?, Slot::Present(Value::Int(1)));
        assert_eq!(map.get(PropKey::Size)?, Slot::Present(Value::Int(1)));
        assert_eq!(map.keys()?, vec![Value::from("k")]);
        Ok(())
    }
}
