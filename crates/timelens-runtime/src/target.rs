#![forbid(unsafe_code)]

//! Raw targets: the mutable records, sequences, associative containers and
//! callables that participate in observation.
//!
//! A [`Target`] is a reference-counted handle. Its identity (the
//! [`TargetId`]) is what wrappers, observers and snapshots key on. Once a
//! target has been wrapped, every mutation must go through a wrapper for the
//! rest of its life. The raw mutators return [`Error::AlreadyWrapped`], also
//! after the wrapper itself has been dropped.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use timelens_core::{Error, Result};

use crate::value::{PropKey, Slot, Value};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

fn next_target_id() -> u64 {
    NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed)
}

/// Process-unique target identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// The raw numeric id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Native function backing a callable target.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Value>;

/// Shape of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Record,
    Sequence,
    Map,
    Callable,
}

impl Kind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Sequence => "sequence",
            Self::Map => "map",
            Self::Callable => "callable",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of a target.
pub(crate) enum TargetData {
    Record(IndexMap<Rc<str>, Value>),
    Sequence(Vec<Value>),
    Map(IndexMap<Value, Value>),
    Callable(NativeFn),
}

impl TargetData {
    fn kind(&self) -> Kind {
        match self {
            Self::Record(_) => Kind::Record,
            Self::Sequence(_) => Kind::Sequence,
            Self::Map(_) => Kind::Map,
            Self::Callable(_) => Kind::Callable,
        }
    }
}

struct TargetInner {
    id: TargetId,
    data: RefCell<TargetData>,
    /// Set on first wrap and never cleared.
    wrapped: Cell<bool>,
}

/// Handle to a raw mutable target.
///
/// Cloning yields another handle to the same target.
#[derive(Clone)]
pub struct Target(Rc<TargetInner>);

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("kind", &self.0.data.try_borrow().ok().map(|d| d.kind()))
            .finish()
    }
}

impl Target {
    fn from_data(data: TargetData) -> Self {
        Self(Rc::new(TargetInner {
            id: TargetId(next_target_id()),
            data: RefCell::new(data),
            wrapped: Cell::new(false),
        }))
    }

    /// Empty record.
    #[must_use]
    pub fn record() -> Self {
        Self::from_data(TargetData::Record(IndexMap::new()))
    }

    /// Record with the given fields, in order.
    pub fn record_from<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (Rc::from(k.as_ref()), v.into()))
            .collect();
        Self::from_data(TargetData::Record(fields))
    }

    /// Sequence holding `items`.
    pub fn sequence<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::from_data(TargetData::Sequence(
            items.into_iter().map(Into::into).collect(),
        ))
    }

    /// Associative container holding `entries`, in insertion order.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::from_data(TargetData::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Callable target backed by `f`.
    pub fn callable(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self::from_data(TargetData::Callable(Rc::new(f)))
    }

    #[must_use]
    pub fn id(&self) -> TargetId {
        self.0.id
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.0.data.borrow().kind()
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Whether this target has ever been wrapped.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        self.0.wrapped.get()
    }

    pub(crate) fn data(&self) -> Ref<'_, TargetData> {
        self.0.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, TargetData> {
        self.0.data.borrow_mut()
    }

    pub(crate) fn mark_wrapped(&self) {
        self.0.wrapped.set(true);
    }

    pub(crate) fn wrong_kind(&self, expected: Kind) -> Error {
        Error::WrongKind {
            expected: expected.as_str(),
            found: self.kind().as_str(),
        }
    }

    // -- Live reads ---------------------------------------------------------

    /// Read a property straight from the target, bypassing any wrapper.
    pub fn raw_get(&self, key: &PropKey) -> Result<Slot> {
        match (&*self.data(), key) {
            (TargetData::Record(fields), PropKey::Field(name)) => Ok(Slot::of(fields.get(name))),
            (TargetData::Sequence(items), PropKey::Index(i)) => Ok(Slot::of(items.get(*i))),
            (TargetData::Sequence(items), PropKey::Length) => Ok(Slot::Present(items.len().into())),
            (TargetData::Map(entries), PropKey::Entry(k)) => Ok(Slot::of(entries.get(k))),
            (TargetData::Map(entries), PropKey::Size) => Ok(Slot::Present(entries.len().into())),
            _ => Err(Error::InvalidKey),
        }
    }

    /// Current enumeration order for a structural key: field names or
    /// indices for [`PropKey::OwnKeys`], associative keys for
    /// [`PropKey::MapKeys`].
    pub(crate) fn key_order(&self, structural: &PropKey) -> Result<Vec<Value>> {
        match (&*self.data(), structural) {
            (TargetData::Record(fields), PropKey::OwnKeys) => {
                Ok(fields.keys().map(|k| Value::Str(Rc::clone(k))).collect())
            }
            (TargetData::Sequence(items), PropKey::OwnKeys) => {
                Ok((0..items.len()).map(Value::from).collect())
            }
            (TargetData::Map(entries), PropKey::MapKeys) => Ok(entries.keys().cloned().collect()),
            (TargetData::Callable(_), PropKey::OwnKeys) => Ok(Vec::new()),
            _ => Err(Error::InvalidKey),
        }
    }

    // -- Raw writes ---------------------------------------------------------

    fn ensure_unwrapped(&self) -> Result<()> {
        if self.is_wrapped() {
            return Err(Error::AlreadyWrapped);
        }
        Ok(())
    }

    /// Write a property straight into the target.
    ///
    /// Fails with [`Error::AlreadyWrapped`] once the target has been wrapped.
    pub fn raw_set(&self, key: PropKey, value: impl Into<Value>) -> Result<()> {
        self.ensure_unwrapped()?;
        let value = value.into();
        match (&mut *self.data_mut(), key) {
            (TargetData::Record(fields), PropKey::Field(name)) => {
                fields.insert(name, value);
            }
            (TargetData::Sequence(items), PropKey::Index(i)) => {
                let len = items.len();
                match i.cmp(&len) {
                    std::cmp::Ordering::Less => items[i] = value,
                    std::cmp::Ordering::Equal => items.push(value),
                    std::cmp::Ordering::Greater => {
                        return Err(Error::IndexOutOfBounds { index: i, len });
                    }
                }
            }
            (TargetData::Sequence(items), PropKey::Length) => {
                let Some(n) = value.as_len() else {
                    return Err(Error::InvalidKey);
                };
                items.resize(n, Value::Null);
            }
            (TargetData::Map(entries), PropKey::Entry(k)) => {
                entries.insert(k, value);
            }
            _ => return Err(Error::InvalidKey),
        }
        Ok(())
    }

    /// Remove a property straight from the target.
    ///
    /// Returns whether anything was removed.
    pub fn raw_delete(&self, key: &PropKey) -> Result<bool> {
        self.ensure_unwrapped()?;
        match (&mut *self.data_mut(), key) {
            (TargetData::Record(fields), PropKey::Field(name)) => {
                Ok(fields.shift_remove(name).is_some())
            }
            (TargetData::Sequence(items), PropKey::Index(i)) => {
                if *i < items.len() {
                    items.remove(*i);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            (TargetData::Map(entries), PropKey::Entry(k)) => Ok(entries.shift_remove(k).is_some()),
            _ => Err(Error::InvalidKey),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Target::record();
        let b = Target::record();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
        assert!(Target::ptr_eq(&a, &a.clone()));
    }

    #[test]
    fn kinds() {
        assert_eq!(Target::record().kind(), Kind::Record);
        assert_eq!(Target::sequence([1, 2]).kind(), Kind::Sequence);
        assert_eq!(Target::map([("a", 1)]).kind(), Kind::Map);
        assert_eq!(Target::callable(|_| Value::Null).kind(), Kind::Callable);
    }

    #[test]
    fn raw_record_round_trip() -> Result<()> {
        let t = Target::record_from([("count", 0)]);
        assert_eq!(t.raw_get(&"count".into())?, Slot::Present(Value::Int(0)));
        t.raw_set("count".into(), 5)?;
        assert_eq!(t.raw_get(&"count".into())?, Slot::Present(Value::Int(5)));
        assert!(t.raw_delete(&"count".into())?);
        assert_eq!(t.raw_get(&"count".into())?, Slot::Absent);
        assert!(!t.raw_delete(&"count".into())?);
        Ok(())
    }

    #[test]
    fn raw_sequence_bounds() -> Result<()> {
        let t = Target::sequence([1, 2, 3]);
        t.raw_set(PropKey::Index(3), 4)?;
        assert_eq!(t.raw_get(&PropKey::Length)?, Slot::Present(Value::Int(4)));
        assert_eq!(
            t.raw_set(PropKey::Index(9), 0),
            Err(Error::IndexOutOfBounds { index: 9, len: 4 })
        );
        t.raw_set(PropKey::Length, 2)?;
        assert_eq!(t.key_order(&PropKey::OwnKeys)?, vec![Value::Int(0), Value::Int(1)]);
        Ok(())
    }

    #[test]
    fn wrong_key_for_kind() {
        let t = Target::sequence([1]);
        assert_eq!(t.raw_get(&"x".into()), Err(Error::InvalidKey));
        assert_eq!(
            t.wrong_kind(Kind::Map),
            Error::WrongKind {
                expected: "map",
                found: "sequence"
            }
        );
    }

    #[test]
    fn wrapped_targets_reject_raw_writes() {
        let t = Target::record();
        assert!(t.raw_set("a".into(), 1).is_ok());
        t.mark_wrapped();
        assert_eq!(t.raw_set("a".into(), 2), Err(Error::AlreadyWrapped));
        assert_eq!(t.raw_delete(&"a".into()), Err(Error::AlreadyWrapped));
        assert_eq!(t.raw_get(&"a".into()), Ok(Slot::Present(Value::Int(1))));
    }
}
