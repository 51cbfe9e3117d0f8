#![forbid(unsafe_code)]

//! Values, slots and property keys.
//!
//! - [`Value`]: anything a target can hold. Targets and wrappers compare by
//!   identity; floats compare by bit pattern so every value can be a map key.
//! - [`Slot`]: a value or the [`Slot::Absent`] sentinel. Absent means "no such
//!   property", which is different from a property holding [`Value::Null`].
//! - [`PropKey`]: a field name, an index, an associative key, or one of the
//!   reserved structural keys that track key order and container size.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::target::Target;
use crate::wrapper::Wrapper;

/// A value stored in a target or carried by a change record.
#[derive(Debug, Clone)]
pub enum Value {
    /// Present, but holding nothing.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// Immutable list, used for key-order payloads in change records.
    List(Rc<[Value]>),
    /// Raw reference to a target.
    Target(Target),
    /// Reference to a wrapper.
    Wrapper(Wrapper),
}

impl Value {
    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Target(_) => "target",
            Self::Wrapper(_) => "wrapper",
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Self::Target(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_wrapper(&self) -> Option<&Wrapper> {
        match self {
            Self::Wrapper(w) => Some(w),
            _ => None,
        }
    }

    /// Non-negative integer as a length or index.
    pub(crate) fn as_len(&self) -> Option<usize> {
        self.as_int().and_then(|n| usize::try_from(n).ok())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Target(a), Self::Target(b)) => a.id() == b.id(),
            (Self::Wrapper(a), Self::Wrapper(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(n) => n.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::List(items) => items.hash(state),
            Self::Target(t) => t.id().hash(state),
            Self::Wrapper(w) => w.id().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Target(t) => write!(f, "<target {}>", t.id()),
            Self::Wrapper(w) => write!(f, "<wrapper {}>", w.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(Rc::from(items))
    }
}

impl From<Target> for Value {
    fn from(t: Target) -> Self {
        Self::Target(t)
    }
}

impl From<Wrapper> for Value {
    fn from(w: Wrapper) -> Self {
        Self::Wrapper(w)
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// A property read result: a value, or the "not present" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Slot {
    Present(Value),
    #[default]
    Absent,
}

impl Slot {
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// The value, if present.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Present(v) => Some(v),
            Self::Absent => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Present(v) => Some(v),
            Self::Absent => None,
        }
    }

    pub(crate) fn of(value: Option<&Value>) -> Self {
        value.cloned().map_or(Self::Absent, Self::Present)
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Self::Present(v)
    }
}

impl From<Option<Value>> for Slot {
    fn from(v: Option<Value>) -> Self {
        v.map_or(Self::Absent, Self::Present)
    }
}

// ---------------------------------------------------------------------------
// Property keys
// ---------------------------------------------------------------------------

/// A property key: a named field, a sequence index, an associative key, or a
/// reserved structural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// Named record field.
    Field(Rc<str>),
    /// Sequence position.
    Index(usize),
    /// Associative container key, used under [`PropKey::MapValues`].
    Entry(Value),
    /// Enumeration order of a record's fields or a sequence's indices.
    OwnKeys,
    /// Key order of an associative container.
    MapKeys,
    /// Value set of an associative container.
    MapValues,
    /// Sequence length, or the length of a recorded key order.
    Length,
    /// Associative container size.
    Size,
}

impl PropKey {
    /// Named field key.
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self::Field(Rc::from(name))
    }

    /// Whether this is one of the reserved structural keys.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::OwnKeys | Self::MapKeys | Self::MapValues | Self::Length | Self::Size
        )
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(i) => write!(f, "{i}"),
            Self::Entry(v) => write!(f, "[{v}]"),
            Self::OwnKeys => write!(f, "@ownKeys"),
            Self::MapKeys => write!(f, "@mapKeys"),
            Self::MapValues => write!(f, "@mapValues"),
            Self::Length => write!(f, "length"),
            Self::Size => write!(f, "size"),
        }
    }
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        Self::field(name)
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        Self::Field(Rc::from(name))
    }
}

impl From<usize> for PropKey {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// An ordered sequence of keys locating a value within nested structure.
pub type KeyPath = Vec<PropKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashSet;

    #[test]
    fn floats_compare_by_bits() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn values_hash_consistently() {
        let mut set = AHashSet::new();
        set.insert(Value::from("a"));
        set.insert(Value::from("a"));
        set.insert(Value::from(vec![Value::Int(1), Value::Null]));
        set.insert(Value::from(vec![Value::Int(1), Value::Null]));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn targets_compare_by_identity() {
        let a = Target::record();
        let b = Target::record();
        assert_eq!(Value::from(a.clone()), Value::from(a));
        assert_ne!(Value::from(Target::record()), Value::from(b));
    }

    #[test]
    fn absent_is_not_null() {
        assert_ne!(Slot::Absent, Slot::Present(Value::Null));
        assert!(!Slot::Absent.is_present());
        assert_eq!(Slot::from(Some(Value::Int(3))).value(), Some(&Value::Int(3)));
        assert_eq!(Slot::from(None), Slot::Absent);
    }

    #[test]
    fn prop_key_display() {
        assert_eq!(PropKey::from("count").to_string(), "count");
        assert_eq!(PropKey::from(3usize).to_string(), "3");
        assert_eq!(PropKey::Entry(Value::from("k")).to_string(), "[\"k\"]");
        assert_eq!(PropKey::OwnKeys.to_string(), "@ownKeys");
        assert!(PropKey::Length.is_structural());
        assert!(!PropKey::field("x").is_structural());
    }

    #[test]
    fn value_display_nested_list() {
        let v = Value::from(vec![Value::Int(1), Value::from("a"), Value::Null]);
        assert_eq!(v.to_string(), "[1, \"a\", null]");
    }
}
