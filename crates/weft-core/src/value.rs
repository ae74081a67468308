#![forbid(unsafe_code)]

//! Values, property keys and object handles.
//!
//! A [`Value`] is either a primitive or a handle ([`ObjId`]) to an object that
//! lives in a [`Heap`](crate::Heap). Handles are opaque, copyable and never
//! reused within a heap, so handle equality is object identity.
//!
//! # Equality
//!
//! `Value` equality is SameValueZero: `NaN` equals `NaN`, `+0` equals `-0`,
//! strings compare by content, and objects compare by handle. This is the
//! comparison used for "did a write actually change anything" and for
//! recorded-read equality.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::rc::Rc;

// ---------------------------------------------------------------------------
// ObjId
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on a [`Heap`](crate::Heap).
///
/// A handle names a slot and the generation the slot had when the object was
/// allocated. Once the object is retired the slot may hold another object
/// under a later generation; the old handle then refers to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId {
    slot: usize,
    generation: u32,
}

impl ObjId {
    pub(crate) const fn new(slot: usize, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Raw slot index, useful for diagnostics.
    #[must_use]
    pub fn index(self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.slot)
        } else {
            write!(f, "#{}v{}", self.slot, self.generation)
        }
    }
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A property key: an array index or a named property.
///
/// `Key::from("3")` is a *name*, not an index; array slots are addressed with
/// `Key::from(3usize)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Array element index.
    Index(usize),
    /// Named property.
    Name(Rc<str>),
}

impl Key {
    /// Named key.
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }

    /// The index, when this is an index key.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(_) => None,
        }
    }

    /// The name, when this is a named key.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(n) => Some(n),
            Self::Index(_) => None,
        }
    }

    /// Whether this is the `length` key of arrays.
    #[must_use]
    pub fn is_length(&self) -> bool {
        self.as_name() == Some("length")
    }

    /// Whether this is the `size` key of sets and maps.
    #[must_use]
    pub fn is_size(&self) -> bool {
        self.as_name() == Some("size")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::name(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Name(Rc::from(s))
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A primitive or an object handle.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// IEEE-754 double.
    Number(f64),
    /// Immutable string.
    Str(Rc<str>),
    /// Handle to a heap object (ordinary or proxy).
    Object(ObjId),
}

impl Value {
    /// String value.
    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// The object handle, if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<ObjId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether this value is an object handle.
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Whether this value is `Undefined`.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Whether this value is `Undefined` or `Null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// The number, if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string slice, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// SameValueZero comparison.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }

    /// Name of the value's type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Undefined | Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => canonical_bits(*n).hash(state),
            Self::Str(s) => s.hash(state),
            Self::Object(id) => id.hash(state),
        }
    }
}

/// Bit pattern under which SameValueZero-equal numbers hash identically.
fn canonical_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0
    } else {
        n.to_bits()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<ObjId> for Value {
    fn from(id: ObjId) -> Self {
        Self::Object(id)
    }
}
