#![forbid(unsafe_code)]

//! Object storage: properties, container bodies and liveness state.

use core::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use bitflags::bitflags;

use crate::error::{ObsoleteReason, Result};
use crate::heap::Heap;
use crate::proxy::ProxyHandler;
use crate::value::{Key, ObjId, Value};

/// Accessor getter. Receives the heap and the receiver (`this`) handle.
pub type Getter = Rc<dyn Fn(&Heap, ObjId) -> Result<Value>>;

/// Accessor setter. Receives the heap, the receiver handle and the new value.
pub type Setter = Rc<dyn Fn(&Heap, ObjId, Value) -> Result<()>>;

bitflags! {
    /// Data/accessor property attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropFlags: u8 {
        const WRITABLE     = 0b001;
        const ENUMERABLE   = 0b010;
        const CONFIGURABLE = 0b100;
    }
}

impl Default for PropFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// An own property.
#[derive(Clone)]
pub enum Property {
    Data {
        value: Value,
        flags: PropFlags,
    },
    Accessor {
        get: Option<Getter>,
        set: Option<Setter>,
        flags: PropFlags,
    },
}

impl Property {
    /// Writable, enumerable, configurable data property.
    #[must_use]
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            flags: PropFlags::all(),
        }
    }

    /// Enumerable data property that can be neither written nor reconfigured.
    #[must_use]
    pub fn read_only(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            flags: PropFlags::ENUMERABLE,
        }
    }

    /// Accessor property. Accessors are not enumerable, like class accessors.
    #[must_use]
    pub fn accessor(get: Option<Getter>, set: Option<Setter>) -> Self {
        Self::Accessor {
            get,
            set,
            flags: PropFlags::CONFIGURABLE,
        }
    }

    #[must_use]
    pub fn flags(&self) -> PropFlags {
        match self {
            Self::Data { flags, .. } | Self::Accessor { flags, .. } => *flags,
        }
    }

    #[must_use]
    pub fn is_enumerable(&self) -> bool {
        self.flags().contains(PropFlags::ENUMERABLE)
    }

    #[must_use]
    pub fn is_configurable(&self) -> bool {
        self.flags().contains(PropFlags::CONFIGURABLE)
    }

    /// Whether this is a data property that may not be overwritten.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Data { flags, .. } if !flags.contains(PropFlags::WRITABLE))
    }

    /// The stored value of a data property.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data { value, flags } => f
                .debug_struct("Data")
                .field("value", value)
                .field("flags", flags)
                .finish(),
            Self::Accessor { get, set, flags } => f
                .debug_struct("Accessor")
                .field("get", &get.is_some())
                .field("set", &set.is_some())
                .field("flags", flags)
                .finish(),
        }
    }
}

/// What kind of object a handle refers to. Proxies report their target's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Plain,
    Array,
    Set,
    Map,
    WeakSet,
    WeakMap,
}

impl ObjectKind {
    /// Weak collections cannot be enumerated or merged.
    #[must_use]
    pub fn is_weak(self) -> bool {
        matches!(self, Self::WeakSet | Self::WeakMap)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "object",
            Self::Array => "array",
            Self::Set => "set",
            Self::Map => "map",
            Self::WeakSet => "weak set",
            Self::WeakMap => "weak map",
        })
    }
}

// ---------------------------------------------------------------------------
// PropertyMap
// ---------------------------------------------------------------------------

/// Insertion-ordered own properties with hashed lookup.
#[derive(Debug, Default, Clone)]
pub(crate) struct PropertyMap {
    entries: Vec<(Key, Property)>,
    index: AHashMap<Key, usize>,
}

impl PropertyMap {
    pub(crate) fn get(&self, key: &Key) -> Option<&Property> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub(crate) fn get_mut(&mut self, key: &Key) -> Option<&mut Property> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub(crate) fn contains(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace; returns whether the key is new.
    pub(crate) fn insert(&mut self, key: Key, prop: Property) -> bool {
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].1 = prop;
            false
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, prop));
            true
        }
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Option<Property> {
        let i = self.index.remove(key)?;
        let (_, prop) = self.entries.remove(i);
        for (k, _) in &self.entries[i..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(prop)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Key, &Property)> {
        self.entries.iter().map(|(k, p)| (k, p))
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&Key, &Property) -> bool) {
        self.entries.retain(|(k, p)| keep(k, p));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, (k, _))| (k.clone(), i))
            .collect();
    }
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Insertion-ordered members with SameValueZero lookup (sets, map keys).
#[derive(Debug, Default, Clone)]
pub(crate) struct Ordered<V> {
    pub(crate) entries: Vec<(Value, V)>,
    index: AHashMap<Value, usize>,
}

impl<V> Ordered<V> {
    pub(crate) fn position(&self, key: &Value) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub(crate) fn get(&self, key: &Value) -> Option<&V> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    /// Insert or replace; returns the previous value.
    pub(crate) fn insert(&mut self, key: Value, value: V) -> Option<V> {
        if let Some(i) = self.position(&key) {
            Some(core::mem::replace(&mut self.entries[i].1, value))
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
            None
        }
    }

    pub(crate) fn remove(&mut self, key: &Value) -> Option<V> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for (k, _) in &self.entries[i..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Kind-specific storage.
pub(crate) enum Body {
    Plain,
    /// `None` slots are holes.
    Array(Vec<Option<Value>>),
    Set(Ordered<()>),
    Map(Ordered<Value>),
    WeakSet,
    WeakMap,
    Proxy {
        target: ObjId,
        handler: Rc<dyn ProxyHandler>,
    },
}

impl Body {
    pub(crate) fn kind(&self) -> Option<ObjectKind> {
        Some(match self {
            Self::Plain => ObjectKind::Plain,
            Self::Array(_) => ObjectKind::Array,
            Self::Set(_) => ObjectKind::Set,
            Self::Map(_) => ObjectKind::Map,
            Self::WeakSet => ObjectKind::WeakSet,
            Self::WeakMap => ObjectKind::WeakMap,
            Self::Proxy { .. } => return None,
        })
    }
}

/// Liveness of an object.
#[derive(Debug, Clone, Default)]
pub(crate) enum Liveness {
    #[default]
    Live,
    Obsolete(Rc<ObsoleteReason>),
}

pub(crate) struct Object {
    pub(crate) proto: Option<ObjId>,
    pub(crate) props: PropertyMap,
    pub(crate) body: Body,
    pub(crate) liveness: Liveness,
    /// Out-of-graph write tracking installed.
    pub(crate) enhanced: bool,
}

impl Object {
    pub(crate) fn new(proto: Option<ObjId>, body: Body) -> Self {
        Self {
            proto,
            props: PropertyMap::default(),
            body,
            liveness: Liveness::Live,
            enhanced: false,
        }
    }
}
