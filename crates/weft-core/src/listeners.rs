#![forbid(unsafe_code)]

//! Write-listener registries.
//!
//! Every tracked object owns a [`ListenerBag`] created lazily on first
//! subscription. A bag holds separate listener sets per write category so a
//! write only wakes the listeners whose reads it could have invalidated.
//!
//! Bags are kept in per-kind tables (plain objects, arrays, sets, maps) keyed
//! by handle. Entries are never destroyed by unsubscription; they are dropped
//! only when the object is invalidated.
//!
//! # Invariants
//!
//! 1. A listener appears at most once in any single listener set.
//! 2. `listeners_for` returns each listener at most once, in first-seen order,
//!    even when it is registered under several matching categories.
//! 3. Registries are pure bookkeeping: nothing here fires a listener.

use core::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::object::ObjectKind;
use crate::value::{Key, ObjId, Value};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a listener; used to de-duplicate notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// A write listener: a shared callback with a stable identity.
///
/// Clones share identity, so registering a clone under two categories still
/// notifies once.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Rc<dyn Fn()>,
}

impl Listener {
    pub fn new(callback: impl Fn() + 'static) -> Self {
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Rc::new(callback),
        }
    }

    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn fire(&self) {
        (self.callback)();
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.id.0).finish()
    }
}

bitflags! {
    /// Categories of change a write can cause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteCategory: u8 {
        /// The value stored under one or more keys changed.
        const PROPERTY         = 0b00_0001;
        /// The set of own keys changed.
        const OWN_KEYS         = 0b00_0010;
        /// A map key or set member was added or removed.
        const MAP_KEY_PRESENCE = 0b00_0100;
        /// The value stored under a map key changed.
        const MAP_KEY_VALUE    = 0b00_1000;
        /// A write whose footprint is not individually modeled.
        const UNSPECIFIC       = 0b01_0000;
        /// Any write at all.
        const ANY              = 0b10_0000;
    }
}

/// What a single mutation touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Footprint {
    pub categories: WriteCategory,
    /// Keys whose values changed (with [`WriteCategory::PROPERTY`]).
    pub keys: SmallVec<[Key; 2]>,
    /// Map keys / set members touched (with the `MAP_KEY_*` categories).
    pub map_keys: SmallVec<[Value; 1]>,
}

impl Footprint {
    /// Nothing changed.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A property value changed; `added` when the key did not exist before.
    #[must_use]
    pub fn property(key: Key, added: bool) -> Self {
        let mut categories = WriteCategory::PROPERTY | WriteCategory::ANY;
        if added {
            categories |= WriteCategory::OWN_KEYS;
        }
        Self {
            categories,
            keys: SmallVec::from_iter([key]),
            map_keys: SmallVec::new(),
        }
    }

    /// An own key disappeared.
    #[must_use]
    pub fn removed(key: Key) -> Self {
        Self {
            categories: WriteCategory::OWN_KEYS | WriteCategory::ANY,
            keys: SmallVec::from_iter([key]),
            map_keys: SmallVec::new(),
        }
    }

    /// A structural change that is not modeled key by key.
    #[must_use]
    pub fn unspecific() -> Self {
        Self {
            categories: WriteCategory::UNSPECIFIC | WriteCategory::ANY,
            ..Self::default()
        }
    }

    /// A map key (or set member) was added or removed.
    #[must_use]
    pub fn map_presence(key: Value) -> Self {
        Self {
            categories: WriteCategory::MAP_KEY_PRESENCE | WriteCategory::ANY,
            keys: SmallVec::new(),
            map_keys: SmallVec::from_iter([key]),
        }
    }

    /// The value under an existing map key changed.
    #[must_use]
    pub fn map_value(key: Value) -> Self {
        Self {
            categories: WriteCategory::MAP_KEY_VALUE | WriteCategory::ANY,
            keys: SmallVec::new(),
            map_keys: SmallVec::from_iter([key]),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Union of two footprints.
    pub fn merge(&mut self, other: Footprint) {
        self.categories |= other.categories;
        self.keys.extend(other.keys);
        self.map_keys.extend(other.map_keys);
    }
}

/// A subscription target within one object's bag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
    Property(Key),
    OwnKeys,
    MapKeyPresence(Value),
    MapKeyValue(Value),
    Unspecific,
    Any,
}

// ---------------------------------------------------------------------------
// ListenerSet / ListenerBag
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct ListenerSet {
    listeners: SmallVec<[Listener; 2]>,
}

impl ListenerSet {
    /// Add a listener; returns `false` if it was already present.
    pub fn insert(&mut self, listener: Listener) -> bool {
        if self.listeners.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id() != id);
        before != self.listeners.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.iter()
    }
}

/// Every listener set registered for one object.
#[derive(Debug, Default)]
pub struct ListenerBag {
    by_property: AHashMap<Key, ListenerSet>,
    own_keys: ListenerSet,
    map_key_presence: AHashMap<Value, ListenerSet>,
    map_key_value: AHashMap<Value, ListenerSet>,
    unspecific: ListenerSet,
    any: ListenerSet,
}

impl ListenerBag {
    fn set_mut(&mut self, interest: &Interest) -> &mut ListenerSet {
        match interest {
            Interest::Property(key) => self.by_property.entry(key.clone()).or_default(),
            Interest::OwnKeys => &mut self.own_keys,
            Interest::MapKeyPresence(key) => self.map_key_presence.entry(key.clone()).or_default(),
            Interest::MapKeyValue(key) => self.map_key_value.entry(key.clone()).or_default(),
            Interest::Unspecific => &mut self.unspecific,
            Interest::Any => &mut self.any,
        }
    }

    fn set(&self, interest: &Interest) -> Option<&ListenerSet> {
        match interest {
            Interest::Property(key) => self.by_property.get(key),
            Interest::OwnKeys => Some(&self.own_keys),
            Interest::MapKeyPresence(key) => self.map_key_presence.get(key),
            Interest::MapKeyValue(key) => self.map_key_value.get(key),
            Interest::Unspecific => Some(&self.unspecific),
            Interest::Any => Some(&self.any),
        }
    }

    /// Number of listeners registered for `interest`.
    #[must_use]
    pub fn count(&self, interest: &Interest) -> usize {
        self.set(interest).map_or(0, ListenerSet::len)
    }

    fn collect(&self, footprint: &Footprint, out: &mut Vec<Listener>) {
        let mut seen = AHashSet::new();
        let mut push = |set: &ListenerSet| {
            for listener in set.iter() {
                if seen.insert(listener.id()) {
                    out.push(listener.clone());
                }
            }
        };
        let cats = footprint.categories;
        if cats.contains(WriteCategory::PROPERTY) {
            for key in &footprint.keys {
                if let Some(set) = self.by_property.get(key) {
                    push(set);
                }
            }
        }
        if cats.contains(WriteCategory::OWN_KEYS) {
            push(&self.own_keys);
        }
        if cats.contains(WriteCategory::MAP_KEY_PRESENCE) {
            for key in &footprint.map_keys {
                if let Some(set) = self.map_key_presence.get(key) {
                    push(set);
                }
            }
        }
        if cats.contains(WriteCategory::MAP_KEY_VALUE) {
            for key in &footprint.map_keys {
                if let Some(set) = self.map_key_value.get(key) {
                    push(set);
                }
            }
        }
        if cats.contains(WriteCategory::UNSPECIFIC) {
            push(&self.unspecific);
        }
        if cats.contains(WriteCategory::ANY) {
            push(&self.any);
        }
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// Per-kind listener tables.
#[derive(Debug, Default)]
pub struct Registries {
    objects: AHashMap<ObjId, ListenerBag>,
    arrays: AHashMap<ObjId, ListenerBag>,
    sets: AHashMap<ObjId, ListenerBag>,
    maps: AHashMap<ObjId, ListenerBag>,
}

impl Registries {
    fn table(&self, kind: ObjectKind) -> Option<&AHashMap<ObjId, ListenerBag>> {
        match kind {
            ObjectKind::Plain => Some(&self.objects),
            ObjectKind::Array => Some(&self.arrays),
            ObjectKind::Set => Some(&self.sets),
            ObjectKind::Map => Some(&self.maps),
            ObjectKind::WeakSet | ObjectKind::WeakMap => None,
        }
    }

    fn table_mut(&mut self, kind: ObjectKind) -> Option<&mut AHashMap<ObjId, ListenerBag>> {
        match kind {
            ObjectKind::Plain => Some(&mut self.objects),
            ObjectKind::Array => Some(&mut self.arrays),
            ObjectKind::Set => Some(&mut self.sets),
            ObjectKind::Map => Some(&mut self.maps),
            ObjectKind::WeakSet | ObjectKind::WeakMap => None,
        }
    }

    /// The bag for `target`, created if absent. Weak collections have none.
    pub fn get_or_create(&mut self, kind: ObjectKind, target: ObjId) -> Option<&mut ListenerBag> {
        self.table_mut(kind)
            .map(|table| table.entry(target).or_default())
    }

    #[must_use]
    pub fn get(&self, kind: ObjectKind, target: ObjId) -> Option<&ListenerBag> {
        self.table(kind).and_then(|table| table.get(&target))
    }

    /// Register `listener`; returns `false` if it was already registered.
    pub fn add(
        &mut self,
        kind: ObjectKind,
        target: ObjId,
        interest: &Interest,
        listener: Listener,
    ) -> bool {
        self.get_or_create(kind, target)
            .is_some_and(|bag| bag.set_mut(interest).insert(listener))
    }

    pub fn remove(
        &mut self,
        kind: ObjectKind,
        target: ObjId,
        interest: &Interest,
        id: ListenerId,
    ) -> bool {
        self.table_mut(kind)
            .and_then(|table| table.get_mut(&target))
            .is_some_and(|bag| bag.set_mut(interest).remove(id))
    }

    /// Listeners that must hear about `footprint` on `target`, de-duplicated.
    #[must_use]
    pub fn listeners_for(
        &self,
        kind: ObjectKind,
        target: ObjId,
        footprint: &Footprint,
    ) -> Vec<Listener> {
        let mut out = Vec::new();
        if let Some(bag) = self.get(kind, target) {
            bag.collect(footprint, &mut out);
        }
        out
    }

    /// Drop every bag registered for `target`.
    pub fn retire(&mut self, target: ObjId) {
        self.objects.remove(&target);
        self.arrays.remove(&target);
        self.sets.remove(&target);
        self.maps.remove(&target);
    }
}
