#![forbid(unsafe_code)]

//! The object heap.
//!
//! [`Heap`] is a cheap-clone, single-threaded arena of objects addressed by
//! [`ObjId`] handles. It owns the write-listener registries and the listener
//! coalescer, so every path that mutates an object (tracking wrappers,
//! enhanced raw objects, reconciliation) fires listeners the same way.
//!
//! # Operation families
//!
//! - *Dispatching* operations ([`get`](Heap::get), [`set`](Heap::set),
//!   [`delete`](Heap::delete), [`own_keys`](Heap::own_keys),
//!   [`invoke`](Heap::invoke), ...) route proxies through their handler and
//!   apply ordinary semantics otherwise. Ordinary writes fire listeners only on
//!   enhanced objects.
//! - *Ordinary* operations ([`ordinary_get`](Heap::ordinary_get),
//!   [`write_own`](Heap::write_own), [`delete_own`](Heap::delete_own),
//!   [`apply_method`](Heap::apply_method)) act on a non-proxy target and never
//!   notify; they report a [`Footprint`] instead. Proxy handlers build on them.
//! - *Tracked* operations ([`tracked_write`](Heap::tracked_write),
//!   [`tracked_delete`](Heap::tracked_delete),
//!   [`tracked_apply`](Heap::tracked_apply)) perform an ordinary operation
//!   inside the target's coalescing frame and notify its listeners.
//!
//! # Invariants
//!
//! 1. A handle is never reissued: a retired slot is reused only under a new
//!    generation, and stale handles fail with [`WeftError::UnknownObject`].
//! 2. No `RefCell` borrow is held while user code (accessors, handlers,
//!    native routines, listeners) runs.
//! 3. A write that stores a SameValueZero-equal value produces an empty
//!    footprint and notifies nobody.
//! 4. Every operation on an obsolete object (directly or through a proxy)
//!    fails with [`WeftError::Obsolete`].
//!
//! # Failure Modes
//!
//! - Growing an array past [`MAX_DENSE_LEN`] slots, by index or by `length`,
//!   fails with [`WeftError::ArrayCapacity`] and leaves the array unchanged.

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use crate::coalesce::Coalescer;
use crate::error::{ObsoleteError, ObsoleteReason, Result, WeftError};
use crate::listeners::{Footprint, Interest, Listener, ListenerId, Registries, WriteCategory};
use crate::object::{Body, Liveness, Object, ObjectKind, Ordered, PropFlags, Property};
use crate::proxy::{Completion, Method, ProxyHandler};
use crate::value::{Key, ObjId, Value};

/// Maximum prototype chain length walked before assuming corruption.
const MAX_PROTO_DEPTH: usize = 1024;

/// Largest length an array may grow to. Arrays store every slot, holes
/// included, so growth is bounded well below the 2^32 - 1 index space.
pub const MAX_DENSE_LEN: usize = 1 << 24;

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

struct Slot {
    generation: u32,
    object: Option<Object>,
}

/// Object slots with generation-checked reuse.
#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl Arena {
    fn insert(&mut self, object: Object) -> ObjId {
        self.live += 1;
        while let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index) {
                slot.object = Some(object);
                return ObjId::new(index, slot.generation);
            }
        }
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
        });
        ObjId::new(self.slots.len() - 1, 0)
    }

    fn get(&self, id: ObjId) -> Option<&Object> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.object.as_ref())
    }

    fn get_mut(&mut self, id: ObjId) -> Option<&mut Object> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.object.as_mut())
    }

    fn remove(&mut self, id: ObjId) -> Option<Object> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())?;
        let object = slot.object.take()?;
        self.live -= 1;
        // A slot whose generation would wrap is never handed out again.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(id.index());
        }
        Some(object)
    }
}

struct HeapInner {
    objects: RefCell<Arena>,
    registries: RefCell<Registries>,
    coalescer: Coalescer,
}

/// Shared handle to an object heap.
#[derive(Clone)]
pub struct Heap {
    inner: Rc<HeapInner>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.inner.objects.borrow();
        f.debug_struct("Heap")
            .field("objects", &arena.live)
            .field("slots", &arena.slots.len())
            .finish()
    }
}

/// What currently occupies an own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnSlot {
    Absent,
    Element,
    Data { writable: bool, configurable: bool },
    Accessor { configurable: bool },
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HeapInner {
                objects: RefCell::new(Arena::default()),
                registries: RefCell::new(Registries::default()),
                coalescer: Coalescer::new(),
            }),
        }
    }

    /// Number of allocated objects that have not been retired.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.inner.objects.borrow().live
    }

    /// Whether two handles share the same heap.
    #[must_use]
    pub fn ptr_eq(&self, other: &Heap) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    fn alloc(&self, proto: Option<ObjId>, body: Body) -> ObjId {
        self.inner.objects.borrow_mut().insert(Object::new(proto, body))
    }

    /// Free the object behind `id`, dropping its storage, its proxy handler
    /// and its listener bags. Every copy of the handle becomes unknown.
    ///
    /// Retiring an object that is still referenced from the graph leaves
    /// dangling handles behind; callers retire objects only they can reach,
    /// such as tracking wrappers.
    pub fn retire(&self, id: ObjId) -> Result<()> {
        let removed = self
            .inner
            .objects
            .borrow_mut()
            .remove(id)
            .ok_or(WeftError::UnknownObject { id })?;
        self.inner.registries.borrow_mut().retire(id);
        tracing::trace!(object = %id, "retired object");
        // Handlers may own other heap handles; drop them with no borrow held.
        drop(removed);
        Ok(())
    }

    pub fn new_object(&self) -> ObjId {
        self.alloc(None, Body::Plain)
    }

    /// Plain object whose prototype is `proto` (a "class instance").
    pub fn new_object_with_proto(&self, proto: ObjId) -> ObjId {
        self.alloc(Some(proto), Body::Plain)
    }

    /// Plain object with the given data properties, in order.
    pub fn object_from<K: Into<Key>, V: Into<Value>>(
        &self,
        props: impl IntoIterator<Item = (K, V)>,
    ) -> ObjId {
        let id = self.new_object();
        let mut objects = self.inner.objects.borrow_mut();
        if let Some(object) = objects.get_mut(id) {
            for (k, v) in props {
                object.props.insert(k.into(), Property::data(v));
            }
        }
        id
    }

    pub fn new_array(&self, values: impl IntoIterator<Item = Value>) -> ObjId {
        self.alloc(None, Body::Array(values.into_iter().map(Some).collect()))
    }

    /// Array whose `None` slots are holes.
    pub fn new_sparse_array(&self, slots: impl IntoIterator<Item = Option<Value>>) -> ObjId {
        self.alloc(None, Body::Array(slots.into_iter().collect()))
    }

    pub fn new_set(&self, members: impl IntoIterator<Item = Value>) -> ObjId {
        let mut set = Ordered::default();
        for m in members {
            set.insert(m, ());
        }
        self.alloc(None, Body::Set(set))
    }

    pub fn new_map(&self, entries: impl IntoIterator<Item = (Value, Value)>) -> ObjId {
        let mut map = Ordered::default();
        for (k, v) in entries {
            map.insert(k, v);
        }
        self.alloc(None, Body::Map(map))
    }

    pub fn new_weak_set(&self) -> ObjId {
        self.alloc(None, Body::WeakSet)
    }

    pub fn new_weak_map(&self) -> ObjId {
        self.alloc(None, Body::WeakMap)
    }

    /// Proxy object routing every operation on it through `handler`.
    pub fn new_proxy(&self, target: ObjId, handler: Rc<dyn ProxyHandler>) -> Result<ObjId> {
        self.with(target, |_| ())?;
        Ok(self.alloc(None, Body::Proxy { target, handler }))
    }

    // -----------------------------------------------------------------------
    // Internal access
    // -----------------------------------------------------------------------

    fn with<R>(&self, id: ObjId, f: impl FnOnce(&Object) -> R) -> Result<R> {
        let objects = self.inner.objects.borrow();
        let object = objects
            .get(id)
            .ok_or(WeftError::UnknownObject { id })?;
        Ok(f(object))
    }

    pub(crate) fn with_live<R>(&self, id: ObjId, f: impl FnOnce(&Object) -> R) -> Result<R> {
        let objects = self.inner.objects.borrow();
        let object = objects
            .get(id)
            .ok_or(WeftError::UnknownObject { id })?;
        check_live(id, object)?;
        Ok(f(object))
    }

    pub(crate) fn with_live_mut<R>(&self, id: ObjId, f: impl FnOnce(&mut Object) -> Result<R>) -> Result<R> {
        let mut objects = self.inner.objects.borrow_mut();
        let object = objects
            .get_mut(id)
            .ok_or(WeftError::UnknownObject { id })?;
        check_live(id, object)?;
        f(object)
    }

    /// Read-only access to a live, non-proxy object's storage.
    pub(crate) fn inspect<R>(&self, id: ObjId, f: impl FnOnce(&Object) -> R) -> Result<R> {
        self.with_live(self.resolve(id), f)
    }

    fn proxy_parts(&self, id: ObjId) -> Result<Option<(ObjId, Rc<dyn ProxyHandler>)>> {
        self.with(id, |o| match &o.body {
            Body::Proxy { target, handler } => Some((*target, Rc::clone(handler))),
            _ => None,
        })
    }

    /// Whether `id` is a known handle.
    #[must_use]
    pub fn contains(&self, id: ObjId) -> bool {
        self.inner.objects.borrow().get(id).is_some()
    }

    #[must_use]
    pub fn is_proxy(&self, id: ObjId) -> bool {
        self.proxy_target(id).is_some()
    }

    /// The direct target of a proxy.
    #[must_use]
    pub fn proxy_target(&self, id: ObjId) -> Option<ObjId> {
        self.with(id, |o| match &o.body {
            Body::Proxy { target, .. } => Some(*target),
            _ => None,
        })
        .ok()
        .flatten()
    }

    /// Follow proxies down to the ordinary object they stand for.
    #[must_use]
    pub fn resolve(&self, id: ObjId) -> ObjId {
        let mut current = id;
        while let Some(target) = self.proxy_target(current) {
            current = target;
        }
        current
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Kind of the object; proxies report their target's kind.
    pub fn kind(&self, id: ObjId) -> Result<ObjectKind> {
        let target = self.resolve(id);
        self.with_live(target, |o| o.body.kind())?
            .ok_or_else(|| WeftError::invariant(format!("{target} resolved to a proxy")))
    }

    pub fn prototype_of(&self, id: ObjId) -> Result<Option<ObjId>> {
        self.with_live(self.resolve(id), |o| o.proto)
    }

    /// Replace the prototype. Cyclic chains are rejected.
    pub fn set_prototype_of(&self, id: ObjId, proto: Option<ObjId>) -> Result<()> {
        let target = self.resolve(id);
        let mut cursor = proto;
        let mut depth = 0;
        while let Some(p) = cursor {
            if self.resolve(p) == target {
                return Err(WeftError::invariant(format!(
                    "setting the prototype of {target} would create a cycle"
                )));
            }
            depth += 1;
            if depth > MAX_PROTO_DEPTH {
                return Err(WeftError::invariant("prototype chain too deep"));
            }
            cursor = self.prototype_of(p)?;
        }
        self.with_live_mut(target, |o| {
            o.proto = proto;
            Ok(())
        })
    }

    /// Whether `proto` appears on the prototype chain of `id`.
    pub fn instance_of(&self, id: ObjId, proto: ObjId) -> Result<bool> {
        let wanted = self.resolve(proto);
        let mut cursor = self.prototype_of(id)?;
        let mut depth = 0;
        while let Some(p) = cursor {
            if self.resolve(p) == wanted {
                return Ok(true);
            }
            depth += 1;
            if depth > MAX_PROTO_DEPTH {
                return Err(WeftError::invariant("prototype chain too deep"));
            }
            cursor = self.prototype_of(p)?;
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Dispatching operations
    // -----------------------------------------------------------------------

    pub fn get(&self, id: ObjId, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        match self.proxy_parts(id)? {
            Some((target, handler)) => handler.get(self, target, &key, id),
            None => self.ordinary_get(id, &key, id),
        }
    }

    /// Read a chain of keys; stops at the first non-object.
    pub fn get_path(&self, id: ObjId, path: &[Key]) -> Result<Value> {
        let mut current = Value::Object(id);
        for key in path {
            match current {
                Value::Object(obj) => current = self.get(obj, key.clone())?,
                _ => return Ok(Value::Undefined),
            }
        }
        Ok(current)
    }

    pub fn set(&self, id: ObjId, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        match self.proxy_parts(id)? {
            Some((target, handler)) => handler.set(self, target, &key, value, id),
            None => self.ordinary_set(id, &key, value, id),
        }
    }

    /// Delete an own property or array element. Returns `false` when the
    /// property exists but is not configurable.
    pub fn delete(&self, id: ObjId, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        if let Some((target, handler)) = self.proxy_parts(id)? {
            return handler.delete(self, target, &key);
        }
        if self.is_enhanced(id)? {
            return self.tracked_delete(id, &key);
        }
        match self.own_slot(id, &key)? {
            OwnSlot::Absent => Ok(true),
            OwnSlot::Data {
                configurable: false,
                ..
            }
            | OwnSlot::Accessor {
                configurable: false,
            } => Ok(false),
            _ => self.delete_own(id, &key).map(|_| true),
        }
    }

    pub fn has(&self, id: ObjId, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        if let Some((target, handler)) = self.proxy_parts(id)? {
            return handler.has(self, target, &key);
        }
        if self.own_slot(id, &key)? != OwnSlot::Absent {
            return Ok(true);
        }
        Ok(self.lookup_property(id, &key)?.is_some())
    }

    /// Whether the resolved target has `key` as an own property or element.
    pub fn has_own(&self, id: ObjId, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        Ok(self.own_slot(self.resolve(id), &key)? != OwnSlot::Absent)
    }

    /// Enumerable own keys: present array indices first, then named
    /// properties in insertion order.
    pub fn own_keys(&self, id: ObjId) -> Result<Vec<Key>> {
        if let Some((target, handler)) = self.proxy_parts(id)? {
            return handler.own_keys(self, target);
        }
        self.ordinary_own_keys(id)
    }

    pub fn define_property(&self, id: ObjId, key: impl Into<Key>, prop: Property) -> Result<()> {
        let key = key.into();
        if let Some((target, handler)) = self.proxy_parts(id)? {
            return handler.define_property(self, target, key, prop);
        }
        let footprint = self.with_live_mut(id, |o| {
            if matches!(o.body, Body::Array(_)) && (key.as_index().is_some() || key.is_length()) {
                return Err(WeftError::unsupported(format!(
                    "defining array slot `{key}` as a property"
                )));
            }
            if let Some(existing) = o.props.get(&key) {
                if !existing.is_configurable() {
                    return Err(WeftError::unsupported(format!(
                        "redefining non-configurable property `{key}`"
                    )));
                }
            }
            let added = o.props.insert(key.clone(), prop);
            Ok(Footprint::property(key.clone(), added))
        })?;
        if self.is_enhanced(id)? {
            self.notify_write(id, &footprint);
        }
        Ok(())
    }

    /// Run a high-level container method.
    pub fn invoke(&self, id: ObjId, method: Method) -> Result<Completion> {
        if let Some((target, handler)) = self.proxy_parts(id)? {
            return handler.invoke(self, target, method, id);
        }
        if !method.is_read_only() && self.is_enhanced(id)? {
            return self.tracked_apply(id, method);
        }
        self.apply_method(id, method).map(|(completion, _)| completion)
    }

    // -----------------------------------------------------------------------
    // Ordinary operations
    // -----------------------------------------------------------------------

    /// Own or inherited named property, walking the prototype chain.
    pub fn lookup_property(&self, id: ObjId, key: &Key) -> Result<Option<Property>> {
        let mut cursor = Some(self.resolve(id));
        let mut depth = 0;
        while let Some(obj) = cursor {
            let (found, next) = self.with_live(obj, |o| (o.props.get(key).cloned(), o.proto))?;
            if found.is_some() {
                return Ok(found);
            }
            depth += 1;
            if depth > MAX_PROTO_DEPTH {
                return Err(WeftError::invariant("prototype chain too deep"));
            }
            cursor = next.map(|p| self.resolve(p));
        }
        Ok(None)
    }

    /// The own property stored under `key`, without consulting prototypes.
    pub fn own_property(&self, id: ObjId, key: &Key) -> Result<Option<Property>> {
        self.with_live(self.resolve(id), |o| o.props.get(key).cloned())
    }

    fn own_slot(&self, id: ObjId, key: &Key) -> Result<OwnSlot> {
        self.with_live(id, |o| {
            if let (Body::Array(slots), Some(i)) = (&o.body, key.as_index()) {
                return if slots.get(i).is_some_and(Option::is_some) {
                    OwnSlot::Element
                } else {
                    OwnSlot::Absent
                };
            }
            match o.props.get(key) {
                None => OwnSlot::Absent,
                Some(Property::Data { flags, .. }) => OwnSlot::Data {
                    writable: flags.contains(PropFlags::WRITABLE),
                    configurable: flags.contains(PropFlags::CONFIGURABLE),
                },
                Some(Property::Accessor { flags, .. }) => OwnSlot::Accessor {
                    configurable: flags.contains(PropFlags::CONFIGURABLE),
                },
            }
        })
    }

    /// Element-like reads: array slots and `length`, set/map `size`.
    fn element_get(&self, target: ObjId, key: &Key) -> Result<Option<Value>> {
        self.with_live(target, |o| match (&o.body, key) {
            (Body::Array(slots), Key::Index(i)) => {
                Some(slots.get(*i).cloned().flatten().unwrap_or_default())
            }
            (Body::Array(slots), k) if k.is_length() => Some(Value::from(slots.len())),
            (Body::Set(set), k) if k.is_size() => Some(Value::from(set.len())),
            (Body::Map(map), k) if k.is_size() => Some(Value::from(map.len())),
            _ => None,
        })
    }

    /// Ordinary `[[Get]]`: accessors run with `receiver` as `this`.
    pub fn ordinary_get(&self, target: ObjId, key: &Key, receiver: ObjId) -> Result<Value> {
        if let Some(value) = self.element_get(target, key)? {
            return Ok(value);
        }
        match self.lookup_property(target, key)? {
            Some(Property::Data { value, .. }) => Ok(value),
            Some(Property::Accessor { get: Some(getter), .. }) => getter(self, receiver),
            Some(Property::Accessor { get: None, .. }) | None => Ok(Value::Undefined),
        }
    }

    /// Ordinary `[[Set]]`: setters run with `receiver` as `this`; data writes
    /// notify listeners when the target is enhanced.
    pub fn ordinary_set(&self, target: ObjId, key: &Key, value: Value, receiver: ObjId) -> Result<()> {
        match self.lookup_property(target, key)? {
            Some(Property::Accessor { set: Some(setter), .. }) => {
                if self.is_enhanced(target)? {
                    return self.batch(target, || setter(self, receiver, value));
                }
                return setter(self, receiver, value);
            }
            Some(Property::Accessor { set: None, .. }) => {
                return Err(WeftError::NoSetter { key: key.clone() });
            }
            Some(prop) if prop.is_read_only() => {
                return Err(WeftError::NotWritable { key: key.clone() });
            }
            _ => {}
        }
        if self.is_enhanced(target)? {
            self.tracked_write(target, key, value)
        } else {
            self.write_own(target, key, value).map(drop)
        }
    }

    /// Store `value` as an own data property or element of `target` without
    /// notifying. Returns what changed; equal values change nothing.
    pub fn write_own(&self, target: ObjId, key: &Key, value: Value) -> Result<Footprint> {
        self.with_live_mut(target, |o| {
            if let Body::Array(slots) = &mut o.body {
                if let Some(i) = key.as_index() {
                    return write_element(slots, i, value);
                }
                if key.is_length() {
                    return resize_array(slots, &value);
                }
            }
            if matches!(o.body, Body::Proxy { .. }) {
                return Err(WeftError::invariant("write_own called on a proxy"));
            }
            match o.props.get_mut(key) {
                Some(Property::Data { value: current, flags }) => {
                    if !flags.contains(PropFlags::WRITABLE) {
                        return Err(WeftError::NotWritable { key: key.clone() });
                    }
                    if current.same_value(&value) {
                        return Ok(Footprint::none());
                    }
                    *current = value;
                    Ok(Footprint::property(key.clone(), false))
                }
                Some(Property::Accessor { .. }) => Err(WeftError::NoSetter { key: key.clone() }),
                None => {
                    o.props.insert(key.clone(), Property::data(value));
                    Ok(Footprint::property(key.clone(), true))
                }
            }
        })
    }

    /// Remove an own property or turn an array element into a hole, without
    /// notifying. Non-configurable properties are left alone.
    pub fn delete_own(&self, target: ObjId, key: &Key) -> Result<Footprint> {
        self.with_live_mut(target, |o| {
            if let Body::Array(slots) = &mut o.body {
                if let Some(i) = key.as_index() {
                    return Ok(match slots.get_mut(i) {
                        Some(slot @ Some(_)) => {
                            *slot = None;
                            Footprint::removed(key.clone())
                        }
                        _ => Footprint::none(),
                    });
                }
            }
            match o.props.get(key) {
                Some(prop) if prop.is_configurable() => {
                    o.props.remove(key);
                    Ok(Footprint::removed(key.clone()))
                }
                _ => Ok(Footprint::none()),
            }
        })
    }

    pub fn ordinary_own_keys(&self, target: ObjId) -> Result<Vec<Key>> {
        self.with_live(target, |o| {
            let mut keys = Vec::new();
            if let Body::Array(slots) = &o.body {
                keys.extend(
                    slots
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.is_some())
                        .map(|(i, _)| Key::Index(i)),
                );
            }
            keys.extend(
                o.props
                    .iter()
                    .filter(|(_, p)| p.is_enumerable())
                    .map(|(k, _)| k.clone()),
            );
            keys
        })
    }

    // -----------------------------------------------------------------------
    // Tracked operations
    // -----------------------------------------------------------------------

    /// Run `f` inside the coalescing frame of `target`: listeners triggered by
    /// writes to `target` during `f` fire once, after `f` returns.
    pub fn batch<R>(&self, target: ObjId, f: impl FnOnce() -> R) -> R {
        self.inner
            .coalescer
            .run_once_after(self.resolve(target), |_| f())
    }

    /// Whether a coalescing frame is open for `target`.
    #[must_use]
    pub fn in_batch(&self, target: ObjId) -> bool {
        self.inner.coalescer.is_open(self.resolve(target))
    }

    /// Notify the listeners of `target` matching `footprint`.
    pub fn notify_write(&self, target: ObjId, footprint: &Footprint) {
        if footprint.is_empty() {
            return;
        }
        let target = self.resolve(target);
        let Ok(Some(kind)) = self.with(target, |o| o.body.kind()) else {
            return;
        };
        let listeners = self
            .inner
            .registries
            .borrow()
            .listeners_for(kind, target, footprint);
        if listeners.is_empty() {
            return;
        }
        self.inner
            .coalescer
            .run_once_after(target, |collector| collector.collect(listeners));
    }

    /// [`write_own`](Self::write_own) plus notification.
    pub fn tracked_write(&self, target: ObjId, key: &Key, value: Value) -> Result<()> {
        self.batch(target, || {
            let footprint = self.write_own(target, key, value)?;
            self.notify_write(target, &footprint);
            Ok(())
        })
    }

    /// Delete with notification: the property is first overwritten with
    /// `Undefined` so per-property listeners observe the transition, then
    /// removed.
    pub fn tracked_delete(&self, target: ObjId, key: &Key) -> Result<bool> {
        self.batch(target, || {
            match self.own_slot(target, key)? {
                OwnSlot::Absent => return Ok(true),
                OwnSlot::Data {
                    configurable: false,
                    ..
                }
                | OwnSlot::Accessor {
                    configurable: false,
                } => return Ok(false),
                OwnSlot::Element
                | OwnSlot::Data {
                    writable: true, ..
                } => {
                    let footprint = self.write_own(target, key, Value::Undefined)?;
                    self.notify_write(target, &footprint);
                }
                OwnSlot::Data { .. } | OwnSlot::Accessor { .. } => {}
            }
            let mut footprint = self.delete_own(target, key)?;
            if !footprint.is_empty() {
                footprint.categories |= WriteCategory::PROPERTY;
            }
            self.notify_write(target, &footprint);
            Ok(true)
        })
    }

    /// [`apply_method`](Self::apply_method) plus notification.
    pub fn tracked_apply(&self, target: ObjId, method: Method) -> Result<Completion> {
        self.batch(target, || {
            let (completion, footprint) = self.apply_method(target, method)?;
            self.notify_write(target, &footprint);
            Ok(completion)
        })
    }

    // -----------------------------------------------------------------------
    // Listener registration
    // -----------------------------------------------------------------------

    /// Register `listener` for writes to the object behind `id` matching
    /// `interest`. Returns `false` if it was already registered.
    pub fn listen(&self, id: ObjId, interest: Interest, listener: Listener) -> Result<bool> {
        let target = self.resolve(id);
        let kind = self.kind(target)?;
        if matches!(
            interest,
            Interest::MapKeyPresence(_) | Interest::MapKeyValue(_)
        ) && !matches!(kind, ObjectKind::Map | ObjectKind::Set)
        {
            return Err(WeftError::KindMismatch {
                operation: "map key subscription",
                expected: "a set or map",
                found: kind,
            });
        }
        Ok(self
            .inner
            .registries
            .borrow_mut()
            .add(kind, target, &interest, listener))
    }

    pub fn unlisten(&self, id: ObjId, interest: &Interest, listener: ListenerId) -> Result<bool> {
        let target = self.resolve(id);
        let kind = self.kind(target)?;
        Ok(self
            .inner
            .registries
            .borrow_mut()
            .remove(kind, target, interest, listener))
    }

    /// Number of listeners registered on `id` for `interest`.
    #[must_use]
    pub fn listener_count(&self, id: ObjId, interest: &Interest) -> usize {
        let target = self.resolve(id);
        let Ok(kind) = self.kind(target) else {
            return 0;
        };
        self.inner
            .registries
            .borrow()
            .get(kind, target)
            .map_or(0, |bag| bag.count(interest))
    }

    // -----------------------------------------------------------------------
    // Out-of-graph write tracking
    // -----------------------------------------------------------------------

    /// Install write tracking on the object itself, so writes made through
    /// plain handles notify listeners just like writes through a tracking
    /// wrapper. Idempotent.
    pub fn enhance(&self, id: ObjId) -> Result<()> {
        let target = self.resolve(id);
        let newly = self.with_live_mut(target, |o| {
            if o.body.kind().is_some_and(ObjectKind::is_weak) {
                return Err(WeftError::unsupported("tracking writes to a weak collection"));
            }
            Ok(!core::mem::replace(&mut o.enhanced, true))
        })?;
        if newly {
            tracing::debug!(object = %target, "enhanced for out-of-graph write tracking");
        }
        Ok(())
    }

    pub fn is_enhanced(&self, id: ObjId) -> Result<bool> {
        self.with_live(self.resolve(id), |o| o.enhanced)
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Mark the object behind `id` obsolete. Configurable own properties and
    /// container contents are dropped, listener bags are retired, and every
    /// later operation fails with [`WeftError::Obsolete`]. Idempotent.
    pub fn invalidate(&self, id: ObjId, reason: ObsoleteReason) -> Result<()> {
        let target = self.resolve(id);
        let message = reason.message.clone();
        let newly = {
            let mut objects = self.inner.objects.borrow_mut();
            let object = objects
                .get_mut(target)
                .ok_or(WeftError::UnknownObject { id: target })?;
            if matches!(object.liveness, Liveness::Obsolete(_)) {
                false
            } else {
                object.props.retain(|_, p| !p.is_configurable());
                match &mut object.body {
                    Body::Array(slots) => slots.clear(),
                    Body::Set(set) => set.clear(),
                    Body::Map(map) => map.clear(),
                    _ => {}
                }
                object.liveness = Liveness::Obsolete(Rc::new(reason));
                true
            }
        };
        if newly {
            self.inner.registries.borrow_mut().retire(target);
            tracing::debug!(object = %target, reason = %message, "invalidated obsolete object");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_obsolete(&self, id: ObjId) -> bool {
        self.with(self.resolve(id), |o| matches!(o.liveness, Liveness::Obsolete(_)))
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Raw snapshots (no accessors, no proxies, no tracking)
    // -----------------------------------------------------------------------

    /// Array slots; `None` marks a hole.
    pub fn array_slots(&self, id: ObjId) -> Result<Vec<Option<Value>>> {
        self.inspect(id, |o| match &o.body {
            Body::Array(slots) => Ok(slots.clone()),
            other => Err(kind_mismatch("array_slots", "an array", other)),
        })?
    }

    pub fn set_members(&self, id: ObjId) -> Result<Vec<Value>> {
        self.inspect(id, |o| match &o.body {
            Body::Set(set) => Ok(set.entries.iter().map(|(k, ())| k.clone()).collect()),
            other => Err(kind_mismatch("set_members", "a set", other)),
        })?
    }

    pub fn map_entries(&self, id: ObjId) -> Result<Vec<(Value, Value)>> {
        self.inspect(id, |o| match &o.body {
            Body::Map(map) => Ok(map.entries.clone()),
            other => Err(kind_mismatch("map_entries", "a map", other)),
        })?
    }

    /// Enumerable own data properties, in order.
    pub fn data_entries(&self, id: ObjId) -> Result<Vec<(Key, Value)>> {
        self.inspect(id, |o| {
            o.props
                .iter()
                .filter(|(_, p)| p.is_enumerable())
                .filter_map(|(k, p)| p.value().map(|v| (k.clone(), v.clone())))
                .collect()
        })
    }
}

fn check_live(id: ObjId, object: &Object) -> Result<()> {
    match &object.liveness {
        Liveness::Live => Ok(()),
        Liveness::Obsolete(reason) => Err(ObsoleteError {
            object: id,
            reason: Rc::clone(reason),
        }
        .into()),
    }
}

pub(crate) fn kind_mismatch(operation: &'static str, expected: &'static str, body: &Body) -> WeftError {
    match body.kind() {
        Some(found) => WeftError::KindMismatch {
            operation,
            expected,
            found,
        },
        None => WeftError::invariant(format!("{operation} reached a proxy body")),
    }
}

fn check_growth(requested: usize) -> Result<()> {
    if requested > MAX_DENSE_LEN {
        return Err(WeftError::ArrayCapacity {
            requested,
            limit: MAX_DENSE_LEN,
        });
    }
    Ok(())
}

fn write_element(slots: &mut Vec<Option<Value>>, i: usize, value: Value) -> Result<Footprint> {
    let key = Key::Index(i);
    let Some(slot) = slots.get_mut(i) else {
        check_growth(i.saturating_add(1))?;
        slots.resize(i, None);
        slots.push(Some(value));
        let mut footprint = Footprint::property(key, true);
        footprint.categories |= WriteCategory::UNSPECIFIC;
        return Ok(footprint);
    };
    match slot.as_mut() {
        None => {}
        Some(current) if current.same_value(&value) => return Ok(Footprint::none()),
        Some(current) => {
            *current = value;
            return Ok(Footprint::property(key, false));
        }
    }
    *slot = Some(value);
    Ok(Footprint::property(key, true))
}

fn resize_array(slots: &mut Vec<Option<Value>>, value: &Value) -> Result<Footprint> {
    let len = match value {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let len = *n as usize;
            len
        }
        other => {
            return Err(WeftError::InvalidLength {
                value: format!("{other:?}"),
            });
        }
    };
    if len == slots.len() {
        return Ok(Footprint::none());
    }
    if len > slots.len() {
        check_growth(len)?;
    }
    let mut footprint = Footprint::unspecific();
    footprint.categories |= WriteCategory::OWN_KEYS | WriteCategory::PROPERTY;
    footprint.keys.push(Key::name("length"));
    if len < slots.len() {
        footprint.keys.extend((len..slots.len()).map(Key::Index));
    }
    slots.resize(len, None);
    Ok(footprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter(heap: &Heap, id: ObjId, interest: Interest) -> Rc<Cell<u32>> {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        heap.listen(id, interest, Listener::new(move || h.set(h.get() + 1)))
            .unwrap();
        hits
    }

    #[test]
    fn plain_get_set_roundtrip() {
        let heap = Heap::new();
        let obj = heap.new_object();
        heap.set(obj, "a", 1).unwrap();
        assert_eq!(heap.get(obj, "a").unwrap(), Value::from(1));
        assert_eq!(heap.get(obj, "missing").unwrap(), Value::Undefined);
        assert_eq!(heap.own_keys(obj).unwrap(), vec![Key::from("a")]);
    }

    #[test]
    fn inherited_getter_sees_receiver() {
        let heap = Heap::new();
        let proto = heap.new_object();
        let getter: crate::object::Getter = Rc::new(|heap: &Heap, this: ObjId| {
            let n = heap.get(this, "n")?.as_number().unwrap_or(0.0);
            Ok(Value::Number(n * 2.0))
        });
        heap.define_property(proto, "double", Property::accessor(Some(getter), None))
            .unwrap();
        let instance = heap.new_object_with_proto(proto);
        heap.set(instance, "n", 21).unwrap();
        assert_eq!(heap.get(instance, "double").unwrap(), Value::from(42));
        assert!(heap.instance_of(instance, proto).unwrap());
        assert_eq!(heap.own_keys(instance).unwrap(), vec![Key::from("n")]);
    }

    #[test]
    fn setter_without_getter_and_missing_setter() {
        let heap = Heap::new();
        let obj = heap.new_object();
        heap.define_property(obj, "ro", Property::accessor(None, None)).unwrap();
        assert!(matches!(
            heap.set(obj, "ro", 1),
            Err(WeftError::NoSetter { .. })
        ));
    }

    #[test]
    fn read_only_data_property_rejects_writes() {
        let heap = Heap::new();
        let obj = heap.new_object();
        heap.define_property(obj, "k", Property::read_only(1)).unwrap();
        assert!(matches!(
            heap.set(obj, "k", 2),
            Err(WeftError::NotWritable { .. })
        ));
        assert!(!heap.delete(obj, "k").unwrap());
    }

    #[test]
    fn array_elements_holes_and_length() {
        let heap = Heap::new();
        let arr = heap.new_array([Value::from(1)]);
        heap.set(arr, 3usize, 4).unwrap();
        assert_eq!(heap.get(arr, "length").unwrap(), Value::from(4));
        assert!(!heap.has_own(arr, 1usize).unwrap());
        assert_eq!(heap.own_keys(arr).unwrap(), vec![Key::Index(0), Key::Index(3)]);

        heap.set(arr, "length", 1).unwrap();
        assert_eq!(heap.array_slots(arr).unwrap(), vec![Some(Value::from(1))]);
        assert!(matches!(
            heap.set(arr, "length", -1),
            Err(WeftError::InvalidLength { .. })
        ));
    }

    #[test]
    fn array_growth_past_the_dense_limit_is_rejected() {
        let heap = Heap::new();
        let arr = heap.new_array([Value::from(1)]);
        assert!(matches!(
            heap.set(arr, usize::MAX, 1),
            Err(WeftError::ArrayCapacity { .. })
        ));
        assert!(matches!(
            heap.set(arr, "length", 4_294_967_294_u32),
            Err(WeftError::ArrayCapacity { .. })
        ));
        assert!(matches!(
            heap.set(arr, MAX_DENSE_LEN, 1),
            Err(WeftError::ArrayCapacity { .. })
        ));
        assert_eq!(heap.array_slots(arr).unwrap(), vec![Some(Value::from(1))]);
        assert_eq!(heap.get(arr, usize::MAX).unwrap(), Value::Undefined);

        heap.set(arr, "length", 0).unwrap();
        heap.set(arr, 9usize, 1).unwrap();
        assert_eq!(heap.get(arr, "length").unwrap(), Value::from(10));
    }

    #[test]
    fn retired_handles_are_unknown_and_slots_are_reused() {
        let heap = Heap::new();
        let first = heap.object_from([("a", 1)]);
        heap.retire(first).unwrap();
        assert!(!heap.contains(first));
        assert!(matches!(
            heap.get(first, "a"),
            Err(WeftError::UnknownObject { .. })
        ));
        assert!(heap.retire(first).is_err());

        let second = heap.new_object();
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert_eq!(heap.get(second, "a").unwrap(), Value::Undefined);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn exhausted_slot_generations_are_never_reissued() {
        let mut arena = Arena::default();
        arena.insert(Object::new(None, Body::Plain));
        arena.slots[0].generation = u32::MAX;
        let last = ObjId::new(0, u32::MAX);
        assert!(arena.remove(last).is_some());
        assert!(arena.get(last).is_none());
        let next = arena.insert(Object::new(None, Body::Plain));
        assert_eq!(next, ObjId::new(1, 0));
        assert_eq!(arena.live, 1);
    }

    #[test]
    fn retiring_drops_the_proxy_handler_and_listeners() {
        let heap = Heap::new();
        let target = heap.new_object();
        let handler: Rc<dyn ProxyHandler> = Rc::new(crate::proxy::ForwardingHandler);
        let proxy = heap.new_proxy(target, Rc::clone(&handler)).unwrap();
        assert_eq!(Rc::strong_count(&handler), 2);
        heap.retire(proxy).unwrap();
        assert_eq!(Rc::strong_count(&handler), 1);

        let hits = counter(&heap, target, Interest::Any);
        heap.retire(target).unwrap();
        let reused = heap.new_object();
        heap.enhance(reused).unwrap();
        heap.set(reused, "x", 1).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn delete_array_element_leaves_hole() {
        let heap = Heap::new();
        let arr = heap.new_array([Value::from(1), Value::from(2)]);
        assert!(heap.delete(arr, 0usize).unwrap());
        assert_eq!(heap.array_slots(arr).unwrap(), vec![None, Some(Value::from(2))]);
        assert_eq!(heap.get(arr, "length").unwrap(), Value::from(2));
    }

    #[test]
    fn raw_writes_do_not_notify_until_enhanced() {
        let heap = Heap::new();
        let obj = heap.object_from([("a", 1)]);
        let hits = counter(&heap, obj, Interest::Property(Key::from("a")));

        heap.set(obj, "a", 2).unwrap();
        assert_eq!(hits.get(), 0);

        heap.enhance(obj).unwrap();
        heap.enhance(obj).unwrap();
        heap.set(obj, "a", 3).unwrap();
        assert_eq!(hits.get(), 1);
        heap.set(obj, "a", 3).unwrap();
        assert_eq!(hits.get(), 1, "no-op write must not notify");
    }

    #[test]
    fn enhanced_delete_notifies_property_and_keys_once_each() {
        let heap = Heap::new();
        let obj = heap.object_from([("a", 1)]);
        heap.enhance(obj).unwrap();
        let prop = counter(&heap, obj, Interest::Property(Key::from("a")));
        let keys = counter(&heap, obj, Interest::OwnKeys);
        assert!(heap.delete(obj, "a").unwrap());
        assert_eq!(prop.get(), 1);
        assert_eq!(keys.get(), 1);
        assert!(!heap.has(obj, "a").unwrap());
    }

    #[test]
    fn batch_coalesces_repeated_writes() {
        let heap = Heap::new();
        let obj = heap.object_from([("count", 0)]);
        heap.enhance(obj).unwrap();
        let seen = Rc::new(Cell::new(f64::NAN));
        let (h, s) = (heap.clone(), Rc::clone(&seen));
        heap.listen(
            obj,
            Interest::Property(Key::from("count")),
            Listener::new(move || {
                s.set(h.get(obj, "count").unwrap().as_number().unwrap());
            }),
        )
        .unwrap();
        let hits = counter(&heap, obj, Interest::Any);

        heap.batch(obj, || {
            for _ in 0..2 {
                let n = heap.get(obj, "count").unwrap().as_number().unwrap();
                heap.set(obj, "count", n + 1.0).unwrap();
            }
        });
        assert_eq!(hits.get(), 1);
        assert_eq!(seen.get(), 2.0);
    }

    #[test]
    fn map_key_interest_requires_keyed_container() {
        let heap = Heap::new();
        let obj = heap.new_object();
        let err = heap
            .listen(obj, Interest::MapKeyValue(Value::from(1)), Listener::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, WeftError::KindMismatch { .. }));
    }

    #[test]
    fn invalidated_object_rejects_everything() {
        let heap = Heap::new();
        let obj = heap.object_from([("a", 1)]);
        heap.invalidate(
            obj,
            ObsoleteReason {
                message: "replaced".into(),
                replaced_by: None,
                origin: crate::error::Origin(std::panic::Location::caller()),
            },
        )
        .unwrap();
        assert!(heap.is_obsolete(obj));
        assert!(heap.get(obj, "a").unwrap_err().is_obsolete());
        assert!(heap.set(obj, "a", 2).unwrap_err().is_obsolete());
        assert!(heap.own_keys(obj).unwrap_err().is_obsolete());
        assert!(heap.delete(obj, "a").unwrap_err().is_obsolete());
    }

    #[tracing_test::traced_test]
    #[test]
    fn invalidation_and_enhancement_are_logged() {
        let heap = Heap::new();
        let obj = heap.new_object();
        heap.enhance(obj).unwrap();
        assert!(logs_contain("enhanced for out-of-graph write tracking"));

        heap.invalidate(
            obj,
            ObsoleteReason {
                message: "kept #0 in its place".into(),
                replaced_by: None,
                origin: crate::error::Origin(std::panic::Location::caller()),
            },
        )
        .unwrap();
        assert!(logs_contain("invalidated obsolete object"));
        assert!(logs_contain("kept #0 in its place"));

        heap.retire(obj).unwrap();
        assert!(logs_contain("retired object"));
    }

    #[test]
    fn forwarding_proxy_is_transparent() {
        let heap = Heap::new();
        let proto = heap.new_object();
        let obj = heap.new_object_with_proto(proto);
        heap.set(obj, "x", 1).unwrap();
        let proxy = heap
            .new_proxy(obj, Rc::new(crate::proxy::ForwardingHandler))
            .unwrap();
        assert_eq!(heap.get(proxy, "x").unwrap(), Value::from(1));
        assert!(heap.instance_of(proxy, proto).unwrap());
        assert_eq!(heap.prototype_of(proxy).unwrap(), Some(proto));
        assert_eq!(heap.resolve(proxy), obj);
        heap.set(proxy, "y", 2).unwrap();
        assert_eq!(heap.get(obj, "y").unwrap(), Value::from(2));
    }

    #[test]
    fn prototype_cycles_are_rejected() {
        let heap = Heap::new();
        let a = heap.new_object();
        let b = heap.new_object_with_proto(a);
        assert!(heap.set_prototype_of(a, Some(b)).is_err());
    }

    #[test]
    fn unknown_handle_is_an_error() {
        let heap = Heap::new();
        let other = Heap::new();
        let id = other.new_object();
        assert!(matches!(
            heap.get(id, "a"),
            Err(WeftError::UnknownObject { .. })
        ));
        assert!(!heap.ptr_eq(&other));
    }
}
