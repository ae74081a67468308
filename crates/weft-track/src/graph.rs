#![forbid(unsafe_code)]

//! The tracking graph: one transparent wrapper per object.
//!
//! A [`TrackingGraph`] hands out proxy objects ("wrappers") that stand in for
//! ordinary heap objects. Reads through a wrapper produce [`RecordedRead`]s
//! delivered to every [`on_any_read`](TrackingGraph::on_any_read) subscriber;
//! writes through a wrapper go to the underlying object and fire its write
//! listeners through the heap's coalescer.
//!
//! # Invariants
//!
//! 1. `wrap(wrap(x)) == wrap(x)` and `unwrap(wrap(x)) == x`.
//! 2. The underlying graph never stores wrappers: every value written through
//!    a wrapper is resolved to the object it stands for first, whichever
//!    graph the wrapper belongs to.
//! 3. Kind, prototype and `instance_of` answers are the target's.
//! 4. Accessors run with the wrapper as receiver, so reads inside a getter
//!    body are tracked too.
//! 5. Wrappers live as long as their graph: when the last clone of a
//!    [`TrackingGraph`] is dropped its wrappers are retired from the heap and
//!    their handles become unknown.
//!
//! # Failure Modes
//!
//! - Reading an object through a read-only data property fails with
//!   [`WeftError::ReadOnlyProperty`].
//! - Defining a property through a wrapper fails with
//!   [`WeftError::Unsupported`].
//! - A trap reached with a receiver that is not this target's wrapper fails
//!   with [`WeftError::Invariant`].

use core::cell::{Cell, RefCell};
use core::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use weft_core::{
    Completion, Heap, Key, Method, ObjId, Property, ProxyHandler, Result, Value, WeftError,
};

use crate::adapter;
use crate::read::RecordedRead;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a tracking graph (the "handler identity" of its reads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GraphId(u64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph-{}", self.0)
    }
}

type ReadCallback = Rc<dyn Fn(&RecordedRead)>;

/// Handler state shared by every wrapper of one graph.
pub(crate) struct GraphState {
    id: GraphId,
    me: Weak<GraphState>,
    /// target -> wrapper
    wrappers: RefCell<AHashMap<ObjId, ObjId>>,
    /// wrapper -> target
    targets: RefCell<AHashMap<ObjId, ObjId>>,
    read_listeners: RefCell<Vec<(u64, ReadCallback)>>,
    next_listener: Cell<u64>,
}

/// Owner of one graph's wrappers, shared by every [`TrackingGraph`] clone.
struct GraphOwner {
    heap: Heap,
    state: Rc<GraphState>,
}

impl Drop for GraphOwner {
    fn drop(&mut self) {
        let wrappers: Vec<ObjId> = self
            .state
            .targets
            .borrow_mut()
            .drain()
            .map(|(wrapper, _)| wrapper)
            .collect();
        self.state.wrappers.borrow_mut().clear();
        for &wrapper in &wrappers {
            if let Err(err) = self.heap.retire(wrapper) {
                tracing::warn!(graph = %self.state.id, wrapper = %wrapper, error = %err, "failed to retire wrapper");
            }
        }
        tracing::debug!(graph = %self.state.id, retired = wrappers.len(), "tracking graph dropped");
    }
}

/// A graph of tracking wrappers over one heap.
///
/// Clones share the same wrappers. Dropping the last clone retires them.
#[derive(Clone)]
pub struct TrackingGraph {
    owner: Rc<GraphOwner>,
}

impl fmt::Debug for TrackingGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("TrackingGraph")
            .field("id", &state.id)
            .field("wrappers", &state.wrappers.borrow().len())
            .field("read_listeners", &state.read_listeners.borrow().len())
            .finish()
    }
}

impl TrackingGraph {
    #[must_use]
    pub fn new(heap: &Heap) -> Self {
        let id = GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(graph = %id, "tracking graph created");
        Self {
            owner: Rc::new(GraphOwner {
                heap: heap.clone(),
                state: Rc::new_cyclic(|me| GraphState {
                    id,
                    me: me.clone(),
                    wrappers: RefCell::new(AHashMap::new()),
                    targets: RefCell::new(AHashMap::new()),
                    read_listeners: RefCell::new(Vec::new()),
                    next_listener: Cell::new(0),
                }),
            }),
        }
    }

    fn state(&self) -> &GraphState {
        &self.owner.state
    }

    #[must_use]
    pub fn id(&self) -> GraphId {
        self.state().id
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.owner.heap
    }

    /// The wrapper standing in for `value`. Primitives, wrappers of this
    /// graph and weak collections are returned unchanged.
    pub fn wrap(&self, value: impl Into<Value>) -> Result<Value> {
        self.state().wrap(self.heap(), value.into())
    }

    /// [`wrap`](Self::wrap) for a known object handle.
    pub fn wrap_object(&self, id: ObjId) -> Result<ObjId> {
        Ok(self
            .state()
            .wrap(self.heap(), Value::Object(id))?
            .as_object()
            .unwrap_or(id))
    }

    /// The original object behind a wrapper of this graph, or `value` itself.
    #[must_use]
    pub fn unwrap(&self, value: impl Into<Value>) -> Value {
        self.state().unwrap(value.into())
    }

    /// Whether `id` is a wrapper created by this graph.
    #[must_use]
    pub fn is_wrapper(&self, id: ObjId) -> bool {
        self.state().targets.borrow().contains_key(&id)
    }

    #[must_use]
    pub fn wrapper_count(&self) -> usize {
        self.state().wrappers.borrow().len()
    }

    /// Call `callback` for every read made through this graph's wrappers
    /// until the returned subscription is dropped.
    pub fn on_any_read(&self, callback: impl Fn(&RecordedRead) + 'static) -> ReadSubscription {
        let state = self.state();
        let id = state.next_listener.get();
        state.next_listener.set(id + 1);
        state
            .read_listeners
            .borrow_mut()
            .push((id, Rc::new(callback)));
        ReadSubscription {
            state: Rc::downgrade(&self.owner.state),
            id,
        }
    }
}

/// RAII guard for an [`on_any_read`](TrackingGraph::on_any_read) callback.
#[must_use = "dropping the subscription stops read notifications"]
pub struct ReadSubscription {
    state: Weak<GraphState>,
    id: u64,
}

impl ReadSubscription {
    /// Whether the graph this subscription belongs to still exists.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.strong_count() > 0
    }
}

impl Drop for ReadSubscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.read_listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for ReadSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GraphState
// ---------------------------------------------------------------------------

impl GraphState {
    pub(crate) fn id(&self) -> GraphId {
        self.id
    }

    pub(crate) fn wrap(&self, heap: &Heap, value: Value) -> Result<Value> {
        let Value::Object(id) = value else {
            return Ok(value);
        };
        if self.targets.borrow().contains_key(&id) {
            return Ok(value);
        }
        // Foreign proxies are looked through; this graph wraps raw objects.
        let target = heap.resolve(id);
        if let Some(&wrapper) = self.wrappers.borrow().get(&target) {
            return Ok(Value::Object(wrapper));
        }
        if heap.kind(target)?.is_weak() {
            return Ok(Value::Object(target));
        }
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| WeftError::invariant("tracking graph dropped while in use"))?;
        let wrapper = heap.new_proxy(target, me)?;
        self.wrappers.borrow_mut().insert(target, wrapper);
        self.targets.borrow_mut().insert(wrapper, target);
        tracing::trace!(graph = %self.id, object = %target, wrapper = %wrapper, "wrapper created");
        Ok(Value::Object(wrapper))
    }

    pub(crate) fn unwrap(&self, value: Value) -> Value {
        match value {
            Value::Object(id) => match self.targets.borrow().get(&id) {
                Some(&target) => Value::Object(target),
                None => value,
            },
            other => other,
        }
    }

    /// The form `value` takes when stored in the underlying graph: proxies of
    /// any graph are replaced by the object they stand for.
    pub(crate) fn to_stored(heap: &Heap, value: Value) -> Value {
        match value {
            Value::Object(id) => Value::Object(heap.resolve(id)),
            other => other,
        }
    }

    pub(crate) fn wrap_completion(&self, heap: &Heap, completion: Completion) -> Result<Completion> {
        Ok(match completion {
            Completion::Value(v) => Completion::Value(self.wrap(heap, v)?),
            Completion::List(values) => Completion::List(
                values
                    .into_iter()
                    .map(|v| self.wrap(heap, v))
                    .collect::<Result<_>>()?,
            ),
            Completion::Entries(entries) => Completion::Entries(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((self.wrap(heap, k)?, self.wrap(heap, v)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Deliver `read` to every read subscriber.
    pub(crate) fn emit(&self, read: RecordedRead) {
        let listeners: Vec<ReadCallback> = self
            .read_listeners
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for listener in listeners {
            listener(&read);
        }
    }

    fn check_receiver(&self, target: ObjId, receiver: ObjId) -> Result<()> {
        if self.targets.borrow().get(&receiver) == Some(&target) {
            Ok(())
        } else {
            Err(WeftError::invariant(format!(
                "trap on {target} reached with receiver {receiver}, which is not its wrapper"
            )))
        }
    }
}

impl ProxyHandler for GraphState {
    fn get(&self, heap: &Heap, target: ObjId, key: &Key, receiver: ObjId) -> Result<Value> {
        self.check_receiver(target, receiver)?;
        let kind = heap.kind(target)?;
        if key.is_length() && kind == weft_core::ObjectKind::Array {
            let slots = heap.array_slots(target)?;
            let len = Value::from(slots.len());
            self.emit(RecordedRead::ArrayValues {
                graph: self.id,
                target,
                values: slots,
            });
            return Ok(len);
        }
        if key.is_size() && matches!(kind, weft_core::ObjectKind::Set | weft_core::ObjectKind::Map) {
            self.emit(RecordedRead::Unspecific {
                graph: self.id,
                target,
            });
            return heap.ordinary_get(target, key, receiver);
        }
        let raw = match heap.lookup_property(target, key)? {
            Some(Property::Accessor { get: Some(getter), .. }) => {
                let value = getter(heap, receiver)?;
                return self.wrap(heap, self.unwrap(value));
            }
            Some(prop @ Property::Data { .. }) if prop.is_read_only() => {
                let value = prop.value().cloned().unwrap_or_default();
                if value.is_object() {
                    return Err(WeftError::ReadOnlyProperty { key: key.clone() });
                }
                value
            }
            _ => heap.ordinary_get(target, key, receiver)?,
        };
        self.emit(RecordedRead::Property {
            graph: self.id,
            target,
            key: key.clone(),
            value: raw.clone(),
        });
        self.wrap(heap, raw)
    }

    fn set(
        &self,
        heap: &Heap,
        target: ObjId,
        key: &Key,
        value: Value,
        receiver: ObjId,
    ) -> Result<()> {
        self.check_receiver(target, receiver)?;
        match heap.lookup_property(target, key)? {
            Some(Property::Accessor { set: Some(setter), .. }) => {
                heap.batch(target, || setter(heap, receiver, value))
            }
            Some(Property::Accessor { set: None, .. }) => {
                Err(WeftError::NoSetter { key: key.clone() })
            }
            Some(prop) if prop.is_read_only() => Err(WeftError::NotWritable { key: key.clone() }),
            _ => heap.tracked_write(target, key, Self::to_stored(heap, value)),
        }
    }

    fn delete(&self, heap: &Heap, target: ObjId, key: &Key) -> Result<bool> {
        heap.tracked_delete(target, key)
    }

    fn own_keys(&self, heap: &Heap, target: ObjId) -> Result<Vec<Key>> {
        let keys = heap.ordinary_own_keys(target)?;
        self.emit(RecordedRead::OwnKeys {
            graph: self.id,
            target,
            keys: keys.clone(),
        });
        Ok(keys)
    }

    fn define_property(&self, _heap: &Heap, target: ObjId, key: Key, _prop: Property) -> Result<()> {
        Err(WeftError::unsupported(format!(
            "defining property `{key}` on the tracking wrapper of {target}"
        )))
    }

    fn invoke(&self, heap: &Heap, target: ObjId, method: Method, receiver: ObjId) -> Result<Completion> {
        self.check_receiver(target, receiver)?;
        adapter::invoke(self, heap, target, method)
    }
}
