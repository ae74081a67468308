#![forbid(unsafe_code)]

//! Proxy objects and high-level container methods.
//!
//! A proxy object routes every heap operation through a [`ProxyHandler`]. The
//! default trait methods forward to the target unchanged, so a handler only
//! overrides the traps it cares about.
//!
//! Container operations that touch many slots at once (push, splice, clear,
//! iteration, ...) are expressed as a [`Method`] passed to
//! [`Heap::invoke`](crate::Heap::invoke), which lets a proxy intercept them as
//! a unit instead of as a series of single-key reads and writes.

use core::cmp::Ordering;
use core::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::heap::Heap;
use crate::object::Property;
use crate::value::{Key, ObjId, Value};

/// Sort comparator for [`Method::Sort`].
pub type Comparator = Rc<dyn Fn(&Value, &Value) -> Ordering>;

/// Native routine for [`Method::Custom`]. Receives the unwrapped target.
pub type NativeFn = Rc<dyn Fn(&Heap, ObjId) -> Result<Completion>>;

/// A high-level container operation.
#[derive(Clone)]
pub enum Method {
    // -- arrays ------------------------------------------------------------
    Push(Vec<Value>),
    Pop,
    Shift,
    Unshift(Vec<Value>),
    Splice {
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    },
    Includes(Value),
    IndexOf(Value),
    Reverse,
    Fill(Value),
    Sort(Comparator),
    // -- sets --------------------------------------------------------------
    Add(Value),
    // -- maps --------------------------------------------------------------
    Get(Value),
    Insert(Value, Value),
    // -- sets and maps -----------------------------------------------------
    Has(Value),
    Remove(Value),
    Clear,
    // -- iteration (all containers) ---------------------------------------
    Keys,
    Values,
    Entries,
    Size,
    /// Any routine not individually modeled.
    Custom { name: &'static str, body: NativeFn },
}

impl Method {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Push(_) => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift(_) => "unshift",
            Self::Splice { .. } => "splice",
            Self::Includes(_) => "includes",
            Self::IndexOf(_) => "indexOf",
            Self::Reverse => "reverse",
            Self::Fill(_) => "fill",
            Self::Sort(_) => "sort",
            Self::Add(_) => "add",
            Self::Get(_) => "get",
            Self::Insert(..) => "set",
            Self::Has(_) => "has",
            Self::Remove(_) => "delete",
            Self::Clear => "clear",
            Self::Keys => "keys",
            Self::Values => "values",
            Self::Entries => "entries",
            Self::Size => "size",
            Self::Custom { name, .. } => *name,
        }
    }

    /// Whether the method never mutates its receiver.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Includes(_)
                | Self::IndexOf(_)
                | Self::Get(_)
                | Self::Has(_)
                | Self::Keys
                | Self::Values
                | Self::Entries
                | Self::Size
        )
    }

    /// Apply `f` to every value argument.
    #[must_use]
    pub fn map_args(self, mut f: impl FnMut(Value) -> Value) -> Self {
        match self {
            Self::Push(items) => Self::Push(items.into_iter().map(&mut f).collect()),
            Self::Unshift(items) => Self::Unshift(items.into_iter().map(&mut f).collect()),
            Self::Splice {
                start,
                delete_count,
                items,
            } => Self::Splice {
                start,
                delete_count,
                items: items.into_iter().map(&mut f).collect(),
            },
            Self::Includes(v) => Self::Includes(f(v)),
            Self::IndexOf(v) => Self::IndexOf(f(v)),
            Self::Fill(v) => Self::Fill(f(v)),
            Self::Add(v) => Self::Add(f(v)),
            Self::Get(k) => Self::Get(f(k)),
            Self::Insert(k, v) => {
                let k = f(k);
                Self::Insert(k, f(v))
            }
            Self::Has(v) => Self::Has(f(v)),
            Self::Remove(v) => Self::Remove(f(v)),
            other => other,
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.name())
    }
}

/// Result of a [`Method`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Value(Value),
    List(Vec<Value>),
    Entries(Vec<(Value, Value)>),
}

impl Completion {
    #[must_use]
    pub fn undefined() -> Self {
        Self::Value(Value::Undefined)
    }

    /// The single value; lists yield `Undefined`.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(v) => v,
            Self::List(_) | Self::Entries(_) => Value::Undefined,
        }
    }

    /// The list of values; entries yield their values.
    #[must_use]
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Self::Value(v) => vec![v],
            Self::List(values) => values,
            Self::Entries(entries) => entries.into_iter().map(|(_, v)| v).collect(),
        }
    }

    /// Apply `f` to every value in the completion.
    #[must_use]
    pub fn map_values(self, mut f: impl FnMut(Value) -> Value) -> Self {
        match self {
            Self::Value(v) => Self::Value(f(v)),
            Self::List(values) => Self::List(values.into_iter().map(&mut f).collect()),
            Self::Entries(entries) => Self::Entries(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        let k = f(k);
                        (k, f(v))
                    })
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// ProxyHandler
// ---------------------------------------------------------------------------

/// Traps for a proxy object. `receiver` is the proxy's own handle.
///
/// Every trap defaults to forwarding to the target with ordinary semantics
/// (out-of-graph write tracking on the target included).
pub trait ProxyHandler {
    fn get(&self, heap: &Heap, target: ObjId, key: &Key, receiver: ObjId) -> Result<Value> {
        heap.ordinary_get(target, key, receiver)
    }

    fn set(
        &self,
        heap: &Heap,
        target: ObjId,
        key: &Key,
        value: Value,
        receiver: ObjId,
    ) -> Result<()> {
        heap.ordinary_set(target, key, value, receiver)
    }

    fn delete(&self, heap: &Heap, target: ObjId, key: &Key) -> Result<bool> {
        heap.delete(target, key.clone())
    }

    fn has(&self, heap: &Heap, target: ObjId, key: &Key) -> Result<bool> {
        heap.has(target, key.clone())
    }

    fn own_keys(&self, heap: &Heap, target: ObjId) -> Result<Vec<Key>> {
        heap.own_keys(target)
    }

    fn define_property(&self, heap: &Heap, target: ObjId, key: Key, prop: Property) -> Result<()> {
        heap.define_property(target, key, prop)
    }

    fn invoke(&self, heap: &Heap, target: ObjId, method: Method, _receiver: ObjId) -> Result<Completion> {
        heap.invoke(target, method)
    }
}

/// A handler that forwards everything; proxies built with it are observably
/// identical to their target.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardingHandler;

impl ProxyHandler for ForwardingHandler {}
