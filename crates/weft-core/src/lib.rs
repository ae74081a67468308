#![forbid(unsafe_code)]

//! Object heap and change-notification core for Weft.
//!
//! This crate provides the data model the tracking graph and the
//! reconciliation engine operate on:
//!
//! - [`Heap`]: a single-threaded arena of plain objects, arrays (with holes),
//!   sets, maps, weak collections and proxy objects, addressed by [`ObjId`].
//! - [`Registries`] and [`Listener`]: per-object write-listener bags split by
//!   [`WriteCategory`].
//! - [`Coalescer`]: reentrancy-safe batching so each listener fires at most
//!   once per outermost mutation of a target.
//! - [`ProxyHandler`] and [`Method`]: the interception seam used by tracking
//!   wrappers.
//! - [`Heap::enhance`]: out-of-graph write tracking on raw objects.
//! - [`Heap::invalidate`]: the obsolete state reconciliation leaves behind.
//!
//! # Architecture
//!
//! `Heap` is `Rc<HeapInner>`; objects live in a `RefCell<Vec<Object>>` and
//! are never freed, so an [`ObjId`] stays valid for the heap's lifetime.
//! Every operation takes the borrow, copies out what it needs and releases it
//! before running user code.
//!
//! # Invariants
//!
//! 1. A write storing a SameValueZero-equal value notifies nobody.
//! 2. Listeners fire only after the outermost coalescing frame of their target
//!    closes.
//! 3. Obsolete objects reject every operation with [`WeftError::Obsolete`].

pub mod coalesce;
pub mod error;
pub mod heap;
pub mod json;
pub mod listeners;
mod methods;
pub mod object;
pub mod preview;
pub mod proxy;
pub mod value;
pub mod walk;

pub use coalesce::{Coalescer, Collector};
pub use error::{ObsoleteError, ObsoleteReason, Origin, Result, WeftError};
pub use heap::Heap;
pub use listeners::{
    Footprint, Interest, Listener, ListenerBag, ListenerId, ListenerSet, Registries, WriteCategory,
};
pub use object::{Getter, ObjectKind, PropFlags, Property, Setter};
pub use preview::{DEFAULT_PREVIEW_LEN, format_number};
pub use proxy::{Comparator, Completion, ForwardingHandler, Method, NativeFn, ProxyHandler};
pub use value::{Key, ObjId, Value};
pub use walk::WalkControl;
