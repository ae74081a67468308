#![forbid(unsafe_code)]

//! Weft public facade and prelude.
//!
//! Weft keeps application data as an object graph that can be observed and
//! refreshed without losing identity:
//!
//! - [`weft_core`]: the object heap, write listeners and change coalescing.
//! - [`weft_track`]: tracking wrappers that record what a computation read.
//! - [`weft_preserve`]: reconciliation of fresh snapshots into the retained
//!   graph.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use weft::prelude::*;
//!
//! let heap = Heap::new();
//! let graph = TrackingGraph::new(&heap);
//! let state = graph.wrap(heap.parse_json(r#"{"user": {"id": 7, "name": "Ada"}}"#)?)?;
//! let root = state.as_object().unwrap();
//!
//! // Render: read through the wrapper and remember what was read.
//! let (mut scope, name) = DependencyScope::record(&graph, |_| {
//!     heap.get_path(root, &["user".into(), "name".into()])
//! });
//! assert_eq!(name?, Value::str("Ada"));
//!
//! let renders = Rc::new(Cell::new(0));
//! let r = Rc::clone(&renders);
//! scope.subscribe(Listener::new(move || r.set(r.get() + 1)), false)?;
//!
//! // Refresh: merge a new snapshot into the existing graph.
//! let fresh = heap.parse_json(r#"{"user": {"id": 7, "name": "Ada L."}}"#)?;
//! reconcile(&heap, &state, &fresh, &PreserveOptions::default())?;
//! assert_eq!(renders.get(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(feature = "config")]
pub mod config;
pub mod logging;

pub use weft_core;
pub use weft_preserve;
pub use weft_track;

#[cfg(feature = "config")]
pub use config::{ConfigError, WeftConfig};
pub use logging::{LogFormat, LoggingConfig};

/// Common imports.
pub mod prelude {
    pub use weft_core::{
        Footprint, Heap, Interest, Key, Listener, Method, ObjId, ObjectKind, Value, WalkControl,
        WeftError,
    };
    pub use weft_preserve::{
        NormalizeOptions, PreserveError, PreserveOptions, ReconcileReport, normalize_list,
        normalize_lists, reconcile, reconcile_detailed,
    };
    pub use weft_track::{DependencyScope, RecordedRead, TrackingGraph};
}
