#![forbid(unsafe_code)]

//! Transparent tracking graph for Weft.
//!
//! - [`TrackingGraph`]: one identity-stable wrapper per object; reads through
//!   wrappers are reported as [`RecordedRead`]s, writes fire the heap's write
//!   listeners.
//! - [`RecordedRead`]: subscribe a listener to be told when the data behind a
//!   read changes, through a wrapper or (with `track_original`) through any
//!   raw handle.
//! - [`DependencyScope`]: the de-duplicated reads of one execution, subscribed
//!   and released as a unit.
//!
//! # Example
//!
//! ```
//! use weft_core::{Heap, Listener};
//! use weft_track::{DependencyScope, TrackingGraph};
//!
//! let heap = Heap::new();
//! let graph = TrackingGraph::new(&heap);
//! let counter = graph
//!     .wrap_object(heap.object_from([("count", 0)]))
//!     .unwrap();
//!
//! let (mut scope, _) = DependencyScope::record(&graph, |_| heap.get(counter, "count").unwrap());
//! scope.subscribe(Listener::new(|| {}), false).unwrap();
//!
//! heap.set(counter, "count", 1).unwrap();
//! assert!(scope.any_changed().unwrap());
//! assert!(graph.unwrap(counter).is_object());
//! ```

mod adapter;
pub mod graph;
pub mod read;
pub mod scope;

pub use graph::{GraphId, ReadSubscription, TrackingGraph};
pub use read::RecordedRead;
pub use scope::DependencyScope;
