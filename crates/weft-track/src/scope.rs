#![forbid(unsafe_code)]

//! Dependency scopes: the reads one execution made, as a unit.
//!
//! A [`DependencyScope`] runs a closure against a [`TrackingGraph`], keeps
//! the de-duplicated reads it produced, and can subscribe one listener to all
//! of them at once. Dropping the scope releases every subscription.
//!
//! # Usage
//!
//! ```ignore
//! let (mut scope, total) = DependencyScope::record(&graph, |g| compute(g));
//! scope.subscribe(Listener::new(|| schedule_rerender()), false)?;
//! // ... later, a write to anything `compute` read fires the listener once.
//! ```
//!
//! # Invariants
//!
//! 1. Reads are kept in first-seen order; equal reads are kept once.
//! 2. Subscriptions are released in reverse registration order on drop.
//! 3. After release, the scope's listener does not fire again.
//! 4. Value reads are recorded but never subscribed.
//!
//! # Failure Modes
//!
//! - Release skips reads whose target has since become obsolete: their
//!   listener bags were retired with them.

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use weft_core::{Heap, Listener, Result};

use crate::graph::TrackingGraph;
use crate::read::RecordedRead;

/// The reads made during one execution, subscribable as a whole.
pub struct DependencyScope {
    heap: Heap,
    reads: Vec<RecordedRead>,
    /// Listener currently attached to every subscribable read.
    listener: Option<Listener>,
}

impl DependencyScope {
    /// Run `f` and collect every read it makes through `graph`.
    pub fn record<R>(graph: &TrackingGraph, f: impl FnOnce(&TrackingGraph) -> R) -> (Self, R) {
        let collected = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&collected);
        let subscription = graph.on_any_read(move |read| sink.borrow_mut().push(read.clone()));
        let result = f(graph);
        drop(subscription);

        let mut seen = AHashSet::new();
        let reads: Vec<RecordedRead> = collected
            .take()
            .into_iter()
            .filter(|read| seen.insert(read.clone()))
            .collect();
        tracing::trace!(graph = %graph.id(), reads = reads.len(), "dependency scope recorded");
        (
            Self {
                heap: graph.heap().clone(),
                reads,
                listener: None,
            },
            result,
        )
    }

    #[must_use]
    pub fn reads(&self) -> &[RecordedRead] {
        &self.reads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.listener.is_some()
    }

    /// Attach `listener` to every subscribable read, replacing any listener
    /// attached earlier.
    pub fn subscribe(&mut self, listener: Listener, track_original: bool) -> Result<()> {
        self.release()?;
        for read in self.reads.iter().filter(|r| r.is_subscribable()) {
            if let Err(err) = read.subscribe(&self.heap, &listener, track_original) {
                // Undo the partial subscription before surfacing the error.
                self.listener = Some(listener);
                self.release()?;
                return Err(err);
            }
        }
        self.listener = Some(listener);
        Ok(())
    }

    /// Detach the current listener, if any.
    pub fn release(&mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        for read in self.reads.iter().rev().filter(|r| r.is_subscribable()) {
            match read.unsubscribe(&self.heap, &listener) {
                Ok(()) => {}
                Err(err) if err.is_obsolete() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Whether any recorded read no longer matches the current data.
    pub fn any_changed(&self) -> Result<bool> {
        for read in &self.reads {
            if read.has_changed(&self.heap)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Drop for DependencyScope {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(error = %err, "failed to release dependency scope");
        }
    }
}

impl fmt::Debug for DependencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyScope")
            .field("read_count", &self.reads.len())
            .field("subscribed", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use weft_core::{Method, Value};

    fn counter() -> (Listener, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (Listener::new(move || h.set(h.get() + 1)), hits)
    }

    #[test]
    fn duplicate_reads_are_kept_once() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let root = graph.wrap_object(heap.object_from([("a", 1)])).unwrap();
        let (scope, value) = DependencyScope::record(&graph, |_| {
            heap.get(root, "a").unwrap();
            heap.get(root, "a").unwrap()
        });
        assert_eq!(value, Value::from(1));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn one_listener_fires_once_per_write() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let raw = heap.object_from([("a", 1), ("b", 2)]);
        let root = graph.wrap_object(raw).unwrap();
        let (mut scope, ()) = DependencyScope::record(&graph, |_| {
            heap.get(root, "a").unwrap();
            heap.get(root, "b").unwrap();
            heap.own_keys(root).unwrap();
        });
        let (listener, hits) = counter();
        scope.subscribe(listener, false).unwrap();
        assert!(scope.is_subscribed());

        heap.set(root, "a", 10).unwrap();
        assert_eq!(hits.get(), 1);
        heap.set(root, "c", 1).unwrap();
        assert_eq!(hits.get(), 2);
        assert!(scope.any_changed().unwrap());
    }

    #[test]
    fn drop_releases_subscriptions() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let root = graph.wrap_object(heap.object_from([("a", 1)])).unwrap();
        let (listener, hits) = counter();
        {
            let (mut scope, ()) = DependencyScope::record(&graph, |_| {
                heap.get(root, "a").unwrap();
            });
            scope.subscribe(listener, false).unwrap();
        }
        heap.set(root, "a", 2).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn resubscribing_replaces_the_listener() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let root = graph.wrap_object(heap.new_array([Value::from(1)])).unwrap();
        let (mut scope, _) = DependencyScope::record(&graph, |_| {
            heap.invoke(root, Method::Values).unwrap()
        });
        let (first, first_hits) = counter();
        let (second, second_hits) = counter();
        scope.subscribe(first, false).unwrap();
        scope.subscribe(second, false).unwrap();
        heap.invoke(root, Method::Push(vec![Value::from(2)])).unwrap();
        assert_eq!((first_hits.get(), second_hits.get()), (0, 1));
    }

    #[test]
    fn unchanged_graph_reports_no_change() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let root = graph.wrap_object(heap.object_from([("a", 1)])).unwrap();
        let (scope, _) = DependencyScope::record(&graph, |_| heap.get(root, "a").unwrap());
        assert!(!scope.any_changed().unwrap());
        heap.set(root, "a", 1).unwrap();
        assert!(!scope.any_changed().unwrap());
    }
}
