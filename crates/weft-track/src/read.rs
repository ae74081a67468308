#![forbid(unsafe_code)]

//! Recorded reads and their write subscriptions.
//!
//! A [`RecordedRead`] is an immutable record of one access made through a
//! tracking wrapper. Subscribing a [`Listener`] to a read registers it on the
//! write-listener categories that could invalidate that read.
//!
//! | Read          | Listener interests                   |
//! |---------------|--------------------------------------|
//! | `Property`    | the key, unspecific writes           |
//! | `OwnKeys`     | own-keys changes, unspecific writes  |
//! | `ArrayValues` | any write                            |
//! | `Unspecific`  | any write                            |
//! | `Value`       | none: cannot be subscribed           |
//!
//! # Invariants
//!
//! 1. Two reads are equal iff they come from the same graph, concern the same
//!    target and key, and recorded the same value (SameValueZero).
//! 2. Subscribing the same listener twice registers it once per interest.

use smallvec::SmallVec;
use weft_core::{Heap, Interest, Key, Listener, ObjId, Result, Value, WeftError};

use crate::graph::GraphId;

/// One observed access.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordedRead {
    /// A single property (or array element) read, with the raw value seen.
    Property {
        graph: GraphId,
        target: ObjId,
        key: Key,
        value: Value,
    },
    /// Enumeration of the target's own keys.
    OwnKeys {
        graph: GraphId,
        target: ObjId,
        keys: Vec<Key>,
    },
    /// Bulk read of an array (`length`, iteration, search).
    ArrayValues {
        graph: GraphId,
        target: ObjId,
        values: Vec<Option<Value>>,
    },
    /// A read whose footprint is not modeled; always considered changed.
    Unspecific { graph: GraphId, target: ObjId },
    /// A bare value with no backing store.
    Value { value: Value },
}

impl RecordedRead {
    /// The object the read was made on, if any.
    #[must_use]
    pub fn target(&self) -> Option<ObjId> {
        match self {
            Self::Property { target, .. }
            | Self::OwnKeys { target, .. }
            | Self::ArrayValues { target, .. }
            | Self::Unspecific { target, .. } => Some(*target),
            Self::Value { .. } => None,
        }
    }

    #[must_use]
    pub fn graph(&self) -> Option<GraphId> {
        match self {
            Self::Property { graph, .. }
            | Self::OwnKeys { graph, .. }
            | Self::ArrayValues { graph, .. }
            | Self::Unspecific { graph, .. } => Some(*graph),
            Self::Value { .. } => None,
        }
    }

    /// Whether a listener can be attached to this read.
    #[must_use]
    pub fn is_subscribable(&self) -> bool {
        !matches!(self, Self::Value { .. })
    }

    fn interests(&self) -> SmallVec<[Interest; 2]> {
        match self {
            Self::Property { key, .. } => {
                SmallVec::from_iter([Interest::Property(key.clone()), Interest::Unspecific])
            }
            Self::OwnKeys { .. } => SmallVec::from_iter([Interest::OwnKeys, Interest::Unspecific]),
            Self::ArrayValues { .. } | Self::Unspecific { .. } => {
                SmallVec::from_iter([Interest::Any])
            }
            Self::Value { .. } => SmallVec::new(),
        }
    }

    /// Re-read the backing data and report whether it differs from what was
    /// recorded. Reads on objects that have since become obsolete count as
    /// changed.
    pub fn has_changed(&self, heap: &Heap) -> Result<bool> {
        if let Some(target) = self.target() {
            if heap.is_obsolete(target) {
                return Ok(true);
            }
        }
        Ok(match self {
            Self::Property { target, key, value, .. } => {
                !heap.ordinary_get(*target, key, *target)?.same_value(value)
            }
            Self::OwnKeys { target, keys, .. } => heap.ordinary_own_keys(*target)? != *keys,
            Self::ArrayValues { target, values, .. } => heap.array_slots(*target)? != *values,
            Self::Unspecific { .. } => true,
            Self::Value { .. } => false,
        })
    }

    /// Register `listener` for writes that could invalidate this read. With
    /// `track_original`, the target is enhanced so writes made through raw
    /// handles notify too.
    pub fn subscribe(&self, heap: &Heap, listener: &Listener, track_original: bool) -> Result<()> {
        let Some(target) = self.target() else {
            return Err(WeftError::unsupported(
                "subscribing to a value read with no backing object",
            ));
        };
        if track_original {
            heap.enhance(target)?;
        }
        for interest in self.interests() {
            heap.listen(target, interest, listener.clone())?;
        }
        Ok(())
    }

    pub fn unsubscribe(&self, heap: &Heap, listener: &Listener) -> Result<()> {
        let Some(target) = self.target() else {
            return Ok(());
        };
        for interest in self.interests() {
            heap.unlisten(target, &interest, listener.id())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackingGraph;
    use core::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn record(graph: &TrackingGraph, f: impl FnOnce()) -> Vec<RecordedRead> {
        let reads = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&reads);
        let _sub = graph.on_any_read(move |read| r.borrow_mut().push(read.clone()));
        f();
        reads.take()
    }

    fn counter() -> (Listener, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (Listener::new(move || h.set(h.get() + 1)), hits)
    }

    #[test]
    fn replaying_the_same_reads_yields_equal_records() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let root = graph
            .wrap_object(heap.object_from([("a", 1), ("b", 2)]))
            .unwrap();
        let run = || {
            heap.get(root, "a").unwrap();
            heap.own_keys(root).unwrap();
        };
        assert_eq!(record(&graph, run), record(&graph, run));
    }

    #[test]
    fn reads_from_different_graphs_differ() {
        let heap = Heap::new();
        let obj = heap.object_from([("a", 1)]);
        let (g1, g2) = (TrackingGraph::new(&heap), TrackingGraph::new(&heap));
        let w1 = g1.wrap_object(obj).unwrap();
        let w2 = g2.wrap_object(obj).unwrap();
        let r1 = record(&g1, || {
            heap.get(w1, "a").unwrap();
        });
        let r2 = record(&g2, || {
            heap.get(w2, "a").unwrap();
        });
        assert_ne!(r1, r2);
    }

    #[test]
    fn subscription_fires_on_wrapper_write_only_for_its_key() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let w = graph
            .wrap_object(heap.object_from([("a", 1), ("b", 1)]))
            .unwrap();
        let reads = record(&graph, || {
            heap.get(w, "a").unwrap();
        });
        let (listener, hits) = counter();
        reads[0].subscribe(&heap, &listener, false).unwrap();

        heap.set(w, "b", 2).unwrap();
        assert_eq!(hits.get(), 0);
        heap.set(w, "a", 2).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(reads[0].has_changed(&heap).unwrap());

        reads[0].unsubscribe(&heap, &listener).unwrap();
        heap.set(w, "a", 3).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn track_original_observes_raw_writes() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let raw = heap.object_from([("a", 1)]);
        let w = graph.wrap_object(raw).unwrap();
        let reads = record(&graph, || {
            heap.get(w, "a").unwrap();
        });
        let (plain, plain_hits) = counter();
        reads[0].subscribe(&heap, &plain, false).unwrap();
        heap.set(raw, "a", 2).unwrap();
        assert_eq!(plain_hits.get(), 0, "raw write is invisible without enhancement");

        let (tracked, tracked_hits) = counter();
        reads[0].subscribe(&heap, &tracked, true).unwrap();
        heap.set(raw, "a", 3).unwrap();
        assert_eq!(tracked_hits.get(), 1);
        assert_eq!(plain_hits.get(), 1);
    }

    #[test]
    fn own_keys_read_fires_on_new_key_not_on_value_change() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let w = graph.wrap_object(heap.object_from([("a", 1)])).unwrap();
        let reads = record(&graph, || {
            heap.own_keys(w).unwrap();
        });
        let (listener, hits) = counter();
        reads[0].subscribe(&heap, &listener, false).unwrap();
        heap.set(w, "a", 2).unwrap();
        assert_eq!(hits.get(), 0);
        heap.set(w, "b", 1).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn value_reads_cannot_be_subscribed() {
        let heap = Heap::new();
        let read = RecordedRead::Value {
            value: Value::from(1),
        };
        let (listener, _) = counter();
        assert!(!read.is_subscribable());
        assert!(read.subscribe(&heap, &listener, false).is_err());
        assert!(!read.has_changed(&heap).unwrap());
    }

    #[test]
    fn unspecific_reads_always_count_as_changed() {
        let heap = Heap::new();
        let graph = TrackingGraph::new(&heap);
        let read = RecordedRead::Unspecific {
            graph: graph.id(),
            target: heap.new_map([]),
        };
        assert!(read.has_changed(&heap).unwrap());
    }
}
