#![forbid(unsafe_code)]

//! Reconciliation: merge a new snapshot into a retained object graph.
//!
//! [`reconcile`] walks `new` depth-first and, wherever an object in `old` can
//! stand in for the corresponding object in `new`, copies the new contents
//! into the old object and returns the old identity. Container members are
//! matched by identity hint (`id`/`key`), falling back to position for
//! arrays and to reference equality for sets.
//!
//! # Invariants
//!
//! 1. The result has the same shape as `new`; only identities differ.
//! 2. Primitives are never preserved; they are returned verbatim.
//! 3. One old object stands in for at most one new object per session.
//! 4. Writes to merged objects are tracked whether or not the object was
//!    reached through a wrapper, and happen inside that object's coalescing
//!    frame: each listener fires at most once per merged object.
//! 5. A new-side object replaced by an old one is invalidated at the end of
//!    the session unless it is also live somewhere in the result.
//!
//! # Failure Modes
//!
//! - Identity errors abort the session. `old` is left partially merged and
//!   nothing is invalidated.
//! - Weak collections of matching kind cannot be merged and abort the session.

use core::panic::Location;

use ahash::{AHashMap, AHashSet};
use weft_core::{
    DEFAULT_PREVIEW_LEN, Heap, Key, Method, ObjId, ObjectKind, ObsoleteReason, Origin, Property,
    Value, WalkControl,
};

use crate::error::{PreserveError, Result};
use crate::options::PreserveOptions;
use crate::path::{GraphPath, Segment};
use crate::registry::ObjRegistry;

/// Result of [`reconcile_detailed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// The merged value: `old` (or a retained descendant) where identities
    /// were preserved, otherwise parts of `new`.
    pub value: Value,
    /// Number of old objects that absorbed a new object.
    pub merged: usize,
    /// Number of new-side objects invalidated as obsolete.
    pub invalidated: usize,
}

/// Merge `new` into `old`, preserving as many old identities as possible.
///
/// ```
/// use weft_core::Heap;
/// use weft_preserve::{PreserveOptions, reconcile};
///
/// let heap = Heap::new();
/// let old = heap.object_from([("a", 1)]);
/// let new = heap.object_from([("a", 2)]);
/// let merged = reconcile(&heap, &old.into(), &new.into(), &PreserveOptions::default())?;
/// assert_eq!(merged.as_object(), Some(old));
/// assert_eq!(heap.get(old, "a")?.as_number(), Some(2.0));
/// assert!(heap.is_obsolete(new));
/// # Ok::<(), weft_preserve::PreserveError>(())
/// ```
#[track_caller]
pub fn reconcile(
    heap: &Heap,
    old: &Value,
    new: &Value,
    options: &PreserveOptions,
) -> Result<Value> {
    reconcile_detailed(heap, old, new, options).map(|report| report.value)
}

/// [`reconcile`], also reporting how many objects were merged and
/// invalidated.
#[track_caller]
pub fn reconcile_detailed(
    heap: &Heap,
    old: &Value,
    new: &Value,
    options: &PreserveOptions,
) -> Result<ReconcileReport> {
    let origin = Origin(Location::caller());
    let span = tracing::debug_span!(
        "reconcile",
        destroy_obsolete = options.destroy_obsolete,
        preserve_circular = options.preserve_circular,
    );
    let _guard = span.enter();

    let mut session = Session::new(heap, *options, origin);
    let value = match session.merge(old, new, &GraphPath::root()) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(error = %err, "reconciliation aborted");
            return Err(err);
        }
    };
    let invalidated = session.finish()?;
    let merged = session.merged.len();
    tracing::debug!(merged, invalidated, "reconciliation finished");
    Ok(ReconcileReport {
        value,
        merged,
        invalidated,
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Where an old object was merged, and with what.
struct Merge {
    new: ObjId,
    path: GraphPath,
}

struct Session<'h> {
    heap: &'h Heap,
    options: PreserveOptions,
    origin: Origin,
    /// Resolved old object -> the new object it absorbed.
    merged: AHashMap<ObjId, Merge>,
    /// Resolved new object -> the old handle standing in for it.
    preserved: AHashMap<ObjId, Value>,
    /// (new, old) pairs where the old object replaced the new one.
    replaced: Vec<(ObjId, ObjId)>,
    /// Resolved objects that are live in the result.
    used: AHashSet<ObjId>,
}

impl<'h> Session<'h> {
    fn new(heap: &'h Heap, options: PreserveOptions, origin: Origin) -> Self {
        Self {
            heap,
            options,
            origin,
            merged: AHashMap::new(),
            preserved: AHashMap::new(),
            replaced: Vec::new(),
            used: AHashSet::new(),
        }
    }

    fn preview(&self, value: &Value) -> String {
        self.heap.preview(value, DEFAULT_PREVIEW_LEN)
    }

    fn merge(&mut self, old: &Value, new: &Value, path: &GraphPath) -> Result<Value> {
        let Some(new_id) = new.as_object() else {
            return Ok(new.clone());
        };
        let heap = self.heap;
        let new_raw = heap.resolve(new_id);
        if self.options.preserve_circular {
            if let Some(kept) = self.preserved.get(&new_raw) {
                return Ok(kept.clone());
            }
        }

        let Some((old_id, kind)) = self.mergeable(old, new_id, path)? else {
            self.keep(new)?;
            return Ok(new.clone());
        };
        let old_raw = heap.resolve(old_id);
        if let Some(prior) = self.merged.get(&old_raw) {
            if prior.new == new_raw {
                return Ok(old.clone());
            }
            return Err(PreserveError::Conflict {
                old: self.preview(old),
                first: self.preview(&Value::Object(prior.new)),
                first_path: prior.path.clone(),
                second: self.preview(new),
                second_path: path.clone(),
            });
        }

        self.merged.insert(
            old_raw,
            Merge {
                new: new_raw,
                path: path.clone(),
            },
        );
        self.preserved.insert(new_raw, old.clone());
        self.replaced.push((new_raw, old_raw));
        self.used.insert(old_raw);
        tracing::trace!(%path, old = %old_raw, new = %new_raw, %kind, "merging");

        heap.batch(old_raw, || match kind {
            ObjectKind::Plain => self.merge_plain(old_raw, new_id, path),
            ObjectKind::Array => self.merge_array(old_raw, new_id, path),
            ObjectKind::Set => self.merge_set(old_raw, new_id, path),
            ObjectKind::Map => self.merge_map(old_raw, new_id, path),
            ObjectKind::WeakSet | ObjectKind::WeakMap => Err(PreserveError::WeakCollection {
                path: path.clone(),
                kind,
            }),
        })?;
        Ok(old.clone())
    }

    /// The old object and the shared kind, when `old` can absorb `new`.
    fn mergeable(
        &self,
        old: &Value,
        new_id: ObjId,
        path: &GraphPath,
    ) -> Result<Option<(ObjId, ObjectKind)>> {
        let heap = self.heap;
        let Some(old_id) = old.as_object() else {
            return Ok(None);
        };
        if heap.resolve(old_id) == heap.resolve(new_id) || heap.is_obsolete(old_id) {
            return Ok(None);
        }
        let kind = heap.kind(new_id)?;
        if heap.kind(old_id)? != kind {
            return Ok(None);
        }
        let proto_of = |id: ObjId| -> Result<Option<ObjId>> {
            Ok(heap.prototype_of(id)?.map(|p| heap.resolve(p)))
        };
        if proto_of(old_id)? != proto_of(new_id)? {
            return Ok(None);
        }
        if kind.is_weak() {
            return Err(PreserveError::WeakCollection {
                path: path.clone(),
                kind,
            });
        }
        Ok(Some((old_id, kind)))
    }

    /// Mark everything reachable from a verbatim new value as live.
    fn keep(&mut self, value: &Value) -> Result<()> {
        let used = &mut self.used;
        self.heap.walk(value, |id| {
            if used.insert(id) {
                WalkControl::Continue
            } else {
                WalkControl::Skip
            }
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Per-kind merges (on resolved old objects)
    // -----------------------------------------------------------------------

    /// Tracked assignment; an inherited or own setter runs instead when
    /// there is one.
    fn assign(&self, old: ObjId, key: Key, value: Value) -> Result<()> {
        let heap = self.heap;
        if let Some(Property::Accessor { .. }) = heap.lookup_property(old, &key)? {
            heap.set(old, key, value)?;
        } else {
            heap.tracked_write(old, &key, value)?;
        }
        Ok(())
    }

    fn merge_plain(&mut self, old: ObjId, new: ObjId, path: &GraphPath) -> Result<()> {
        let heap = self.heap;
        let current: AHashMap<Key, Value> = heap.data_entries(old)?.into_iter().collect();
        let mut present = AHashSet::new();
        for (key, new_value) in heap.data_entries(new)? {
            if new_value.is_undefined() {
                continue;
            }
            let old_value = current.get(&key).cloned().unwrap_or_default();
            let merged = self.merge(&old_value, &new_value, &path.key(key.clone()))?;
            self.assign(old, key.clone(), merged)?;
            present.insert(key);
        }
        for key in heap.ordinary_own_keys(old)? {
            if !present.contains(&key) {
                heap.tracked_delete(old, &key)?;
            }
        }
        Ok(())
    }

    fn merge_array(&mut self, old: ObjId, new: ObjId, path: &GraphPath) -> Result<()> {
        let heap = self.heap;
        let hints = self.options.hints();
        let old_slots = heap.array_slots(old)?;
        let new_slots = heap.array_slots(new)?;
        let old_registry = ObjRegistry::build(heap, slot_members(&old_slots), hints, path)?;
        let new_registry = ObjRegistry::build(heap, slot_members(&new_slots), hints, path)?;

        let mut merged = Vec::with_capacity(new_slots.len());
        for (index, slot) in new_slots.iter().enumerate() {
            let Some(new_value) = slot else {
                merged.push(None);
                continue;
            };
            let old_value = match new_registry.identity_at(index) {
                Some(identity) => old_registry.get(identity).cloned().unwrap_or_default(),
                None if old_registry.identity_at(index).is_none() => {
                    old_slots.get(index).cloned().flatten().unwrap_or_default()
                }
                None => Value::Undefined,
            };
            merged.push(Some(self.merge(&old_value, new_value, &path.key(index))?));
        }

        for (index, slot) in merged.into_iter().enumerate() {
            match slot {
                Some(value) => heap.tracked_write(old, &Key::Index(index), value)?,
                None if old_slots.get(index).is_some_and(Option::is_some) => {
                    heap.tracked_delete(old, &Key::Index(index))?;
                }
                None => {}
            }
        }
        heap.tracked_write(old, &Key::name("length"), Value::from(new_slots.len()))?;
        Ok(())
    }

    fn merge_set(&mut self, old: ObjId, new: ObjId, path: &GraphPath) -> Result<()> {
        let heap = self.heap;
        let hints = self.options.hints();
        let old_members = heap.set_members(old)?;
        let new_members = heap.set_members(new)?;
        let members = |values: &[Value]| -> Vec<(Segment, Value)> {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (Segment::SetMember(i), v.clone()))
                .collect()
        };
        let old_registry = ObjRegistry::build(heap, members(&old_members), hints, path)?;
        let new_registry = ObjRegistry::build(heap, members(&new_members), hints, path)?;

        let mut merged = Vec::with_capacity(new_members.len());
        for (index, new_value) in new_members.iter().enumerate() {
            let old_value = new_registry
                .identity_at(index)
                .and_then(|identity| old_registry.get(identity))
                .cloned()
                .unwrap_or_default();
            merged.push(self.merge(
                &old_value,
                new_value,
                &path.child(Segment::SetMember(index)),
            )?);
        }

        if merged != old_members {
            heap.tracked_apply(old, Method::Clear)?;
            for member in merged {
                heap.tracked_apply(old, Method::Add(member))?;
            }
        }
        Ok(())
    }

    fn merge_map(&mut self, old: ObjId, new: ObjId, path: &GraphPath) -> Result<()> {
        let heap = self.heap;
        let hints = self.options.hints();
        let old_entries = heap.map_entries(old)?;
        let new_entries = heap.map_entries(new)?;
        let sides = |entries: &[(Value, Value)]| -> (Vec<(Segment, Value)>, Vec<(Segment, Value)>) {
            entries
                .iter()
                .enumerate()
                .map(|(i, (k, v))| {
                    (
                        (Segment::MapKey(i), k.clone()),
                        (Segment::MapValue(i), v.clone()),
                    )
                })
                .unzip()
        };
        let (old_keys, old_values) = sides(&old_entries);
        let (new_keys, new_values) = sides(&new_entries);
        let old_keys = ObjRegistry::build(heap, old_keys, hints, path)?;
        let old_values = ObjRegistry::build(heap, old_values, hints, path)?;
        let new_keys = ObjRegistry::build(heap, new_keys, hints, path)?;
        let new_values = ObjRegistry::build(heap, new_values, hints, path)?;

        let mut merged = Vec::with_capacity(new_entries.len());
        for (index, (new_key, new_value)) in new_entries.iter().enumerate() {
            let old_key = new_keys
                .identity_at(index)
                .and_then(|identity| old_keys.get(identity))
                .cloned()
                .unwrap_or_default();
            let key = self.merge(&old_key, new_key, &path.child(Segment::MapKey(index)))?;

            let old_value = match new_values.identity_at(index) {
                Some(identity) => old_values.get(identity).cloned().unwrap_or_default(),
                None => old_entries
                    .iter()
                    .enumerate()
                    .find(|(i, (k, _))| k.same_value(&key) && old_values.identity_at(*i).is_none())
                    .map(|(_, (_, v))| v.clone())
                    .unwrap_or_default(),
            };
            let value = self.merge(&old_value, new_value, &path.child(Segment::MapValue(index)))?;
            merged.push((key, value));
        }

        if merged != old_entries {
            heap.tracked_apply(old, Method::Clear)?;
            for (key, value) in merged {
                heap.tracked_apply(old, Method::Insert(key, value))?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Invalidate replaced new-side objects that did not end up live.
    fn finish(&mut self) -> Result<usize> {
        if !self.options.destroy_obsolete {
            return Ok(0);
        }
        let mut invalidated = 0;
        for &(new, old) in &self.replaced {
            if self.used.contains(&new) || self.heap.is_obsolete(new) {
                continue;
            }
            let reason = ObsoleteReason {
                message: format!(
                    "reconciliation kept {} in its place",
                    self.preview(&Value::Object(old))
                ),
                replaced_by: Some(old),
                origin: self.origin,
            };
            self.heap.invalidate(new, reason)?;
            invalidated += 1;
        }
        Ok(invalidated)
    }
}

/// Array slots as registry members; holes stand in as `Undefined` so member
/// positions line up with indices.
fn slot_members(slots: &[Option<Value>]) -> Vec<(Segment, Value)> {
    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| (Segment::Key(Key::Index(i)), slot.clone().unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PreserveOptions {
        PreserveOptions::default()
    }

    #[test]
    fn primitives_are_returned_verbatim() {
        let heap = Heap::new();
        let old = Value::Object(heap.new_object());
        let merged = reconcile(&heap, &old, &Value::from(3), &options()).unwrap();
        assert_eq!(merged, Value::from(3));
    }

    #[test]
    fn plain_objects_keep_old_identity() {
        let heap = Heap::new();
        let old = heap.object_from([("a", Value::from(1)), ("b", Value::str("x"))]);
        let new = heap.object_from([
            ("a", Value::from(2)),
            ("b", Value::str("x")),
            ("c", Value::from(3)),
        ]);
        let report =
            reconcile_detailed(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert_eq!(report.value, Value::Object(old));
        assert_eq!((report.merged, report.invalidated), (1, 1));
        assert_eq!(
            heap.data_entries(old).unwrap(),
            vec![
                (Key::from("a"), Value::from(2)),
                (Key::from("b"), Value::str("x")),
                (Key::from("c"), Value::from(3)),
            ]
        );
    }

    #[test]
    fn keys_missing_or_undefined_in_new_are_deleted() {
        let heap = Heap::new();
        let old = heap.object_from([("a", 1), ("b", 2), ("c", 3)]);
        let new = heap.object_from([("a", Value::from(1)), ("b", Value::Undefined)]);
        reconcile(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert_eq!(heap.own_keys(old).unwrap(), vec![Key::from("a")]);
    }

    #[test]
    fn different_kinds_are_not_merged() {
        let heap = Heap::new();
        let old = heap.new_array([]);
        let new = heap.new_object();
        let merged = reconcile(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert_eq!(merged, Value::Object(new));
        assert!(!heap.is_obsolete(new));
    }

    #[test]
    fn different_prototypes_are_not_merged() {
        let heap = Heap::new();
        let proto = heap.new_object();
        let old = heap.new_object_with_proto(proto);
        let new = heap.new_object();
        let merged = reconcile(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert_eq!(merged, Value::Object(new));
    }

    #[test]
    fn nested_objects_are_merged_recursively() {
        let heap = Heap::new();
        let inner_old = heap.object_from([("v", 1)]);
        let old = heap.object_from([("inner", inner_old)]);
        let inner_new = heap.object_from([("v", 2)]);
        let new = heap.object_from([("inner", inner_new)]);
        let report = reconcile_detailed(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert_eq!(heap.get(old, "inner").unwrap(), Value::Object(inner_old));
        assert_eq!(heap.get(inner_old, "v").unwrap(), Value::from(2));
        assert_eq!(report.invalidated, 2);
        assert!(heap.is_obsolete(inner_new));
    }

    #[test]
    fn disabling_destroy_obsolete_leaves_new_objects_usable() {
        let heap = Heap::new();
        let old = heap.new_object();
        let new = heap.object_from([("prop", "x")]);
        let report = reconcile_detailed(
            &heap,
            &old.into(),
            &new.into(),
            &options().destroy_obsolete(false),
        )
        .unwrap();
        assert_eq!(report.invalidated, 0);
        assert_eq!(heap.get(new, "prop").unwrap(), Value::str("x"));
    }

    #[test]
    fn obsolete_error_points_at_the_reconcile_call() {
        let heap = Heap::new();
        let old = heap.new_object();
        let new = heap.object_from([("prop", "x")]);
        let line = line!() + 1;
        reconcile(&heap, &old.into(), &new.into(), &options()).unwrap();
        let err = heap.get(new, "prop").unwrap_err();
        assert!(err.is_obsolete());
        let source = std::error::Error::source(&err)
            .map(ToString::to_string)
            .unwrap_or_default();
        assert!(source.contains(&format!("reconcile.rs:{line}")), "{source}");
    }

    #[test]
    fn one_old_object_cannot_absorb_two_new_objects() {
        let heap = Heap::new();
        let shared = heap.object_from([("v", 1)]);
        let old = heap.object_from([("a", shared), ("b", shared)]);
        let new = heap.object_from([
            ("a", heap.object_from([("v", 2)])),
            ("b", heap.object_from([("v", 3)])),
        ]);
        let err = reconcile(&heap, &old.into(), &new.into(), &options()).unwrap_err();
        assert!(matches!(err, PreserveError::Conflict { .. }), "{err}");
        assert!(err.to_string().contains("$.a"));
        assert!(err.to_string().contains("$.b"));
    }

    #[test]
    fn weak_collections_of_matching_kind_are_rejected() {
        let heap = Heap::new();
        let old = heap.object_from([("w", heap.new_weak_map())]);
        let new = heap.object_from([("w", heap.new_weak_map())]);
        let err = reconcile(&heap, &old.into(), &new.into(), &options()).unwrap_err();
        assert!(matches!(
            err,
            PreserveError::WeakCollection {
                kind: ObjectKind::WeakMap,
                ..
            }
        ));
    }

    #[test]
    fn merged_containers_notify_once() {
        use std::cell::Cell;
        use std::rc::Rc;
        use weft_core::{Interest, Listener};

        let heap = Heap::new();
        let old = heap.object_from([("a", 1), ("b", 2)]);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        heap.listen(old, Interest::Any, Listener::new(move || h.set(h.get() + 1)))
            .unwrap();
        let new = heap.object_from([("a", 10), ("b", 20), ("c", 30)]);
        reconcile(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[tracing_test::traced_test]
    #[test]
    fn reconciliation_reports_counts_in_logs() {
        let heap = Heap::new();
        let old = heap.object_from([("a", 1)]);
        let new = heap.object_from([("a", 2)]);
        reconcile(&heap, &old.into(), &new.into(), &options()).unwrap();
        assert!(logs_contain("reconciliation finished"));
        assert!(logs_contain("invalidated=1"));
    }
}
