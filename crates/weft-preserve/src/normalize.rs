#![forbid(unsafe_code)]

//! Duplicate collapsing ahead of reconciliation.
//!
//! Server data sometimes lists the same entity twice as two distinct
//! objects. Reconciliation rejects that as an ambiguous identity;
//! [`normalize_list`] replaces every later occurrence with the first one so
//! the list holds one shared instance per identity.

use ahash::{AHashMap, AHashSet};
use weft_core::{DEFAULT_PREVIEW_LEN, Heap, ObjId, ObjectKind, Value};

use crate::error::{PreserveError, Result};
use crate::options::NormalizeOptions;
use crate::path::{GraphPath, Segment};
use crate::registry::{Identity, identity_of};

/// Collapse members of the array `list` that share an identity hint.
/// Returns the number of slots that were replaced.
///
/// Unless [`NormalizeOptions::ignore_differences`] is set, duplicates must be
/// structurally equal to the first occurrence.
pub fn normalize_list(heap: &Heap, list: ObjId, options: &NormalizeOptions) -> Result<usize> {
    collapse(heap, list, options, &GraphPath::root())
}

/// [`normalize_list`] applied to every array reachable from `root`.
pub fn normalize_lists(heap: &Heap, root: &Value, options: &NormalizeOptions) -> Result<usize> {
    let mut visited = AHashSet::new();
    let collapsed = visit(heap, root, options, &GraphPath::root(), &mut visited)?;
    tracing::debug!(arrays = visited.len(), collapsed, "normalized lists");
    Ok(collapsed)
}

fn collapse(heap: &Heap, list: ObjId, options: &NormalizeOptions, path: &GraphPath) -> Result<usize> {
    let slots = heap.array_slots(list)?;
    let hints = options.hints();
    let mut first: AHashMap<Identity, Value> = AHashMap::new();
    heap.batch(list, || {
        let mut collapsed = 0;
        for (index, slot) in slots.iter().enumerate() {
            let Some(value) = slot else {
                continue;
            };
            let Some(identity) = identity_of(heap, value, hints, &path.key(index))? else {
                continue;
            };
            let Some(kept) = first.get(&identity).cloned() else {
                first.insert(identity, value.clone());
                continue;
            };
            if same_object(heap, &kept, value) {
                continue;
            }
            if !options.ignore_differences && !heap.deep_equal(&kept, value)? {
                return Err(PreserveError::DifferingDuplicates {
                    path: path.clone(),
                    identity: identity.to_string(),
                    first: heap.preview(&kept, DEFAULT_PREVIEW_LEN),
                    second: heap.preview(value, DEFAULT_PREVIEW_LEN),
                });
            }
            heap.set(list, index, kept)?;
            collapsed += 1;
        }
        Ok(collapsed)
    })
}

fn same_object(heap: &Heap, a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => heap.resolve(a) == heap.resolve(b),
        _ => false,
    }
}

fn visit(
    heap: &Heap,
    value: &Value,
    options: &NormalizeOptions,
    path: &GraphPath,
    visited: &mut AHashSet<ObjId>,
) -> Result<usize> {
    let Some(id) = value.as_object() else {
        return Ok(0);
    };
    if !visited.insert(heap.resolve(id)) {
        return Ok(0);
    }
    let mut collapsed = 0;
    let children: Vec<(Segment, Value)> = match heap.kind(id)? {
        ObjectKind::Array => {
            collapsed += collapse(heap, id, options, path)?;
            heap.array_slots(id)?
                .into_iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.map(|v| (Segment::Key(i.into()), v)))
                .collect()
        }
        ObjectKind::Plain => heap
            .data_entries(id)?
            .into_iter()
            .map(|(k, v)| (Segment::Key(k), v))
            .collect(),
        ObjectKind::Set => heap
            .set_members(id)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Segment::SetMember(i), v))
            .collect(),
        ObjectKind::Map => heap
            .map_entries(id)?
            .into_iter()
            .enumerate()
            .flat_map(|(i, (k, v))| [(Segment::MapKey(i), k), (Segment::MapValue(i), v)])
            .collect(),
        ObjectKind::WeakSet | ObjectKind::WeakMap => Vec::new(),
    };
    for (segment, child) in children {
        collapsed += visit(heap, &child, options, &path.child(segment), visited)?;
    }
    Ok(collapsed)
}
