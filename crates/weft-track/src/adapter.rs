#![forbid(unsafe_code)]

//! Container adapters: high-level methods invoked through a wrapper.
//!
//! Arguments are resolved to raw objects before the method runs against the
//! target and results are wrapped on the way out. Mutating methods run inside
//! the target's coalescing frame, so listeners fire once per call however
//! many slots the method touched.
//!
//! | Method family                              | Read recorded   |
//! |--------------------------------------------|-----------------|
//! | array iteration, search, `size`            | `ArrayValues`   |
//! | set/map lookups and iteration              | `Unspecific`    |
//! | plain-object `keys`                        | `OwnKeys`       |
//! | plain-object `values`/`entries`            | `OwnKeys` plus one `Property` per key |
//! | reverse, fill, sort, custom routines       | `Unspecific`    |
//! | push, pop, shift, unshift, splice, add, insert, remove, clear | none |

use weft_core::{Completion, Heap, Method, ObjId, ObjectKind, Result};

use crate::graph::GraphState;
use crate::read::RecordedRead;

/// Whether the method's effect on individual slots is modeled by the heap.
fn is_modeled(method: &Method) -> bool {
    !matches!(
        method,
        Method::Reverse | Method::Fill(_) | Method::Sort(_) | Method::Custom { .. }
    )
}

pub(crate) fn invoke(
    state: &GraphState,
    heap: &Heap,
    target: ObjId,
    method: Method,
) -> Result<Completion> {
    let method = method.map_args(|v| GraphState::to_stored(heap, v));
    let kind = heap.kind(target)?;

    if method.is_read_only() {
        record_bulk_read(state, heap, target, kind, &method)?;
        let completion = heap.invoke(target, method)?;
        return state.wrap_completion(heap, completion);
    }

    let modeled = is_modeled(&method);
    tracing::trace!(
        graph = %state.id(),
        object = %target,
        method = method.name(),
        modeled,
        "container method through wrapper"
    );
    let completion = heap.tracked_apply(target, method)?;
    if !modeled {
        state.emit(RecordedRead::Unspecific {
            graph: state.id(),
            target,
        });
    }
    state.wrap_completion(heap, completion)
}

fn record_bulk_read(
    state: &GraphState,
    heap: &Heap,
    target: ObjId,
    kind: ObjectKind,
    method: &Method,
) -> Result<()> {
    let graph = state.id();
    match kind {
        ObjectKind::Array => state.emit(RecordedRead::ArrayValues {
            graph,
            target,
            values: heap.array_slots(target)?,
        }),
        ObjectKind::Plain => {
            let keys = heap.ordinary_own_keys(target)?;
            state.emit(RecordedRead::OwnKeys {
                graph,
                target,
                keys: keys.clone(),
            });
            if matches!(method, Method::Values | Method::Entries) {
                for (key, value) in heap.data_entries(target)? {
                    state.emit(RecordedRead::Property {
                        graph,
                        target,
                        key,
                        value,
                    });
                }
            }
        }
        _ => state.emit(RecordedRead::Unspecific { graph, target }),
    }
    Ok(())
}
