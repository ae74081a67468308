#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use weft_core::{Heap, Value};
use weft_preserve::{PreserveOptions, reconcile};

#[derive(Arbitrary, Debug)]
enum Doc {
    Null,
    Bool(bool),
    Int(i8),
    Str(u8),
    Array(Vec<Option<Doc>>),
    Object(Vec<(u8, Doc)>),
    Keyed { id: u8, body: Box<Doc> },
    Set(Vec<Doc>),
    Map(Vec<(Doc, Doc)>),
}

fn build(heap: &Heap, doc: &Doc, depth: u32) -> Value {
    if depth > 6 {
        return Value::Null;
    }
    let child = |d: &Doc| build(heap, d, depth + 1);
    match doc {
        Doc::Null => Value::Null,
        Doc::Bool(b) => Value::Bool(*b),
        Doc::Int(n) => Value::from(i32::from(*n)),
        Doc::Str(s) => Value::str(&format!("s{}", s % 8)),
        Doc::Array(slots) => Value::Object(
            heap.new_sparse_array(slots.iter().take(16).map(|s| s.as_ref().map(child))),
        ),
        Doc::Object(fields) => {
            let obj = heap.new_object();
            for (k, v) in fields.iter().take(8) {
                // Keep `id`/`key` out of generated names.
                let _ = heap.set(obj, format!("f{}", k % 6), child(v));
            }
            Value::Object(obj)
        }
        Doc::Keyed { id, body } => {
            let obj = heap.object_from([("id", Value::from(u32::from(id % 4))), ("body", child(body))]);
            Value::Object(obj)
        }
        Doc::Set(members) => Value::Object(heap.new_set(members.iter().take(8).map(child))),
        Doc::Map(entries) => Value::Object(
            heap.new_map(entries.iter().take(8).map(|(k, v)| (child(k), child(v)))),
        ),
    }
}

fuzz_target!(|input: (Doc, Doc, bool)| {
    let (old, new, circular) = input;
    let heap = Heap::new();
    let old = build(&heap, &old, 0);
    let new = build(&heap, &new, 0);
    // Taken up front: reconciliation may invalidate parts of `new`.
    let Ok(expected) = heap.to_json(&new) else {
        return;
    };
    let options = PreserveOptions::default().preserve_circular(circular);
    if let Ok(merged) = reconcile(&heap, &old, &new, &options) {
        assert_eq!(heap.to_json(&merged).ok(), Some(expected));
    }
});
