//! Render / refresh cycles through the facade.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use weft::prelude::*;

fn counter() -> (Listener, Rc<Cell<u32>>) {
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    (Listener::new(move || h.set(h.get() + 1)), hits)
}

#[test]
fn refresh_notifies_only_readers_of_changed_data() {
    let heap = Heap::new();
    let graph = TrackingGraph::new(&heap);
    let state = graph
        .wrap(
            heap.parse_json(r#"{"title": "Inbox", "rows": [{"id": 1, "read": false}, {"id": 2, "read": false}]}"#)
                .unwrap(),
        )
        .unwrap();
    let root = state.as_object().unwrap();

    let (mut title_scope, _) = DependencyScope::record(&graph, |_| heap.get(root, "title").unwrap());
    let (title_listener, title_hits) = counter();
    title_scope.subscribe(title_listener, false).unwrap();

    let (mut row_scope, row) = DependencyScope::record(&graph, |_| {
        let rows = heap.get(root, "rows").unwrap().as_object().unwrap();
        let row = heap.get(rows, 1usize).unwrap().as_object().unwrap();
        heap.get(row, "read").unwrap();
        row
    });
    let (row_listener, row_hits) = counter();
    row_scope.subscribe(row_listener, false).unwrap();

    let fresh = heap
        .parse_json(r#"{"title": "Inbox", "rows": [{"id": 1, "read": false}, {"id": 2, "read": true}]}"#)
        .unwrap();
    let report = reconcile_detailed(&heap, &state, &fresh, &PreserveOptions::default()).unwrap();

    assert_eq!(report.value, state);
    assert_eq!(title_hits.get(), 0);
    assert_eq!(row_hits.get(), 1);
    assert_eq!(heap.get(row, "read").unwrap(), Value::Bool(true));
    assert!(!title_scope.any_changed().unwrap());
    assert!(row_scope.any_changed().unwrap());
    assert!(heap.is_obsolete(fresh.as_object().unwrap()));
}

#[test]
fn reordered_rows_keep_their_identity() {
    let heap = Heap::new();
    let old = heap
        .parse_json(r#"[{"key": "a", "n": 1}, {"key": "b", "n": 2}, {"key": "c", "n": 3}]"#)
        .unwrap();
    let list = old.as_object().unwrap();
    let before: Vec<Value> = (0..3).map(|i| heap.get(list, i as usize).unwrap()).collect();

    let new = heap
        .parse_json(r#"[{"key": "c", "n": 3}, {"key": "a", "n": 1}]"#)
        .unwrap();
    reconcile(&heap, &old, &new, &PreserveOptions::default()).unwrap();

    assert_eq!(heap.array_slots(list).unwrap(), vec![Some(before[2].clone()), Some(before[0].clone())]);
}

#[test]
fn normalizing_server_duplicates_makes_reconcile_succeed() {
    let heap = Heap::new();
    let old = heap.parse_json(r#"{"feed": []}"#).unwrap();
    let new = heap
        .parse_json(r#"{"feed": [{"id": 9, "text": "hi"}, {"id": 9, "text": "hi"}]}"#)
        .unwrap();

    let err = reconcile(&heap, &old, &new, &PreserveOptions::default().destroy_obsolete(false))
        .unwrap_err();
    assert!(err.is_identity_error());

    assert_eq!(normalize_lists(&heap, &new, &NormalizeOptions::default()).unwrap(), 1);
    reconcile(&heap, &old, &new, &PreserveOptions::default()).unwrap();
    let feed = heap.get(old.as_object().unwrap(), "feed").unwrap().as_object().unwrap();
    assert_eq!(heap.get(feed, 0usize).unwrap(), heap.get(feed, 1usize).unwrap());
}

#[test]
fn any_read_subscription_sees_every_read() {
    let heap = Heap::new();
    let graph = TrackingGraph::new(&heap);
    let root = graph
        .wrap_object(heap.object_from([("a", 1), ("b", 2)]))
        .unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let subscription = graph.on_any_read(move |read| s.borrow_mut().push(read.clone()));

    heap.get(root, "a").unwrap();
    heap.own_keys(root).unwrap();
    drop(subscription);
    heap.get(root, "b").unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], RecordedRead::Property { .. }));
    assert!(matches!(seen[1], RecordedRead::OwnKeys { .. }));
}
