#![forbid(unsafe_code)]

//! Ordinary semantics of the high-level container [`Method`]s.
//!
//! [`Heap::apply_method`] runs a method against a non-proxy target and reports
//! what it changed as a [`Footprint`]; it never notifies. Callers decide
//! whether to notify (see [`Heap::tracked_apply`]).
//!
//! # Invariants
//!
//! 1. Structural array changes (push, pop, shift, unshift, splice, length
//!    changes) report `OWN_KEYS | UNSPECIFIC | ANY` plus the touched keys.
//! 2. Methods whose per-slot effect is not modeled (reverse, fill, sort,
//!    custom routines) report `UNSPECIFIC | ANY`.
//! 3. Read-only methods report an empty footprint.
//! 4. Comparators and native routines run with no heap borrow held.

use crate::error::{Result, WeftError};
use crate::heap::{Heap, kind_mismatch};
use crate::listeners::{Footprint, WriteCategory};
use crate::object::{Body, Ordered};
use crate::proxy::{Completion, Method};
use crate::value::{Key, ObjId, Value};

impl Heap {
    /// Apply `method` to `target` with ordinary semantics.
    pub fn apply_method(&self, target: ObjId, method: Method) -> Result<(Completion, Footprint)> {
        if self.is_proxy(target) {
            return Err(WeftError::invariant(format!(
                "`{}` applied directly to proxy {target}",
                method.name()
            )));
        }
        match method {
            Method::Custom { body, .. } => {
                let completion = body(self, target)?;
                Ok((completion, Footprint::unspecific()))
            }
            Method::Sort(compare) => {
                let slots = self.array_slots(target)?;
                let holes = slots.iter().filter(|s| s.is_none()).count();
                let (undefined, defined): (Vec<Value>, Vec<Value>) =
                    slots.into_iter().flatten().partition(Value::is_undefined);
                // Undefined sorts after every defined value, holes after that.
                let sorted: Vec<Option<Value>> = merge_sort(defined, &*compare)
                    .into_iter()
                    .chain(undefined)
                    .map(Some)
                    .chain(core::iter::repeat_n(None, holes))
                    .collect();
                self.with_live_mut(target, |o| match &mut o.body {
                    Body::Array(slots) => {
                        *slots = sorted;
                        Ok(())
                    }
                    other => Err(kind_mismatch("sort", "an array", other)),
                })?;
                Ok((Completion::Value(Value::Object(target)), Footprint::unspecific()))
            }
            method => self.with_live_mut(target, |o| match &mut o.body {
                Body::Array(slots) => array_method(target, slots, method),
                Body::Set(set) => set_method(set, method),
                Body::Map(map) => map_method(map, method),
                Body::Plain => plain_method(&o.props, method),
                other => Err(match other.kind() {
                    Some(kind) if kind.is_weak() => {
                        WeftError::unsupported(format!("`{}` on a {kind}", method.name()))
                    }
                    _ => kind_mismatch("invoke", "a container", other),
                }),
            }),
        }
    }
}

/// Stable top-down merge sort that only asks whether one value sorts after
/// another. Any comparator, consistent or not, yields a permutation of the
/// input.
fn merge_sort(
    mut values: Vec<Value>,
    compare: &dyn Fn(&Value, &Value) -> core::cmp::Ordering,
) -> Vec<Value> {
    if values.len() < 2 {
        return values;
    }
    let right = values.split_off(values.len() / 2);
    let left = merge_sort(values, compare);
    let right = merge_sort(right, compare);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let next = if compare(l, r) == core::cmp::Ordering::Greater {
            right.next()
        } else {
            left.next()
        };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    merged
}

fn slot_value(slot: &Option<Value>) -> Value {
    slot.clone().unwrap_or_default()
}

/// Footprint of a structural array change covering `keys` and `length`.
fn structural(keys: impl IntoIterator<Item = Key>) -> Footprint {
    let mut footprint = Footprint::unspecific();
    footprint.categories |= WriteCategory::OWN_KEYS | WriteCategory::PROPERTY;
    footprint.keys.extend(keys);
    footprint.keys.push(Key::name("length"));
    footprint
}

/// Strict equality: SameValueZero except that `NaN` equals nothing.
fn strict_equals(a: &Value, b: &Value) -> bool {
    !matches!(a, Value::Number(n) if n.is_nan()) && a.same_value(b)
}

fn array_method(
    target: ObjId,
    slots: &mut Vec<Option<Value>>,
    method: Method,
) -> Result<(Completion, Footprint)> {
    let len = slots.len();
    Ok(match method {
        Method::Push(items) => {
            if items.is_empty() {
                return Ok((Completion::Value(Value::from(len)), Footprint::none()));
            }
            let added = len..len + items.len();
            slots.extend(items.into_iter().map(Some));
            (
                Completion::Value(Value::from(slots.len())),
                structural(added.map(Key::Index)),
            )
        }
        Method::Pop => match slots.pop() {
            Some(last) => (
                Completion::Value(last.unwrap_or_default()),
                structural([Key::Index(len - 1)]),
            ),
            None => (Completion::undefined(), Footprint::none()),
        },
        Method::Shift => {
            if slots.is_empty() {
                return Ok((Completion::undefined(), Footprint::none()));
            }
            let first = slots.remove(0);
            (
                Completion::Value(first.unwrap_or_default()),
                structural((0..len).map(Key::Index)),
            )
        }
        Method::Unshift(items) => {
            if items.is_empty() {
                return Ok((Completion::Value(Value::from(len)), Footprint::none()));
            }
            let count = items.len();
            slots.splice(0..0, items.into_iter().map(Some));
            (
                Completion::Value(Value::from(slots.len())),
                structural((0..len + count).map(Key::Index)),
            )
        }
        Method::Splice {
            start,
            delete_count,
            items,
        } => {
            let start = start.min(len);
            let end = start + delete_count.min(len - start);
            if end == start && items.is_empty() {
                return Ok((Completion::List(Vec::new()), Footprint::none()));
            }
            let inserted = items.len();
            let removed: Vec<Value> = slots
                .splice(start..end, items.into_iter().map(Some))
                .map(|s| s.unwrap_or_default())
                .collect();
            let touched = if inserted == removed.len() {
                start..start + inserted
            } else {
                start..len.max(slots.len())
            };
            (Completion::List(removed), structural(touched.map(Key::Index)))
        }
        Method::Includes(needle) => (
            Completion::Value(Value::Bool(
                slots.iter().any(|s| slot_value(s).same_value(&needle)),
            )),
            Footprint::none(),
        ),
        Method::IndexOf(needle) => {
            let found = slots
                .iter()
                .position(|s| s.as_ref().is_some_and(|v| strict_equals(v, &needle)));
            let index = found.map_or(Value::Number(-1.0), Value::from);
            (Completion::Value(index), Footprint::none())
        }
        Method::Reverse => {
            slots.reverse();
            let footprint = if len > 1 {
                Footprint::unspecific()
            } else {
                Footprint::none()
            };
            (Completion::Value(Value::Object(target)), footprint)
        }
        Method::Fill(value) => {
            let changed = slots
                .iter()
                .any(|s| !s.as_ref().is_some_and(|v| v.same_value(&value)));
            for slot in slots.iter_mut() {
                *slot = Some(value.clone());
            }
            let footprint = if changed {
                Footprint::unspecific()
            } else {
                Footprint::none()
            };
            (Completion::Value(Value::Object(target)), footprint)
        }
        Method::Keys => (
            Completion::List((0..len).map(Value::from).collect()),
            Footprint::none(),
        ),
        Method::Values => (
            Completion::List(slots.iter().map(slot_value).collect()),
            Footprint::none(),
        ),
        Method::Entries => (
            Completion::Entries(
                slots
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (Value::from(i), slot_value(s)))
                    .collect(),
            ),
            Footprint::none(),
        ),
        Method::Size => (Completion::Value(Value::from(len)), Footprint::none()),
        other => {
            return Err(WeftError::unsupported(format!(
                "`{}` on an array",
                other.name()
            )));
        }
    })
}

fn set_method(set: &mut Ordered<()>, method: Method) -> Result<(Completion, Footprint)> {
    Ok(match method {
        Method::Add(member) => {
            let footprint = if set.insert(member.clone(), ()).is_none() {
                Footprint::map_presence(member)
            } else {
                Footprint::none()
            };
            (Completion::undefined(), footprint)
        }
        Method::Has(member) => (
            Completion::Value(Value::Bool(set.position(&member).is_some())),
            Footprint::none(),
        ),
        Method::Remove(member) => {
            let removed = set.remove(&member).is_some();
            let footprint = if removed {
                Footprint::map_presence(member)
            } else {
                Footprint::none()
            };
            (Completion::Value(Value::Bool(removed)), footprint)
        }
        Method::Clear => {
            let mut footprint = Footprint::none();
            for (member, ()) in set.entries.drain(..) {
                footprint.merge(Footprint::map_presence(member));
            }
            set.clear();
            (Completion::undefined(), footprint)
        }
        Method::Keys | Method::Values => (
            Completion::List(set.entries.iter().map(|(m, ())| m.clone()).collect()),
            Footprint::none(),
        ),
        Method::Entries => (
            Completion::Entries(
                set.entries
                    .iter()
                    .map(|(m, ())| (m.clone(), m.clone()))
                    .collect(),
            ),
            Footprint::none(),
        ),
        Method::Size => (Completion::Value(Value::from(set.len())), Footprint::none()),
        other => {
            return Err(WeftError::unsupported(format!(
                "`{}` on a set",
                other.name()
            )));
        }
    })
}

fn map_method(map: &mut Ordered<Value>, method: Method) -> Result<(Completion, Footprint)> {
    Ok(match method {
        Method::Get(key) => (
            Completion::Value(map.get(&key).cloned().unwrap_or_default()),
            Footprint::none(),
        ),
        Method::Insert(key, value) => {
            let footprint = match map.get(&key) {
                Some(current) if current.same_value(&value) => Footprint::none(),
                Some(_) => Footprint::map_value(key.clone()),
                None => {
                    let mut footprint = Footprint::map_presence(key.clone());
                    footprint.categories |= WriteCategory::MAP_KEY_VALUE;
                    footprint
                }
            };
            map.insert(key, value);
            (Completion::undefined(), footprint)
        }
        Method::Has(key) => (
            Completion::Value(Value::Bool(map.position(&key).is_some())),
            Footprint::none(),
        ),
        Method::Remove(key) => {
            let removed = map.remove(&key).is_some();
            let footprint = if removed {
                let mut footprint = Footprint::map_presence(key);
                footprint.categories |= WriteCategory::MAP_KEY_VALUE;
                footprint
            } else {
                Footprint::none()
            };
            (Completion::Value(Value::Bool(removed)), footprint)
        }
        Method::Clear => {
            let mut footprint = Footprint::none();
            for (key, _) in map.entries.drain(..) {
                footprint.merge(Footprint::map_presence(key));
            }
            footprint.categories |= WriteCategory::MAP_KEY_VALUE;
            map.clear();
            (Completion::undefined(), footprint)
        }
        Method::Keys => (
            Completion::List(map.entries.iter().map(|(k, _)| k.clone()).collect()),
            Footprint::none(),
        ),
        Method::Values => (
            Completion::List(map.entries.iter().map(|(_, v)| v.clone()).collect()),
            Footprint::none(),
        ),
        Method::Entries => (Completion::Entries(map.entries.clone()), Footprint::none()),
        Method::Size => (Completion::Value(Value::from(map.len())), Footprint::none()),
        other => {
            return Err(WeftError::unsupported(format!(
                "`{}` on a map",
                other.name()
            )));
        }
    })
}

/// Plain objects only support enumeration (`Object.keys`-style).
fn plain_method(
    props: &crate::object::PropertyMap,
    method: Method,
) -> Result<(Completion, Footprint)> {
    let enumerable = || props.iter().filter(|(_, p)| p.is_enumerable());
    Ok(match method {
        Method::Keys => (
            Completion::List(enumerable().map(|(k, _)| Value::from(k.to_string())).collect()),
            Footprint::none(),
        ),
        Method::Values => (
            Completion::List(
                enumerable()
                    .map(|(_, p)| p.value().cloned().unwrap_or_default())
                    .collect(),
            ),
            Footprint::none(),
        ),
        Method::Entries => (
            Completion::Entries(
                enumerable()
                    .map(|(k, p)| (Value::from(k.to_string()), p.value().cloned().unwrap_or_default()))
                    .collect(),
            ),
            Footprint::none(),
        ),
        other => {
            return Err(WeftError::unsupported(format!(
                "`{}` on a plain object",
                other.name()
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::{Interest, Listener};
    use std::cell::Cell;
    use std::rc::Rc;

    fn values(heap: &Heap, arr: ObjId) -> Vec<Value> {
        heap.invoke(arr, Method::Values).unwrap().into_list()
    }

    #[test]
    fn push_pop_shift_unshift() {
        let heap = Heap::new();
        let arr = heap.new_array([Value::from(2)]);
        let (len, fp) = heap.apply_method(arr, Method::Push(vec![Value::from(3)])).unwrap();
        assert_eq!(len.into_value(), Value::from(2));
        assert!(fp.categories.contains(WriteCategory::OWN_KEYS | WriteCategory::UNSPECIFIC));
        assert!(fp.keys.contains(&Key::Index(1)));

        heap.invoke(arr, Method::Unshift(vec![Value::from(1)])).unwrap();
        assert_eq!(values(&heap, arr), [1, 2, 3].map(Value::from));
        assert_eq!(heap.invoke(arr, Method::Pop).unwrap().into_value(), Value::from(3));
        assert_eq!(heap.invoke(arr, Method::Shift).unwrap().into_value(), Value::from(1));
        assert_eq!(values(&heap, arr), [Value::from(2)]);
    }

    #[test]
    fn pop_on_empty_array_changes_nothing() {
        let heap = Heap::new();
        let arr = heap.new_array([]);
        let (done, fp) = heap.apply_method(arr, Method::Pop).unwrap();
        assert_eq!(done, Completion::undefined());
        assert!(fp.is_empty());
    }

    #[test]
    fn splice_clamps_and_returns_removed() {
        let heap = Heap::new();
        let arr = heap.new_array([1, 2, 3, 4].map(Value::from));
        let removed = heap
            .invoke(
                arr,
                Method::Splice {
                    start: 1,
                    delete_count: 10,
                    items: vec![Value::str("x")],
                },
            )
            .unwrap()
            .into_list();
        assert_eq!(removed, [2, 3, 4].map(Value::from));
        assert_eq!(values(&heap, arr), [Value::from(1), Value::str("x")]);
    }

    #[test]
    fn includes_sees_nan_and_holes_index_of_does_not() {
        let heap = Heap::new();
        let arr = heap.new_sparse_array([Some(Value::Number(f64::NAN)), None]);
        let has = |v: Value| heap.invoke(arr, Method::Includes(v)).unwrap().into_value();
        assert_eq!(has(Value::Number(f64::NAN)), Value::Bool(true));
        assert_eq!(has(Value::Undefined), Value::Bool(true));
        let idx = heap
            .invoke(arr, Method::IndexOf(Value::Number(f64::NAN)))
            .unwrap()
            .into_value();
        assert_eq!(idx, Value::Number(-1.0));
    }

    #[test]
    fn inconsistent_comparator_still_yields_a_permutation() {
        let heap = Heap::new();
        let values: Vec<Value> = (0..200).map(Value::from).collect();
        let arr = heap.new_array(values.clone());
        let flip = Rc::new(core::cell::Cell::new(false));
        let f = Rc::clone(&flip);
        let compare: crate::proxy::Comparator = Rc::new(move |_: &Value, _: &Value| {
            f.set(!f.get());
            if f.get() {
                core::cmp::Ordering::Less
            } else {
                core::cmp::Ordering::Greater
            }
        });
        heap.invoke(arr, Method::Sort(compare)).unwrap();

        let mut sorted: Vec<f64> = heap
            .array_slots(arr)
            .unwrap()
            .into_iter()
            .map(|slot| slot.and_then(|v| v.as_number()).unwrap())
            .collect();
        assert_eq!(sorted.len(), 200);
        sorted.sort_by(f64::total_cmp);
        let expected: Vec<f64> = (0..200).map(f64::from).collect();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let heap = Heap::new();
        let arr = heap.new_array([
            Value::str("b1"),
            Value::str("a1"),
            Value::str("b2"),
            Value::str("a2"),
        ]);
        let compare: crate::proxy::Comparator = Rc::new(|a: &Value, b: &Value| {
            let first = |v: &Value| v.as_str().and_then(|s| s.chars().next());
            first(a).cmp(&first(b))
        });
        heap.invoke(arr, Method::Sort(compare)).unwrap();
        assert_eq!(
            heap.array_slots(arr).unwrap(),
            ["a1", "a2", "b1", "b2"].map(|s| Some(Value::str(s))).to_vec()
        );
    }

    #[test]
    fn sort_places_undefined_then_holes_last() {
        let heap = Heap::new();
        let arr = heap.new_sparse_array([
            Some(Value::from(3)),
            None,
            Some(Value::Undefined),
            Some(Value::from(1)),
        ]);
        let compare: crate::proxy::Comparator = Rc::new(|a: &Value, b: &Value| {
            a.as_number()
                .unwrap_or(0.0)
                .total_cmp(&b.as_number().unwrap_or(0.0))
        });
        heap.invoke(arr, Method::Sort(compare)).unwrap();
        assert_eq!(
            heap.array_slots(arr).unwrap(),
            vec![
                Some(Value::from(1)),
                Some(Value::from(3)),
                Some(Value::Undefined),
                None
            ]
        );
    }

    #[test]
    fn set_add_has_remove() {
        let heap = Heap::new();
        let set = heap.new_set([Value::from(1)]);
        let (_, fp) = heap.apply_method(set, Method::Add(Value::from(1))).unwrap();
        assert!(fp.is_empty(), "existing member");
        let (_, fp) = heap.apply_method(set, Method::Add(Value::from(2))).unwrap();
        assert!(fp.categories.contains(WriteCategory::MAP_KEY_PRESENCE));
        assert_eq!(
            heap.invoke(set, Method::Has(Value::from(2))).unwrap().into_value(),
            Value::Bool(true)
        );
        heap.invoke(set, Method::Remove(Value::from(1))).unwrap();
        assert_eq!(heap.set_members(set).unwrap(), [Value::from(2)]);
        assert_eq!(heap.get(set, "size").unwrap(), Value::from(1));
    }

    #[test]
    fn map_insert_footprints() {
        let heap = Heap::new();
        let map = heap.new_map([]);
        let (_, fp) = heap
            .apply_method(map, Method::Insert(Value::str("k"), Value::from(1)))
            .unwrap();
        assert!(fp.categories.contains(WriteCategory::MAP_KEY_PRESENCE));
        let (_, fp) = heap
            .apply_method(map, Method::Insert(Value::str("k"), Value::from(2)))
            .unwrap();
        assert!(fp.categories.contains(WriteCategory::MAP_KEY_VALUE));
        assert!(!fp.categories.contains(WriteCategory::MAP_KEY_PRESENCE));
        let (_, fp) = heap
            .apply_method(map, Method::Insert(Value::str("k"), Value::from(2)))
            .unwrap();
        assert!(fp.is_empty());
        assert_eq!(
            heap.invoke(map, Method::Get(Value::str("k"))).unwrap().into_value(),
            Value::from(2)
        );
    }

    #[test]
    fn enhanced_map_notifies_value_listener() {
        let heap = Heap::new();
        let map = heap.new_map([(Value::str("k"), Value::from(1))]);
        heap.enhance(map).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        heap.listen(
            map,
            Interest::MapKeyValue(Value::str("k")),
            Listener::new(move || h.set(h.get() + 1)),
        )
        .unwrap();
        heap.invoke(map, Method::Insert(Value::str("other"), Value::from(1)))
            .unwrap();
        assert_eq!(hits.get(), 0);
        heap.invoke(map, Method::Insert(Value::str("k"), Value::from(5)))
            .unwrap();
        assert_eq!(hits.get(), 1);
        heap.invoke(map, Method::Clear).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn custom_routine_runs_without_borrow() {
        let heap = Heap::new();
        let arr = heap.new_array([Value::from(1)]);
        let body: crate::proxy::NativeFn = Rc::new(|heap: &Heap, this: ObjId| {
            let first = heap.get(this, 0usize)?;
            heap.set(this, 0usize, Value::from(first.as_number().unwrap_or(0.0) + 1.0))?;
            Ok(Completion::Value(first))
        });
        let (done, fp) = heap
            .apply_method(arr, Method::Custom { name: "bump", body })
            .unwrap();
        assert_eq!(done.into_value(), Value::from(1));
        assert!(fp.categories.contains(WriteCategory::UNSPECIFIC));
        assert_eq!(heap.get(arr, 0usize).unwrap(), Value::from(2));
    }

    #[test]
    fn weak_collections_reject_methods() {
        let heap = Heap::new();
        let weak = heap.new_weak_set();
        assert!(matches!(
            heap.invoke(weak, Method::Add(Value::from(1))),
            Err(WeftError::Unsupported { .. })
        ));
    }

    #[test]
    fn plain_object_enumeration() {
        let heap = Heap::new();
        let obj = heap.object_from([("a", 1), ("b", 2)]);
        let keys = heap.invoke(obj, Method::Keys).unwrap().into_list();
        assert_eq!(keys, [Value::str("a"), Value::str("b")]);
    }
}
