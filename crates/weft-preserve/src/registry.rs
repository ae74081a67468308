#![forbid(unsafe_code)]

//! Identity-hint registries.
//!
//! Within one container, a plain-object member's identity is the pair of its
//! `id` and `key` fields (either may be absent, not both). Hint fields must be
//! strings or numbers; `null` and `undefined` count as absent.
//!
//! # Invariants
//!
//! 1. Either every plain-object member of a container carries a hint, or
//!    none does. Primitives and non-plain objects never carry one.
//! 2. No two distinct objects in one container share an identity. The same
//!    object appearing twice is not a duplicate.
//!
//! # Failure Modes
//!
//! - Violations of (1) and (2) are reported as
//!   [`PreserveError::MixedHints`] and [`PreserveError::DuplicateIdentity`]
//!   at the container's path.

use core::fmt;

use ahash::AHashMap;
use weft_core::{DEFAULT_PREVIEW_LEN, Heap, Key, ObjId, ObjectKind, Value, format_number};

use crate::error::{PreserveError, Result};
use crate::options::HintFields;
use crate::path::{GraphPath, Segment};

/// The `id`/`key` pair identifying a container member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: Option<Value>,
    pub key: Option<Value>,
}

fn fmt_hint(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Number(n) => f.write_str(&format_number(*n)),
        Value::Str(s) => write!(f, "{:?}", &**s),
        other => f.write_str(other.type_name()),
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            f.write_str("id=")?;
            fmt_hint(f, id)?;
        }
        if let Some(key) = &self.key {
            if self.id.is_some() {
                f.write_str(", ")?;
            }
            f.write_str("key=")?;
            fmt_hint(f, key)?;
        }
        Ok(())
    }
}

fn hint_field(
    heap: &Heap,
    object: ObjId,
    field: &'static str,
    path: &GraphPath,
) -> Result<Option<Value>> {
    let value = heap
        .own_property(object, &Key::name(field))?
        .and_then(|p| p.value().cloned())
        .unwrap_or_default();
    match value {
        Value::Undefined | Value::Null => Ok(None),
        Value::Str(_) | Value::Number(_) => Ok(Some(value)),
        other => Err(PreserveError::InvalidHint {
            path: path.clone(),
            field,
            found: heap.preview(&other, DEFAULT_PREVIEW_LEN),
        }),
    }
}

/// Identity of `value` as a container member, if it is a plain object
/// carrying a hint. Fields are read raw: no accessors run and no reads are
/// recorded, even when `value` is a tracking wrapper.
pub fn identity_of(
    heap: &Heap,
    value: &Value,
    hints: HintFields,
    path: &GraphPath,
) -> Result<Option<Identity>> {
    let Some(id) = value.as_object() else {
        return Ok(None);
    };
    if hints.is_empty() || heap.kind(id)? != ObjectKind::Plain {
        return Ok(None);
    }
    let id_field = if hints.ids {
        hint_field(heap, id, "id", path)?
    } else {
        None
    };
    let key_field = if hints.keys {
        hint_field(heap, id, "key", path)?
    } else {
        None
    };
    if id_field.is_none() && key_field.is_none() {
        return Ok(None);
    }
    Ok(Some(Identity {
        id: id_field,
        key: key_field,
    }))
}

/// Members of one container indexed by identity.
#[derive(Debug, Default)]
pub struct ObjRegistry {
    /// Identity per member, in member order.
    identities: Vec<Option<Identity>>,
    /// Member handle (as stored) per identity.
    members: AHashMap<Identity, Value>,
    hinted: bool,
}

impl ObjRegistry {
    /// Index `members`, checking hint consistency and uniqueness. `path` is
    /// the container's own path; each member is located by its segment.
    pub fn build(
        heap: &Heap,
        members: impl IntoIterator<Item = (Segment, Value)>,
        hints: HintFields,
        path: &GraphPath,
    ) -> Result<Self> {
        let mut registry = Self::default();
        // First plain member seen, with whether it carried a hint.
        let mut first_plain: Option<(bool, Value)> = None;
        for (segment, value) in members {
            let identity = identity_of(heap, &value, hints, &path.child(segment))?;
            let is_plain = match value.as_object() {
                Some(id) => heap.kind(id)? == ObjectKind::Plain,
                None => false,
            };
            if is_plain && !hints.is_empty() {
                let hinted = identity.is_some();
                match &first_plain {
                    None => first_plain = Some((hinted, value.clone())),
                    Some((expected, first)) if *expected != hinted => {
                        let (with, without) = if hinted {
                            (&value, first)
                        } else {
                            (first, &value)
                        };
                        return Err(PreserveError::MixedHints {
                            path: path.clone(),
                            hinted: heap.preview(with, DEFAULT_PREVIEW_LEN),
                            unhinted: heap.preview(without, DEFAULT_PREVIEW_LEN),
                        });
                    }
                    Some(_) => {}
                }
            }
            if let Some(identity) = &identity {
                registry.hinted = true;
                match registry.members.get(identity) {
                    Some(existing) if !same_object(heap, existing, &value) => {
                        return Err(PreserveError::DuplicateIdentity {
                            path: path.clone(),
                            identity: identity.to_string(),
                            first: heap.preview(existing, DEFAULT_PREVIEW_LEN),
                            second: heap.preview(&value, DEFAULT_PREVIEW_LEN),
                        });
                    }
                    Some(_) => {}
                    None => {
                        registry.members.insert(identity.clone(), value);
                    }
                }
            }
            registry.identities.push(identity);
        }
        Ok(registry)
    }

    /// Identity of the member at `index`, in build order.
    #[must_use]
    pub fn identity_at(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&Value> {
        self.members.get(identity)
    }

    /// Whether any member carried a hint.
    #[must_use]
    pub fn is_hinted(&self) -> bool {
        self.hinted
    }

    /// Number of distinct identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn same_object(heap: &Heap, a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => heap.resolve(a) == heap.resolve(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(values: &[Value]) -> Vec<(Segment, Value)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (Segment::Key(Key::Index(i)), v.clone()))
            .collect()
    }

    #[test]
    fn primitives_mix_freely_with_hinted_objects() {
        let heap = Heap::new();
        let item = heap.object_from([("id", 1)]);
        let values = [Value::str("a"), Value::Object(item), Value::str("c")];
        let registry =
            ObjRegistry::build(&heap, members(&values), HintFields::ALL, &GraphPath::root())
                .unwrap();
        assert!(registry.is_hinted());
        assert_eq!(registry.len(), 1);
        let identity = registry.identity_at(1).unwrap();
        assert_eq!(identity.to_string(), "id=1");
        assert_eq!(registry.get(identity), Some(&Value::Object(item)));
        assert!(registry.identity_at(0).is_none());
    }

    #[test]
    fn mixed_hints_are_rejected() {
        let heap = Heap::new();
        let values = [
            Value::Object(heap.object_from([("id", 1)])),
            Value::Object(heap.object_from([("name", "x")])),
        ];
        let err = ObjRegistry::build(
            &heap,
            members(&values),
            HintFields::ALL,
            &GraphPath::root().key("items"),
        )
        .unwrap_err();
        assert!(matches!(err, PreserveError::MixedHints { .. }));
        assert!(err.to_string().contains("$.items"));
    }

    #[test]
    fn duplicates_are_rejected_even_with_equal_content() {
        let heap = Heap::new();
        let values = [
            Value::Object(heap.object_from([("id", 7)])),
            Value::Object(heap.object_from([("id", 7)])),
        ];
        let err = ObjRegistry::build(&heap, members(&values), HintFields::ALL, &GraphPath::root())
            .unwrap_err();
        assert!(err.to_string().contains("id=7"), "{err}");
    }

    #[test]
    fn the_same_object_twice_is_not_a_duplicate() {
        let heap = Heap::new();
        let shared = Value::Object(heap.object_from([("key", "k")]));
        let registry = ObjRegistry::build(
            &heap,
            members(&[shared.clone(), shared]),
            HintFields::ALL,
            &GraphPath::root(),
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn id_and_key_combine() {
        let heap = Heap::new();
        let values = [
            Value::Object(heap.object_from([("id", Value::from(1)), ("key", Value::str("a"))])),
            Value::Object(heap.object_from([("id", Value::from(1)), ("key", Value::str("b"))])),
        ];
        let registry =
            ObjRegistry::build(&heap, members(&values), HintFields::ALL, &GraphPath::root())
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.identity_at(1).unwrap().to_string(), r#"id=1, key="b""#);

        let ids_only = HintFields {
            ids: true,
            keys: false,
        };
        assert!(ObjRegistry::build(&heap, members(&values), ids_only, &GraphPath::root()).is_err());
    }

    #[test]
    fn hints_must_be_strings_or_numbers() {
        let heap = Heap::new();
        let bad = Value::Object(heap.object_from([("id", true)]));
        let err = identity_of(&heap, &bad, HintFields::ALL, &GraphPath::root().key(0usize))
            .unwrap_err();
        assert!(matches!(err, PreserveError::InvalidHint { field: "id", .. }));
    }

    #[test]
    fn arrays_never_carry_identity() {
        let heap = Heap::new();
        let arr = Value::Object(heap.new_array([Value::from(1)]));
        assert!(
            identity_of(&heap, &arr, HintFields::ALL, &GraphPath::root())
                .unwrap()
                .is_none()
        );
    }
}
