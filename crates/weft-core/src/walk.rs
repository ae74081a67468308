#![forbid(unsafe_code)]

//! Graph traversal and structural equality over raw object storage.
//!
//! Both operate on resolved targets: proxies are looked through, accessors
//! are not invoked and nothing is tracked.

use ahash::AHashSet;

use crate::error::Result;
use crate::heap::Heap;
use crate::object::{Body, ObjectKind};
use crate::value::{ObjId, Value};

/// Visitor decision for [`Heap::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// Descend into the object's children.
    Continue,
    /// Do not descend into this object.
    Skip,
    /// Abort the walk.
    Stop,
}

impl Heap {
    /// Direct object-or-primitive children: array elements (holes skipped),
    /// enumerable data properties, set members, map keys and values.
    pub fn children(&self, id: ObjId) -> Result<Vec<Value>> {
        self.inspect(id, |o| {
            let mut out: Vec<Value> = o
                .props
                .iter()
                .filter(|(_, p)| p.is_enumerable())
                .filter_map(|(_, p)| p.value().cloned())
                .collect();
            match &o.body {
                Body::Array(slots) => out.extend(slots.iter().flatten().cloned()),
                Body::Set(set) => out.extend(set.entries.iter().map(|(m, ())| m.clone())),
                Body::Map(map) => {
                    for (k, v) in &map.entries {
                        out.push(k.clone());
                        out.push(v.clone());
                    }
                }
                _ => {}
            }
            out
        })
    }

    /// Depth-first pre-order walk over every object reachable from `root`,
    /// visiting each resolved object once. Obsolete objects are visited but
    /// not descended into.
    pub fn walk(&self, root: &Value, mut visit: impl FnMut(ObjId) -> WalkControl) -> Result<()> {
        let mut seen = AHashSet::new();
        let mut stack: Vec<ObjId> = root.as_object().into_iter().collect();
        while let Some(id) = stack.pop() {
            let id = self.resolve(id);
            if !seen.insert(id) {
                continue;
            }
            match visit(id) {
                WalkControl::Stop => return Ok(()),
                WalkControl::Skip => continue,
                WalkControl::Continue => {}
            }
            if self.is_obsolete(id) {
                continue;
            }
            let children = self.children(id)?;
            stack.extend(children.iter().rev().filter_map(Value::as_object));
        }
        Ok(())
    }

    /// Structural equality: same kinds and prototypes, equal primitives, and
    /// pairwise structurally equal children. Cycles compare equal when they
    /// line up.
    pub fn deep_equal(&self, a: &Value, b: &Value) -> Result<bool> {
        let mut assumed = AHashSet::new();
        self.deep_equal_inner(a, b, &mut assumed)
    }

    fn deep_equal_inner(
        &self,
        a: &Value,
        b: &Value,
        assumed: &mut AHashSet<(ObjId, ObjId)>,
    ) -> Result<bool> {
        let (Some(x), Some(y)) = (a.as_object(), b.as_object()) else {
            return Ok(a.same_value(b));
        };
        let (x, y) = (self.resolve(x), self.resolve(y));
        if x == y || !assumed.insert((x, y)) {
            return Ok(true);
        }
        let kind = self.kind(x)?;
        if kind != self.kind(y)? || self.prototype_of(x)? != self.prototype_of(y)? {
            return Ok(false);
        }

        let (left, right) = (self.data_entries(x)?, self.data_entries(y)?);
        if left.len() != right.len() {
            return Ok(false);
        }
        for (key, lv) in &left {
            let Some((_, rv)) = right.iter().find(|(k, _)| k == key) else {
                return Ok(false);
            };
            if !self.deep_equal_inner(lv, rv, assumed)? {
                return Ok(false);
            }
        }

        match kind {
            ObjectKind::Array => {
                let (ls, rs) = (self.array_slots(x)?, self.array_slots(y)?);
                if ls.len() != rs.len() {
                    return Ok(false);
                }
                for (l, r) in ls.iter().zip(&rs) {
                    match (l, r) {
                        (None, None) => {}
                        (Some(l), Some(r)) if self.deep_equal_inner(l, r, assumed)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            ObjectKind::Set => {
                let (lm, rm) = (self.set_members(x)?, self.set_members(y)?);
                self.pairwise(&lm, &rm, assumed)
            }
            ObjectKind::Map => {
                let (le, re) = (self.map_entries(x)?, self.map_entries(y)?);
                if le.len() != re.len() {
                    return Ok(false);
                }
                for ((lk, lv), (rk, rv)) in le.iter().zip(&re) {
                    if !self.deep_equal_inner(lk, rk, assumed)?
                        || !self.deep_equal_inner(lv, rv, assumed)?
                    {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ObjectKind::Plain => Ok(true),
            ObjectKind::WeakSet | ObjectKind::WeakMap => Ok(false),
        }
    }

    fn pairwise(
        &self,
        left: &[Value],
        right: &[Value],
        assumed: &mut AHashSet<(ObjId, ObjId)>,
    ) -> Result<bool> {
        if left.len() != right.len() {
            return Ok(false);
        }
        for (l, r) in left.iter().zip(right) {
            if !self.deep_equal_inner(l, r, assumed)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
