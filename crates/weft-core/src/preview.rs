#![forbid(unsafe_code)]

//! Shortened textual previews of values, for diagnostics.

use core::fmt::Write as _;

use ahash::AHashSet;

use crate::heap::Heap;
use crate::object::Body;
use crate::value::{ObjId, Value};

/// Default preview length used in error messages.
pub const DEFAULT_PREVIEW_LEN: usize = 80;

const MAX_DEPTH: usize = 3;
const MAX_ITEMS: usize = 8;

/// Format a number the way a script runtime prints it: integral values have
/// no fractional part.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl Heap {
    /// Render `value` in a compact, literal-like notation, cut to at most
    /// `max_len` characters. Never fails: obsolete or unknown objects render
    /// as placeholders.
    #[must_use]
    pub fn preview(&self, value: &Value, max_len: usize) -> String {
        let mut out = String::new();
        let mut stack = AHashSet::new();
        self.render(value, 0, &mut stack, &mut out);
        truncate(out, max_len)
    }

    fn render(&self, value: &Value, depth: usize, stack: &mut AHashSet<ObjId>, out: &mut String) {
        match value {
            Value::Undefined => out.push_str("undefined"),
            Value::Null => out.push_str("null"),
            Value::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Value::Number(n) => out.push_str(&format_number(*n)),
            Value::Str(s) => {
                let _ = write!(out, "{:?}", &**s);
            }
            Value::Object(id) => self.render_object(*id, depth, stack, out),
        }
    }

    fn render_object(&self, id: ObjId, depth: usize, stack: &mut AHashSet<ObjId>, out: &mut String) {
        let id = self.resolve(id);
        if self.is_obsolete(id) {
            let _ = write!(out, "<obsolete {id}>");
            return;
        }
        if depth >= MAX_DEPTH {
            out.push_str("{…}");
            return;
        }
        if !stack.insert(id) {
            out.push_str("<circular>");
            return;
        }
        let snapshot = self.inspect(id, |o| {
            let props: Vec<(String, Value)> = o
                .props
                .iter()
                .filter(|(_, p)| p.is_enumerable())
                .map(|(k, p)| (k.to_string(), p.value().cloned().unwrap_or_default()))
                .collect();
            let body = match &o.body {
                Body::Array(slots) => Shape::Array(slots.clone()),
                Body::Set(set) => Shape::Set(set.entries.iter().map(|(m, ())| m.clone()).collect()),
                Body::Map(map) => Shape::Map(map.entries.clone()),
                Body::WeakSet => Shape::Opaque("WeakSet"),
                Body::WeakMap => Shape::Opaque("WeakMap"),
                Body::Plain | Body::Proxy { .. } => Shape::Plain,
            };
            (props, body)
        });
        let Ok((props, shape)) = snapshot else {
            let _ = write!(out, "<unknown {id}>");
            stack.remove(&id);
            return;
        };

        let mut items = 0usize;
        let mut sep = |out: &mut String| -> bool {
            if items > 0 {
                out.push_str(", ");
            }
            items += 1;
            if items > MAX_ITEMS {
                out.push('…');
                return false;
            }
            true
        };
        match shape {
            Shape::Array(slots) => {
                out.push('[');
                for slot in &slots {
                    if !sep(out) {
                        break;
                    }
                    match slot {
                        Some(v) => self.render(v, depth + 1, stack, out),
                        None => out.push_str("<hole>"),
                    }
                }
                out.push(']');
            }
            Shape::Set(members) => {
                out.push_str("Set{");
                for m in &members {
                    if !sep(out) {
                        break;
                    }
                    self.render(m, depth + 1, stack, out);
                }
                out.push('}');
            }
            Shape::Map(entries) => {
                out.push_str("Map{");
                for (k, v) in &entries {
                    if !sep(out) {
                        break;
                    }
                    self.render(k, depth + 1, stack, out);
                    out.push_str(" => ");
                    self.render(v, depth + 1, stack, out);
                }
                out.push('}');
            }
            Shape::Opaque(name) => out.push_str(name),
            Shape::Plain => {
                out.push('{');
                for (k, v) in &props {
                    if !sep(out) {
                        break;
                    }
                    let _ = write!(out, "{k}: ");
                    self.render(v, depth + 1, stack, out);
                }
                out.push('}');
            }
        }
        stack.remove(&id);
    }
}

enum Shape {
    Plain,
    Array(Vec<Option<Value>>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Opaque(&'static str),
}

fn truncate(mut s: String, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s;
    }
    let cut = s
        .char_indices()
        .nth(max_len.saturating_sub(1))
        .map_or(s.len(), |(i, _)| i);
    s.truncate(cut);
    s.push('…');
    s
}
