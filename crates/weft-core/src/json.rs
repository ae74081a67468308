#![forbid(unsafe_code)]

//! JSON import and export.
//!
//! Snapshots produced by a data-loading layer arrive as JSON; [`Heap::from_json`]
//! materializes them as fresh heap objects ready for reconciliation.
//! [`Heap::to_json`] goes the other way for inspection and tests.
//!
//! # Failure Modes
//!
//! - Export of a cyclic graph fails with [`WeftError::Unsupported`].
//! - Export of weak collections fails with [`WeftError::Unsupported`].
//! - Malformed JSON text fails with [`WeftError::Json`].
//! - Non-finite numbers export as `null`, as `JSON.stringify` does.

use ahash::AHashSet;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as Json};

use crate::error::{Result, WeftError};
use crate::heap::Heap;
use crate::object::ObjectKind;
use crate::value::{ObjId, Value};

impl Heap {
    /// Build fresh objects for a JSON document. Objects become plain objects,
    /// arrays become dense arrays.
    pub fn from_json(&self, json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::str(s),
            Json::Array(items) => {
                let values: Vec<Value> = items.iter().map(|item| self.from_json(item)).collect();
                Value::Object(self.new_array(values))
            }
            Json::Object(fields) => {
                let values: Vec<(String, Value)> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.from_json(v)))
                    .collect();
                Value::Object(self.object_from(values))
            }
        }
    }

    /// Parse JSON text and materialize it.
    pub fn parse_json(&self, text: &str) -> Result<Value> {
        let json: Json = serde_json::from_str(text)?;
        Ok(self.from_json(&json))
    }

    /// Export `value` as JSON. Undefined properties are omitted; holes and
    /// undefined elements become `null`; sets become arrays; maps become
    /// objects when every key is a string and arrays of pairs otherwise.
    pub fn to_json(&self, value: &Value) -> Result<Json> {
        let mut path = AHashSet::new();
        self.export(value, &mut path)
    }

    fn export(&self, value: &Value, path: &mut AHashSet<ObjId>) -> Result<Json> {
        let id = match value {
            Value::Undefined | Value::Null => return Ok(Json::Null),
            Value::Bool(b) => return Ok(Json::Bool(*b)),
            Value::Number(n) => return Ok(number(*n)),
            Value::Str(s) => return Ok(Json::String(s.to_string())),
            Value::Object(id) => self.resolve(*id),
        };
        if !path.insert(id) {
            return Err(WeftError::unsupported(format!(
                "exporting cyclic graph through {id} as JSON"
            )));
        }
        let json = match self.kind(id)? {
            ObjectKind::Plain => {
                let mut fields = JsonMap::new();
                for (key, v) in self.data_entries(id)? {
                    if !v.is_undefined() {
                        fields.insert(key.to_string(), self.export(&v, path)?);
                    }
                }
                Json::Object(fields)
            }
            ObjectKind::Array => {
                let mut items = Vec::new();
                for slot in self.array_slots(id)? {
                    items.push(self.export(&slot.unwrap_or_default(), path)?);
                }
                Json::Array(items)
            }
            ObjectKind::Set => {
                let mut items = Vec::new();
                for member in self.set_members(id)? {
                    items.push(self.export(&member, path)?);
                }
                Json::Array(items)
            }
            ObjectKind::Map => {
                let entries = self.map_entries(id)?;
                if entries.iter().all(|(k, _)| k.as_str().is_some()) {
                    let mut fields = JsonMap::new();
                    for (k, v) in &entries {
                        fields.insert(k.as_str().unwrap_or_default().to_owned(), self.export(v, path)?);
                    }
                    Json::Object(fields)
                } else {
                    let mut pairs = Vec::new();
                    for (k, v) in &entries {
                        pairs.push(Json::Array(vec![self.export(k, path)?, self.export(v, path)?]));
                    }
                    Json::Array(pairs)
                }
            }
            kind @ (ObjectKind::WeakSet | ObjectKind::WeakMap) => {
                return Err(WeftError::unsupported(format!("exporting a {kind} as JSON")));
            }
        };
        path.remove(&id);
        Ok(json)
    }
}

fn number(n: f64) -> Json {
    if n.is_finite() && n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
        #[allow(clippy::cast_possible_truncation)]
        return Json::Number(JsonNumber::from(n as i64));
    }
    JsonNumber::from_f64(n).map_or(Json::Null, Json::Number)
}
