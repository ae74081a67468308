#![forbid(unsafe_code)]

//! Identity-preserving reconciliation for Weft object graphs.
//!
//! When fresh data arrives for a graph that is already on screen (or held by
//! listeners), replacing it wholesale would break every reference and every
//! subscription into it. [`reconcile`] instead copies the new contents into
//! the old objects wherever it can match them, and returns the old root.
//!
//! Container members are matched by their `id`/`key` fields
//! ([`ObjRegistry`]); lists that legitimately repeat an entity can be
//! collapsed first with [`normalize_list`] / [`normalize_lists`].
//!
//! New-side objects that were replaced by a retained instance are
//! invalidated: touching them afterwards fails with an obsolete-object error
//! naming the instance that replaced them and where `reconcile` was called.
//!
//! # Example
//!
//! ```
//! use weft_core::{Heap, Value};
//! use weft_preserve::{PreserveOptions, reconcile};
//!
//! let heap = Heap::new();
//! let old = heap.parse_json(r#"{"todos": [{"id": 1, "done": false}]}"#)?;
//! let kept = heap.get_path(old.as_object().unwrap(), &["todos".into(), 0usize.into()])?;
//!
//! let new = heap.parse_json(r#"{"todos": [{"id": 2, "done": false}, {"id": 1, "done": true}]}"#)?;
//! let merged = reconcile(&heap, &old, &new, &PreserveOptions::default())?;
//!
//! let root = merged.as_object().unwrap();
//! assert_eq!(merged, old);
//! assert_eq!(heap.get_path(root, &["todos".into(), 1usize.into()])?, kept);
//! assert_eq!(heap.get_path(root, &["todos".into(), 1usize.into(), "done".into()])?, Value::Bool(true));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod normalize;
pub mod options;
pub mod path;
pub mod reconcile;
pub mod registry;

pub use error::{PreserveError, Result};
pub use normalize::{normalize_list, normalize_lists};
pub use options::{HintFields, NormalizeOptions, PreserveOptions};
pub use path::{GraphPath, Segment};
pub use reconcile::{ReconcileReport, reconcile, reconcile_detailed};
pub use registry::{Identity, ObjRegistry, identity_of};
