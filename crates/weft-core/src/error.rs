#![forbid(unsafe_code)]

//! Error type shared by every heap operation.

use core::fmt;
use std::panic::Location;
use std::rc::Rc;

use thiserror::Error;

use crate::object::ObjectKind;
use crate::value::{Key, ObjId};

pub type Result<T> = std::result::Result<T, WeftError>;

#[derive(Debug, Error)]
pub enum WeftError {
    /// A consumer bypassed the wrapper contract.
    #[error("invariant violated: {message}")]
    Invariant { message: String },

    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error(
        "cannot track read-only property `{key}`: its object value would have to be \
         wrapped, which changes the property's mutability contract"
    )]
    ReadOnlyProperty { key: Key },

    #[error("property `{key}` is not writable")]
    NotWritable { key: Key },

    #[error("property `{key}` has a getter but no setter")]
    NoSetter { key: Key },

    #[error("`{operation}` requires {expected}, found {found}")]
    KindMismatch {
        operation: &'static str,
        expected: &'static str,
        found: ObjectKind,
    },

    #[error("unknown object handle {id}")]
    UnknownObject { id: ObjId },

    #[error("invalid array length {value}")]
    InvalidLength { value: String },

    #[error("array cannot grow to {requested} slots (limit {limit})")]
    ArrayCapacity { requested: usize, limit: usize },

    /// Raised from user accessors and native routines.
    #[error("{message}")]
    Callback { message: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Obsolete(#[from] ObsoleteError),
}

impl WeftError {
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }

    /// Whether this error reports access to an invalidated object.
    #[must_use]
    pub fn is_obsolete(&self) -> bool {
        matches!(self, Self::Obsolete(_))
    }
}

// ---------------------------------------------------------------------------
// Obsolete objects
// ---------------------------------------------------------------------------

/// Why an object was invalidated.
#[derive(Debug)]
pub struct ObsoleteReason {
    /// Human-readable explanation.
    pub message: String,
    /// The retained object that took this object's place, if any.
    pub replaced_by: Option<ObjId>,
    /// Where the invalidating call was made.
    pub origin: Origin,
}

/// Call site of the operation that invalidated an object.
#[derive(Debug, Clone, Copy)]
pub struct Origin(pub &'static Location<'static>);

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalidated by the call at {}:{}:{}",
            self.0.file(),
            self.0.line(),
            self.0.column()
        )
    }
}

impl std::error::Error for Origin {}

/// Access to an object that reconciliation discarded.
#[derive(Debug, Clone)]
pub struct ObsoleteError {
    pub object: ObjId,
    pub reason: Rc<ObsoleteReason>,
}

impl fmt::Display for ObsoleteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object {} is obsolete: {}", self.object, self.reason.message)
    }
}

impl std::error::Error for ObsoleteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason.origin)
    }
}
