#![forbid(unsafe_code)]

//! Reconciliation and normalization errors.
//!
//! Every identity error names the structural path at which it was detected
//! and shortened previews of the values involved. A failed reconciliation
//! leaves `old` partially merged; nothing is rolled back.

use weft_core::{ObjectKind, WeftError};

use crate::path::GraphPath;

#[derive(Debug, thiserror::Error)]
pub enum PreserveError {
    /// Some members of one container carry identity hints and others don't.
    #[error(
        "inconsistent identity hints in {path}: {hinted} carries an id/key but {unhinted} does not"
    )]
    MixedHints {
        path: GraphPath,
        hinted: String,
        unhinted: String,
    },

    /// Two distinct members of one container share an identity.
    #[error("duplicate identity {identity} in {path}: {first} and {second}")]
    DuplicateIdentity {
        path: GraphPath,
        identity: String,
        first: String,
        second: String,
    },

    /// An `id` or `key` field that is neither a string nor a number.
    #[error("invalid identity hint `{field}` at {path}: expected a string or number, found {found}")]
    InvalidHint {
        path: GraphPath,
        field: &'static str,
        found: String,
    },

    /// One old object matched against two different new objects.
    #[error(
        "{old} cannot stand in for both {first} at {first_path} and {second} at {second_path}"
    )]
    Conflict {
        old: String,
        first: String,
        first_path: GraphPath,
        second: String,
        second_path: GraphPath,
    },

    /// Normalization found duplicates whose contents differ.
    #[error("members sharing identity {identity} in {path} differ: {first} vs {second}")]
    DifferingDuplicates {
        path: GraphPath,
        identity: String,
        first: String,
        second: String,
    },

    #[error("cannot reconcile a {kind} at {path}")]
    WeakCollection { path: GraphPath, kind: ObjectKind },

    #[error(transparent)]
    Object(#[from] WeftError),
}

impl PreserveError {
    /// The structural path of the failure, if it has one.
    #[must_use]
    pub fn path(&self) -> Option<&GraphPath> {
        match self {
            Self::MixedHints { path, .. }
            | Self::DuplicateIdentity { path, .. }
            | Self::InvalidHint { path, .. }
            | Self::DifferingDuplicates { path, .. }
            | Self::WeakCollection { path, .. } => Some(path),
            Self::Conflict { second_path, .. } => Some(second_path),
            Self::Object(_) => None,
        }
    }

    /// Whether the caller can fix this by reshaping its data (for example
    /// with [`normalize_list`](crate::normalize_list)).
    #[must_use]
    pub fn is_identity_error(&self) -> bool {
        matches!(
            self,
            Self::MixedHints { .. }
                | Self::DuplicateIdentity { .. }
                | Self::InvalidHint { .. }
                | Self::Conflict { .. }
                | Self::DifferingDuplicates { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PreserveError>;
