//! Core error types for ormc-core.
//!
//! [`CoreError`] covers registry misuse (duplicate or unknown classes).
//! [`ModelError`] covers malformed models. Each malformed-model variant carries
//! the [`Location`] of the offending declaration; these are compile-time only
//! and abort the generation step.

use thiserror::Error;

use crate::id::{ClassId, Location};

/// Errors from building or querying the class registry.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A class with the same name is already registered.
    #[error("duplicate class name: '{name}'")]
    DuplicateClassName { name: String },

    /// A ClassId does not index the model.
    #[error("class not found: ClassId({id})", id = id.0)]
    ClassNotFound { id: ClassId },

    /// A member name does not exist on the class.
    #[error("member '{member}' not found in class '{class}'")]
    MemberNotFound { class: String, member: String },
}

/// Errors describing a model that cannot be mapped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("{location}: member '{class}::{member}' has unmappable type '{source_type}'")]
    UnmappableType {
        class: String,
        member: String,
        source_type: String,
        location: Location,
    },

    #[error("{location}: ambiguous relationship '{class}::{member}': {reason}")]
    AmbiguousRelationship {
        class: String,
        member: String,
        reason: String,
        location: Location,
    },

    #[error("{location}: class '{class}' is referenced by '{referenced_by}' but has no id member")]
    MissingId {
        class: String,
        referenced_by: String,
        location: Location,
    },

    #[error("{location}: index on '{class}' references unknown member '{member}'")]
    UnknownIndexMember {
        class: String,
        member: String,
        location: Location,
    },

    #[error("{location}: unsupported shape for '{class}::{member}': {reason}")]
    UnsupportedShape {
        class: String,
        member: String,
        reason: String,
        location: Location,
    },

    #[error("{location}: invalid class '{class}': {reason}")]
    InvalidClass {
        class: String,
        reason: String,
        location: Location,
    },

    #[error("{location}: dependency cycle through class '{class}'")]
    DependencyCycle { class: String, location: Location },

    /// Validation failed; individual problems went to the diagnostic sink.
    #[error("model validation failed with {count} error(s)")]
    Invalid { count: usize },

    #[error(transparent)]
    Core(#[from] CoreErrorMessage),
}

/// Cloneable carrier for a [`CoreError`] raised while walking a model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CoreErrorMessage(pub String);

impl From<CoreError> for ModelError {
    fn from(err: CoreError) -> Self {
        ModelError::Core(CoreErrorMessage(err.to_string()))
    }
}

impl ModelError {
    /// Location of the declaration that caused this error, if any.
    pub fn location(&self) -> Option<&Location> {
        match self {
            ModelError::UnmappableType { location, .. }
            | ModelError::AmbiguousRelationship { location, .. }
            | ModelError::MissingId { location, .. }
            | ModelError::UnknownIndexMember { location, .. }
            | ModelError::UnsupportedShape { location, .. }
            | ModelError::InvalidClass { location, .. }
            | ModelError::DependencyCycle { location, .. } => Some(location),
            ModelError::Invalid { .. } | ModelError::Core(_) => None,
        }
    }
}
