//! Runtime error types for ormc-runtime.
//!
//! [`RuntimeError`] separates the failures a caller is expected to handle
//! (an object already or no longer persistent, a concurrent modification)
//! from misuse of the session and from driver failures.

use thiserror::Error;

use ormc_core::ClassId;

use crate::value::Value;

/// Errors produced by session operations and drivers.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Persist found a row with the same id.
    #[error("object already persistent: {class}({id})")]
    AlreadyPersistent { class: String, id: String },

    /// The row to load, update or erase does not exist.
    #[error("object not persistent: {class}({id})")]
    NotPersistent { class: String, id: String },

    /// The stored version differs from the object's.
    #[error("object changed concurrently: {class}({id})")]
    Changed { class: String, id: String },

    /// The object's dynamic class is abstract.
    #[error("abstract class '{class}' cannot be persisted, updated or erased")]
    AbstractClass { class: String },

    /// A weak pointer was resolved but nothing else keeps its target alive.
    #[error("weak pointer to '{class}' needs a session to keep its target loaded")]
    SessionRequired { class: String },

    /// A non-nullable relationship column is NULL, or a null pointer was
    /// written to one.
    #[error("null pointer in non-nullable member {class}.{member}")]
    NullPointer { class: String, member: String },

    /// A variable-length column needs more than the configured maximum.
    #[error("column '{column}' needs {required} bytes, limit is {max}")]
    BufferLimit {
        column: String,
        required: usize,
        max: usize,
    },

    /// A fetch still reports truncation after the image was regrown.
    #[error("column '{column}' still truncated after regrowing its buffer")]
    Truncated { column: String },

    /// A stored discriminator names no registered class of the hierarchy.
    #[error("unknown discriminator '{value}' in hierarchy of '{root}'")]
    UnknownDiscriminator { root: String, value: String },

    /// The class has no plan or no registered operations.
    #[error("unknown class: {0:?}")]
    UnknownClass(ClassId),

    /// The class does not support the operation (e.g. persisting a view).
    #[error("{operation} is not supported for class '{class}'")]
    Unsupported {
        class: String,
        operation: &'static str,
    },

    /// An object field does not have the shape its member requires.
    #[error("invalid field {class}.{member}: {reason}")]
    InvalidField {
        class: String,
        member: String,
        reason: String,
    },

    /// A parameter value that its image slot cannot hold, or a value for
    /// a slot the statement does not have.
    #[error("invalid parameter for column '{column}': {reason}")]
    InvalidParameter { column: String, reason: String },

    /// A statement handle the driver never handed out.
    #[error("unknown statement handle: {0}")]
    UnknownStatement(usize),

    /// SQLite failure.
    #[error("database error: {0}")]
    Driver(#[from] rusqlite::Error),
}

impl RuntimeError {
    /// Whether the error is a primary key or unique constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            RuntimeError::Driver(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        err.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                            | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    )
            }
            _ => false,
        }
    }
}

/// Comma-separated rendering of an id for error messages.
pub(crate) fn display_id(id: &[Value]) -> String {
    id.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
