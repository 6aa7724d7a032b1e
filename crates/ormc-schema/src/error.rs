//! Schema error types for ormc-schema.
//!
//! [`SchemaError`] wraps model problems found while assembling tables and the
//! structural changes a migration cannot express.

use thiserror::Error;

use ormc_core::{CoreError, ModelError, SqlType};

/// Errors produced while building, diffing, or emitting a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The model could not be mapped.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Two tables resolved to the same name.
    #[error("duplicate table name: '{name}'")]
    DuplicateTable { name: String },

    /// A foreign key or change refers to a table the schema does not contain.
    #[error("table not found: '{name}'")]
    TableNotFound { name: String },

    /// A column changed type between two schema versions.
    #[error("unsupported change to '{table}.{column}': type {from:?} -> {to:?}")]
    UnsupportedChange {
        table: String,
        column: String,
        from: SqlType,
        to: SqlType,
    },

    /// A primary key changed between two schema versions.
    #[error("unsupported change to primary key of '{table}'")]
    PrimaryKeyChange { table: String },
}

impl From<CoreError> for SchemaError {
    fn from(err: CoreError) -> Self {
        SchemaError::Model(err.into())
    }
}
