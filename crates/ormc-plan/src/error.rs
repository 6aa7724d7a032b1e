//! Plan error types for ormc-plan.

use thiserror::Error;

use ormc_core::{CoreError, ModelError};
use ormc_schema::SchemaError;

/// Errors produced while deriving statement plans.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// An image layout disagrees with the table it binds to.
    #[error("layout mismatch for table '{table}': image {image:?}, table {columns:?}")]
    LayoutMismatch {
        table: String,
        image: Vec<String>,
        columns: Vec<String>,
    },

    /// A table the plan refers to is missing from the schema.
    #[error("table not found: '{0}'")]
    TableNotFound(String),
}

impl From<CoreError> for PlanError {
    fn from(err: CoreError) -> Self {
        PlanError::Model(err.into())
    }
}
