pub mod types;
pub mod id;
pub mod error;
pub mod model;
pub mod traverse;
pub mod diagnostics;
pub mod validate;

// Re-export commonly used types
pub use types::{
    ClassKind, ContainerKind, ContainerShape, ElementType, IndexDef, IndexKind, Inheritance,
    Member, MemberKind, OnDelete, PersistentClass, PointerKind, PointerShape, SqlType,
};
pub use id::{ClassId, Location};
pub use error::{CoreError, ModelError};
pub use model::Model;
pub use traverse::{ColumnRole, ColumnVisitor, LeafColumn};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use validate::validate;
