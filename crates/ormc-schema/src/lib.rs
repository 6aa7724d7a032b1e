pub mod error;
pub mod schema;
pub mod builder;
pub mod changeset;
pub mod dialect;
pub mod ddl;

// Re-export commonly used types
pub use error::SchemaError;
pub use schema::{Column, ForeignKey, Index, KeyColumns, PrimaryKey, Schema, Table, TableOrigin};
pub use builder::{build_schema, container_layout, has_table, ContainerLayout};
pub use changeset::{diff, diff_models, Changeset, SchemaChange};
pub use dialect::{Dialect, DialectKind, PostgresDialect, SqliteDialect};
pub use ddl::{to_script, DdlEmitter, MigrationScript};
