//! Vendor strategy for SQL spelling and capabilities.
//!
//! The emitters are written once against [`Dialect`]; each backend only
//! answers how to quote, how to spell a type, and which ALTER forms it can
//! express.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ormc_core::SqlType;

/// Identifier quoting, type spelling and capability flags for one backend.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type(&self, sql_type: SqlType) -> String;

    /// Full inline definition (after the column name) of an auto-assigned
    /// single-column primary key.
    fn auto_primary_key(&self, sql_type: SqlType) -> String;

    /// Placeholder for the `n`th parameter, 1-based.
    fn placeholder(&self, n: usize) -> String;

    /// `INSERT ... RETURNING` for reading back generated ids.
    fn supports_returning(&self) -> bool;

    fn supports_deferrable(&self) -> bool;

    /// Whether foreign keys can be added or dropped with ALTER TABLE.
    fn alter_foreign_keys(&self) -> bool;

    /// Whether column nullability can be changed with ALTER TABLE.
    fn alter_column_null(&self) -> bool;

    /// Whether one ALTER TABLE may carry several comma-separated clauses.
    fn multi_clause_alter(&self) -> bool;

    fn drop_foreign_key(&self, name: &str) -> String {
        format!("DROP CONSTRAINT {}", self.quote(name))
    }

    fn alter_null(&self, column: &str, nullable: bool) -> String {
        format!(
            "ALTER COLUMN {} {} NOT NULL",
            self.quote(column),
            if nullable { "DROP" } else { "SET" }
        )
    }
}

/// SQLite: every foreign key is inline and deferrable, columns cannot change
/// nullability in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn column_type(&self, sql_type: SqlType) -> String {
        match sql_type {
            SqlType::Boolean | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => "INTEGER",
            SqlType::Double => "REAL",
            SqlType::Text | SqlType::VarChar(_) => "TEXT",
            SqlType::Blob => "BLOB",
        }
        .to_string()
    }

    // Only an INTEGER PRIMARY KEY aliases the rowid.
    fn auto_primary_key(&self, _sql_type: SqlType) -> String {
        "INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT".to_string()
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn supports_deferrable(&self) -> bool {
        true
    }

    fn alter_foreign_keys(&self) -> bool {
        false
    }

    fn alter_column_null(&self) -> bool {
        false
    }

    fn multi_clause_alter(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn column_type(&self, sql_type: SqlType) -> String {
        match sql_type {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::VarChar(n) => format!("VARCHAR({n})"),
            SqlType::Blob => "BYTEA".to_string(),
        }
    }

    fn auto_primary_key(&self, sql_type: SqlType) -> String {
        match sql_type {
            SqlType::BigInt => "BIGSERIAL NOT NULL PRIMARY KEY",
            _ => "SERIAL NOT NULL PRIMARY KEY",
        }
        .to_string()
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn supports_deferrable(&self) -> bool {
        true
    }

    fn alter_foreign_keys(&self) -> bool {
        true
    }

    fn alter_column_null(&self) -> bool {
        true
    }

    fn multi_clause_alter(&self) -> bool {
        true
    }
}

/// Serializable selector for the built-in dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    Postgres,
}

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::Sqlite => &SqliteDialect,
            DialectKind::Postgres => &PostgresDialect,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::Sqlite => write!(f, "sqlite"),
            DialectKind::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DialectKind::Sqlite),
            "postgres" | "postgresql" | "pgsql" => Ok(DialectKind::Postgres),
            other => Err(format!("unknown dialect '{other}' (expected sqlite or postgres)")),
        }
    }
}
