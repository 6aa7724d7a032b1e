//! Relational schema entities.
//!
//! A [`Schema`] is an ordered map of [`Table`]s. Insertion order is the order
//! the builder produced them (dependency order of the classes, each class
//! table followed by its container tables), and every emitter iterates in
//! that order so the generated text never depends on hashing.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use ormc_core::{ClassId, OnDelete, SqlType};

use crate::error::SchemaError;

/// Column names of a key. Almost always a single column.
pub type KeyColumns = SmallVec<[String; 1]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// SQL literal used as the column default.
    pub default: Option<String>,
    /// Database-assigned value (auto-increment id).
    pub auto: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Column {
            name: name.into(),
            sql_type,
            nullable,
            default: None,
            auto: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub columns: KeyColumns,
    pub auto: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: KeyColumns,
    pub referenced_table: String,
    pub referenced_columns: KeyColumns,
    pub on_delete: Option<OnDelete>,
    /// Checked at commit rather than per statement, where the backend allows.
    pub deferrable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// What produced a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableOrigin {
    Class(ClassId),
    Container { owner: ClassId, member: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub origin: TableOrigin,
}

impl Table {
    pub fn new(name: impl Into<String>, origin: TableOrigin) -> Self {
        Table {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            origin,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|k| k.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Whether `column` is part of the primary key.
    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_key
            .as_ref()
            .is_some_and(|pk| pk.columns.iter().any(|c| c == column))
    }
}

/// Ordered collection of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    tables: IndexMap<String, Table>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) -> Result<(), SchemaError> {
        if self.tables.contains_key(&table.name) {
            return Err(SchemaError::DuplicateTable { name: table.name });
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Tables in creation order.
    pub fn tables(&self) -> impl DoubleEndedIterator<Item = &Table> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Checks that every foreign key references an existing table.
    pub fn check_references(&self) -> Result<(), SchemaError> {
        for table in self.tables() {
            for fk in &table.foreign_keys {
                if !self.tables.contains_key(&fk.referenced_table) {
                    return Err(SchemaError::TableNotFound {
                        name: fk.referenced_table.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
