//! DDL Emitter: dependency-ordered CREATE, DROP and migration statements.
//!
//! Tables may reference each other in any direction, so foreign keys are
//! scheduled rather than emitted blindly:
//!
//! - **Create.** Each table is marked created before its keys are looked at.
//!   A key whose referenced table already exists (itself included) goes
//!   inline; a forward reference is deferred to a second pass of
//!   `ALTER TABLE ... ADD CONSTRAINT`. Backends that cannot add keys by ALTER
//!   get every key inline.
//! - **Drop.** Tables are walked in reverse creation order and marked dropped
//!   before their keys are looked at. A key whose referenced table is already
//!   marked must be dropped explicitly in the first pass; any other key goes
//!   away with its table in the second pass.
//! - **Migrate.** A changeset becomes a *pre* script (run before data
//!   migration) and a *post* script (run after). New columns start nullable
//!   and are tightened in post; relaxations happen in pre.
//!
//! Statements are returned without a trailing semicolon.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::changeset::{Changeset, SchemaChange};
use crate::dialect::Dialect;
use crate::schema::{Column, ForeignKey, Index, Schema, Table};
use ormc_core::OnDelete;

/// The two halves of one migration step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScript {
    pub pre: Vec<String>,
    pub post: Vec<String>,
}

impl MigrationScript {
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }
}

/// Joins statements into one executable script.
pub fn to_script(statements: &[String]) -> String {
    let mut out = String::new();
    for statement in statements {
        out.push_str(statement);
        out.push_str(";\n");
    }
    out
}

/// Emits DDL text for one dialect.
pub struct DdlEmitter<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> DdlEmitter<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        DdlEmitter { dialect }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn q_list<S: AsRef<str>>(&self, idents: &[S]) -> String {
        idents
            .iter()
            .map(|i| self.q(i.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// CREATE statements for the whole schema.
    pub fn create_schema(&self, schema: &Schema) -> Vec<String> {
        let mut out = Vec::new();
        let mut created: HashSet<&str> = HashSet::new();
        let mut deferred: Vec<(&Table, &ForeignKey)> = Vec::new();

        // Pass 1: tables, with every key that can already be resolved.
        for table in schema.tables() {
            created.insert(table.name.as_str());
            let mut inline = Vec::new();
            for key in &table.foreign_keys {
                if created.contains(key.referenced_table.as_str()) || !self.dialect.alter_foreign_keys() {
                    inline.push(key);
                } else {
                    debug!(table = %table.name, key = %key.name, "deferring forward reference");
                    deferred.push((table, key));
                }
            }
            out.push(self.create_table(table, &inline));
            for index in &table.indexes {
                out.push(self.create_index(&table.name, index));
            }
        }

        // Pass 2: forward references, now that every table exists.
        for (table, key) in deferred {
            out.push(self.add_foreign_key(&table.name, key));
        }
        out
    }

    /// CREATE TABLE for one table with the given keys inline.
    pub fn create_table(&self, table: &Table, keys: &[&ForeignKey]) -> String {
        let inline_pk = table
            .primary_key
            .as_ref()
            .filter(|pk| pk.columns.len() == 1)
            .map(|pk| pk.columns[0].as_str());

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let is_pk = inline_pk == Some(c.name.as_str());
                self.column_def(c, is_pk)
            })
            .collect();

        if let Some(pk) = table.primary_key.as_ref().filter(|pk| pk.columns.len() > 1) {
            defs.push(format!("PRIMARY KEY ({})", self.q_list(&pk.columns)));
        }
        for key in keys {
            defs.push(format!("CONSTRAINT {}", self.key_def(key)));
        }

        format!("CREATE TABLE {} (\n  {})", self.q(&table.name), defs.join(",\n  "))
    }

    fn column_def(&self, column: &Column, primary_key: bool) -> String {
        let name = self.q(&column.name);
        if primary_key && column.auto {
            return format!("{name} {}", self.dialect.auto_primary_key(column.sql_type));
        }
        let mut def = format!("{name} {}", self.dialect.column_type(column.sql_type));
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        if primary_key {
            def.push_str(" PRIMARY KEY");
        }
        def
    }

    /// `"name" FOREIGN KEY (...) REFERENCES ...`, shared by inline and ALTER forms.
    fn key_def(&self, key: &ForeignKey) -> String {
        let mut def = format!(
            "{} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.q(&key.name),
            self.q_list(&key.columns),
            self.q(&key.referenced_table),
            self.q_list(&key.referenced_columns),
        );
        match key.on_delete {
            Some(OnDelete::Cascade) => def.push_str(" ON DELETE CASCADE"),
            Some(OnDelete::SetNull) => def.push_str(" ON DELETE SET NULL"),
            None => {}
        }
        if key.deferrable && self.dialect.supports_deferrable() {
            def.push_str(" DEFERRABLE INITIALLY DEFERRED");
        }
        def
    }

    pub fn add_foreign_key(&self, table: &str, key: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {}",
            self.q(table),
            self.key_def(key)
        )
    }

    pub fn create_index(&self, table: &str, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.q(&index.name),
            self.q(table),
            self.q_list(&index.columns),
        )
    }

    pub fn drop_index(&self, index: &Index) -> String {
        format!("DROP INDEX {}", self.q(&index.name))
    }

    // -----------------------------------------------------------------------
    // Drop
    // -----------------------------------------------------------------------

    /// DROP statements for the whole schema.
    pub fn drop_schema(&self, schema: &Schema) -> Vec<String> {
        let mut out = Vec::new();

        // Pass 1: keys that would dangle while their table still exists.
        if self.dialect.alter_foreign_keys() {
            let mut dropped: HashSet<&str> = HashSet::new();
            for table in schema.tables().rev() {
                dropped.insert(table.name.as_str());
                let clauses: Vec<String> = table
                    .foreign_keys
                    .iter()
                    .filter(|k| dropped.contains(k.referenced_table.as_str()))
                    .map(|k| self.dialect.drop_foreign_key(&k.name))
                    .collect();
                out.extend(self.alter(&table.name, clauses));
            }
        }

        // Pass 2: the tables themselves.
        for table in schema.tables().rev() {
            out.push(format!("DROP TABLE IF EXISTS {}", self.q(&table.name)));
        }
        out
    }

    /// One ALTER TABLE per table when the backend allows several clauses,
    /// one per clause otherwise.
    fn alter(&self, table: &str, clauses: Vec<String>) -> Vec<String> {
        if clauses.is_empty() {
            return Vec::new();
        }
        let head = format!("ALTER TABLE {}", self.q(table));
        if self.dialect.multi_clause_alter() {
            vec![format!("{head}\n  {}", clauses.join(",\n  "))]
        } else {
            clauses.into_iter().map(|c| format!("{head} {c}")).collect()
        }
    }

    // -----------------------------------------------------------------------
    // Migrate
    // -----------------------------------------------------------------------

    /// Splits a changeset into pre and post scripts.
    ///
    /// Pre: drop indexes (unique first), then per table drop keys, add
    /// columns as nullable and relax columns; then create new tables.
    /// Post: per table add keys, drop columns and tighten columns; then
    /// create indexes (unique last) and drop obsolete tables.
    pub fn migrate(&self, changeset: &Changeset) -> MigrationScript {
        let mut script = MigrationScript::default();
        let changes = &changeset.changes;

        // Tables touched by per-table ALTERs, in first-appearance order.
        let mut tables: Vec<&str> = Vec::new();
        for change in changes {
            let name = change.table();
            if !matches!(change, SchemaChange::AddTable(_)) && !tables.contains(&name) {
                tables.push(name);
            }
        }
        let added: HashSet<&str> = changes
            .iter()
            .filter_map(|c| match c {
                SchemaChange::AddTable(t) => Some(t.name.as_str()),
                _ => None,
            })
            .collect();

        // Pre: indexes that could span a column mid-transition go first.
        for unique in [true, false] {
            for change in changes {
                if let SchemaChange::DropIndex { index, .. } = change {
                    if index.unique == unique {
                        script.pre.push(self.drop_index(index));
                    }
                }
            }
        }

        for table in &tables {
            let mut clauses = Vec::new();
            for change in changes.iter().filter(|c| c.table() == *table) {
                match change {
                    SchemaChange::DropForeignKey { key, .. } => {
                        if let Some(clause) = self.drop_key_clause(table, key) {
                            clauses.push(clause);
                        }
                    }
                    SchemaChange::DropTable(t) => {
                        for key in &t.foreign_keys {
                            if let Some(clause) = self.drop_key_clause(table, key) {
                                clauses.push(clause);
                            }
                        }
                    }
                    _ => {}
                }
            }
            for change in changes.iter().filter(|c| c.table() == *table) {
                match change {
                    SchemaChange::AddColumn { column, .. } => {
                        let relaxed = Column {
                            nullable: true,
                            ..column.clone()
                        };
                        clauses.push(format!("ADD COLUMN {}", self.column_def(&relaxed, false)));
                    }
                    SchemaChange::AlterColumnNull {
                        column,
                        nullable: true,
                        ..
                    } => {
                        if let Some(clause) = self.null_clause(table, column, true) {
                            clauses.push(clause);
                        }
                    }
                    _ => {}
                }
            }
            script.pre.extend(self.alter(table, clauses));
        }

        let mut created: HashSet<&str> = HashSet::new();
        let mut deferred: Vec<(&Table, &ForeignKey)> = Vec::new();
        for change in changes {
            if let SchemaChange::AddTable(table) = change {
                created.insert(table.name.as_str());
                let mut inline = Vec::new();
                for key in &table.foreign_keys {
                    let exists = !added.contains(key.referenced_table.as_str())
                        || created.contains(key.referenced_table.as_str());
                    if exists || !self.dialect.alter_foreign_keys() {
                        inline.push(key);
                    } else {
                        deferred.push((table, key));
                    }
                }
                script.pre.push(self.create_table(table, &inline));
                for index in &table.indexes {
                    script.pre.push(self.create_index(&table.name, index));
                }
            }
        }

        // Post.
        for (table, key) in deferred {
            script.post.push(self.add_foreign_key(&table.name, key));
        }

        for table in &tables {
            let mut clauses = Vec::new();
            let table_changes: Vec<&SchemaChange> =
                changes.iter().filter(|c| c.table() == *table).collect();
            for change in &table_changes {
                if let SchemaChange::AddForeignKey { key, .. } = change {
                    if self.dialect.alter_foreign_keys() {
                        clauses.push(format!("ADD CONSTRAINT {}", self.key_def(key)));
                    } else {
                        warn!(table, key = %key.name, "dialect cannot add a foreign key to an existing table");
                    }
                }
            }
            for change in &table_changes {
                if let SchemaChange::DropColumn { column, .. } = change {
                    clauses.push(format!("DROP COLUMN {}", self.q(column)));
                }
            }
            for change in &table_changes {
                let tighten = match change {
                    SchemaChange::AddColumn { column, .. } if !column.nullable => Some(&column.name),
                    SchemaChange::AlterColumnNull {
                        column,
                        nullable: false,
                        ..
                    } => Some(column),
                    _ => None,
                };
                if let Some(column) = tighten {
                    if let Some(clause) = self.null_clause(table, column, false) {
                        clauses.push(clause);
                    }
                }
            }
            script.post.extend(self.alter(table, clauses));
        }

        for unique in [false, true] {
            for change in changes {
                if let SchemaChange::AddIndex { table, index } = change {
                    if index.unique == unique {
                        script.post.push(self.create_index(table, index));
                    }
                }
            }
        }

        for change in changes.iter().rev() {
            if let SchemaChange::DropTable(table) = change {
                script
                    .post
                    .push(format!("DROP TABLE IF EXISTS {}", self.q(&table.name)));
            }
        }

        debug!(pre = script.pre.len(), post = script.post.len(), "migration script");
        script
    }

    fn drop_key_clause(&self, table: &str, key: &ForeignKey) -> Option<String> {
        if self.dialect.alter_foreign_keys() {
            Some(self.dialect.drop_foreign_key(&key.name))
        } else {
            warn!(table, key = %key.name, "dialect cannot drop a foreign key in place");
            None
        }
    }

    fn null_clause(&self, table: &str, column: &str, nullable: bool) -> Option<String> {
        if self.dialect.alter_column_null() {
            Some(self.dialect.alter_null(column, nullable))
        } else {
            warn!(table, column, nullable, "dialect cannot change column nullability in place");
            None
        }
    }
}
