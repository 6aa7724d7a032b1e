//! Changeset: the structural diff between two schema versions.
//!
//! Changes are listed table by table: dropped tables first (old order), then
//! new tables, then per-table alterations for tables present in both
//! versions (new order). Within a table the order is columns, foreign keys,
//! indexes. Only presence and nullability are diffed; a type change or a new
//! primary key is rejected rather than guessed at.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ormc_core::Model;

use crate::builder::build_schema;
use crate::error::SchemaError;
use crate::schema::{Column, ForeignKey, Index, Schema, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaChange {
    AddTable(Table),
    DropTable(Table),
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: String },
    AlterColumnNull { table: String, column: String, nullable: bool },
    AddForeignKey { table: String, key: ForeignKey },
    DropForeignKey { table: String, key: ForeignKey },
    AddIndex { table: String, index: Index },
    DropIndex { table: String, index: Index },
}

impl SchemaChange {
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::AddTable(t) | SchemaChange::DropTable(t) => &t.name,
            SchemaChange::AddColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::AlterColumnNull { table, .. }
            | SchemaChange::AddForeignKey { table, .. }
            | SchemaChange::DropForeignKey { table, .. }
            | SchemaChange::AddIndex { table, .. }
            | SchemaChange::DropIndex { table, .. } => table,
        }
    }
}

/// Ordered list of changes turning one schema into another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub changes: Vec<SchemaChange>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Diffs the schemas of two model versions.
pub fn diff_models(old: &Model, new: &Model) -> Result<Changeset, SchemaError> {
    diff(&build_schema(old)?, &build_schema(new)?)
}

pub fn diff(old: &Schema, new: &Schema) -> Result<Changeset, SchemaError> {
    let mut changes = Vec::new();

    for table in old.tables() {
        if new.table(&table.name).is_none() {
            changes.push(SchemaChange::DropTable(table.clone()));
        }
    }
    for table in new.tables() {
        if old.table(&table.name).is_none() {
            changes.push(SchemaChange::AddTable(table.clone()));
        }
    }
    for table in new.tables() {
        if let Some(before) = old.table(&table.name) {
            diff_table(before, table, &mut changes)?;
        }
    }

    debug!(changes = changes.len(), "schema diff");
    Ok(Changeset { changes })
}

fn diff_table(old: &Table, new: &Table, out: &mut Vec<SchemaChange>) -> Result<(), SchemaError> {
    let name = &new.name;
    if old.primary_key != new.primary_key {
        return Err(SchemaError::PrimaryKeyChange { table: name.clone() });
    }

    for column in &old.columns {
        if new.column(&column.name).is_none() {
            out.push(SchemaChange::DropColumn {
                table: name.clone(),
                column: column.name.clone(),
            });
        }
    }
    for column in &new.columns {
        match old.column(&column.name) {
            None => out.push(SchemaChange::AddColumn {
                table: name.clone(),
                column: column.clone(),
            }),
            Some(before) if before.sql_type != column.sql_type => {
                return Err(SchemaError::UnsupportedChange {
                    table: name.clone(),
                    column: column.name.clone(),
                    from: before.sql_type,
                    to: column.sql_type,
                });
            }
            Some(before) if before.nullable != column.nullable => {
                out.push(SchemaChange::AlterColumnNull {
                    table: name.clone(),
                    column: column.name.clone(),
                    nullable: column.nullable,
                });
            }
            Some(_) => {}
        }
    }

    // A changed key is dropped and re-added under the same name.
    for key in &old.foreign_keys {
        if new.foreign_key(&key.name) != Some(key) {
            out.push(SchemaChange::DropForeignKey {
                table: name.clone(),
                key: key.clone(),
            });
        }
    }
    for key in &new.foreign_keys {
        if old.foreign_key(&key.name) != Some(key) {
            out.push(SchemaChange::AddForeignKey {
                table: name.clone(),
                key: key.clone(),
            });
        }
    }

    for index in &old.indexes {
        if new.index(&index.name) != Some(index) {
            out.push(SchemaChange::DropIndex {
                table: name.clone(),
                index: index.clone(),
            });
        }
    }
    for index in &new.indexes {
        if old.index(&index.name) != Some(index) {
            out.push(SchemaChange::AddIndex {
                table: name.clone(),
                index: index.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormc_core::{ContainerShape, ElementType, Member, PersistentClass, SqlType};

    fn person(extra: Option<Member>) -> Model {
        let mut class = PersistentClass::object("Person")
            .member(Member::id("id", SqlType::Integer))
            .member(Member::simple("name", SqlType::Text));
        if let Some(member) = extra {
            class = class.member(member);
        }
        let mut model = Model::new();
        model.add_class(class).unwrap();
        model
    }

    #[test]
    fn identical_models_have_no_changes() {
        assert!(diff_models(&person(None), &person(None)).unwrap().is_empty());
    }

    #[test]
    fn added_column_and_container() {
        let new = person(Some(Member::container(
            "phones",
            ContainerShape::ordered(ElementType::Simple(SqlType::Text)),
        )));
        let with_age = person(Some(Member::simple("age", SqlType::Integer)));

        let changes = diff_models(&person(None), &new).unwrap().changes;
        assert!(matches!(&changes[0], SchemaChange::AddTable(t) if t.name == "person_phones"));

        let changes = diff_models(&person(None), &with_age).unwrap().changes;
        assert!(matches!(
            &changes[..],
            [SchemaChange::AddColumn { table, column }] if table == "person" && column.name == "age"
        ));

        let changes = diff_models(&with_age, &person(None)).unwrap().changes;
        assert!(matches!(
            &changes[..],
            [SchemaChange::DropColumn { column, .. }] if column == "age"
        ));
    }

    #[test]
    fn nullability_change() {
        let old = person(Some(Member::simple("nick", SqlType::Text)));
        let new = person(Some(Member::simple("nick", SqlType::Text).nullable()));
        let changes = diff_models(&old, &new).unwrap().changes;
        assert_eq!(
            changes,
            vec![SchemaChange::AlterColumnNull {
                table: "person".into(),
                column: "nick".into(),
                nullable: true,
            }]
        );
    }

    #[test]
    fn type_change_rejected() {
        let old = person(Some(Member::simple("age", SqlType::Integer)));
        let new = person(Some(Member::simple("age", SqlType::Text)));
        assert!(matches!(
            diff_models(&old, &new),
            Err(SchemaError::UnsupportedChange { column, .. }) if column == "age"
        ));
    }
}
