//! Schema Builder: assembles tables from the semantic model.
//!
//! Classes are visited in dependency order. Each object class yields its own
//! table, whose columns come straight from [`walk_columns`], followed by one
//! auxiliary table per non-inverse container member. Column layout for
//! container tables comes from [`container_layout`], which the statement
//! planner uses as well.
//!
//! [`walk_columns`]: ormc_core::traverse::walk_columns

use smallvec::smallvec;
use tracing::debug;

use ormc_core::traverse::{collect_columns, container_members, id_columns, walk_element};
use ormc_core::{
    ClassId, ClassKind, ColumnRole, ContainerShape, IndexKind, LeafColumn, Member, MemberKind,
    Model, OnDelete, SqlType,
};

use crate::error::SchemaError;
use crate::schema::{Column, ForeignKey, Index, KeyColumns, PrimaryKey, Schema, Table, TableOrigin};

/// Owner id column of a container table (single-column ids).
pub const OBJECT_ID: &str = "object_id";
/// Position column of an ordered container table.
pub const INDEX: &str = "index";

/// Builds the full schema for a model.
pub fn build_schema(model: &Model) -> Result<Schema, SchemaError> {
    let mut schema = Schema::new();
    for id in model.persistent_classes()? {
        if !has_table(model, id)? {
            continue;
        }
        let table = class_table(model, id)?;
        debug!(table = %table.name, columns = table.columns.len(), "class table");
        schema.add_table(table)?;

        for (_, member) in container_members(model, id)? {
            if let MemberKind::Container(shape) = &member.kind {
                if shape.inverse.is_some() {
                    continue;
                }
                let table = container_table(model, id, member, shape)?;
                debug!(table = %table.name, "container table");
                schema.add_table(table)?;
            }
        }
    }
    schema.check_references()?;
    Ok(schema)
}

/// Whether a class owns a table. Views and composites never do; abstract
/// classes only when they take part in a polymorphic hierarchy.
pub fn has_table(model: &Model, id: ClassId) -> Result<bool, SchemaError> {
    let class = model.class(id)?;
    Ok(class.kind == ClassKind::Object && (!class.is_abstract || model.is_polymorphic(id)?))
}

fn to_column(leaf: &LeafColumn<'_>) -> Column {
    Column {
        name: leaf.name.clone(),
        sql_type: leaf.sql_type,
        nullable: leaf.nullable,
        default: leaf.default.clone(),
        auto: leaf.auto,
    }
}

fn class_table(model: &Model, id: ClassId) -> Result<Table, SchemaError> {
    let class = model.class(id)?;
    let leaves = collect_columns(model, id)?;
    let mut table = Table::new(&class.table, TableOrigin::Class(id));
    table.columns = leaves.iter().map(to_column).collect();

    let key: KeyColumns = leaves
        .iter()
        .filter(|c| c.role == ColumnRole::Id)
        .map(|c| c.name.clone())
        .collect();
    if !key.is_empty() {
        table.primary_key = Some(PrimaryKey {
            columns: key.clone(),
            auto: leaves.iter().any(|c| c.auto),
        });
    }

    // A derived table's key doubles as a cascading reference to the root row.
    if class.is_polymorphic_derived() {
        let root = model.class(model.root_of(id)?)?;
        let id_column = model
            .id_member(id)?
            .map(|m| m.column.clone())
            .unwrap_or_else(|| OBJECT_ID.to_string());
        table.foreign_keys.push(ForeignKey {
            name: format!("{}_{}_fk", table.name, id_column),
            columns: key.clone(),
            referenced_table: root.table.clone(),
            referenced_columns: key,
            on_delete: Some(OnDelete::Cascade),
            deferrable: false,
        });
    }

    for leaf in &leaves {
        if let ColumnRole::Pointer(target) = leaf.role {
            let on_delete = match &leaf.member.kind {
                MemberKind::Pointer(shape) => shape.on_delete,
                _ => None,
            };
            table
                .foreign_keys
                .push(pointer_key(model, &table.name, &leaf.name, target, on_delete)?);
        }
    }

    // Member-level index markers.
    let mut groups: Vec<(&Member, Vec<String>)> = Vec::new();
    for leaf in leaves.iter().filter(|c| c.role != ColumnRole::Id) {
        if leaf.member.index.is_none() {
            continue;
        }
        match groups.iter_mut().find(|(m, _)| std::ptr::eq(*m, leaf.member)) {
            Some((_, cols)) => cols.push(leaf.name.clone()),
            None => groups.push((leaf.member, vec![leaf.name.clone()])),
        }
    }
    for (member, columns) in groups {
        table.indexes.push(Index {
            name: format!("{}_{}_i", table.name, member.column),
            columns,
            unique: member.index == Some(IndexKind::Unique),
        });
    }

    // Class-level index declarations.
    for def in &class.indexes {
        let mut columns = Vec::new();
        for name in &def.members {
            let matching: Vec<String> = leaves
                .iter()
                .filter(|c| c.member.name == *name)
                .map(|c| c.name.clone())
                .collect();
            if matching.is_empty() {
                return Err(ormc_core::ModelError::UnknownIndexMember {
                    class: class.name.clone(),
                    member: name.clone(),
                    location: def.location.clone(),
                }
                .into());
            }
            columns.extend(matching);
        }
        let name = def
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_i", table.name, columns.join("_")));
        table.indexes.push(Index {
            name,
            columns,
            unique: def.kind == IndexKind::Unique,
        });
    }

    Ok(table)
}

fn pointer_key(
    model: &Model,
    table: &str,
    column: &str,
    target: ClassId,
    on_delete: Option<OnDelete>,
) -> Result<ForeignKey, SchemaError> {
    let root = model.class(model.root_of(target)?)?;
    Ok(ForeignKey {
        name: format!("{table}_{column}_fk"),
        columns: smallvec![column.to_string()],
        referenced_table: root.table.clone(),
        referenced_columns: id_columns(model, target)?
            .into_iter()
            .map(|c| c.name)
            .collect(),
        on_delete,
        deferrable: on_delete.is_none(),
    })
}

// ---------------------------------------------------------------------------
// Container tables
// ---------------------------------------------------------------------------

/// Column layout of a container table, in table order:
/// owner id, index (ordered only), key, value.
#[derive(Debug, Clone)]
pub struct ContainerLayout<'m> {
    pub table: String,
    /// Owner id columns, renamed to `object_id` (or `object_id_<col>`).
    pub object_id: Vec<LeafColumn<'m>>,
    pub index: Option<String>,
    pub key: Vec<LeafColumn<'m>>,
    pub value: Vec<LeafColumn<'m>>,
}

impl ContainerLayout<'_> {
    /// All column names in table order.
    pub fn column_names(&self) -> Vec<String> {
        let mut out: Vec<String> = self.object_id.iter().map(|c| c.name.clone()).collect();
        out.extend(self.index.iter().cloned());
        out.extend(self.key.iter().map(|c| c.name.clone()));
        out.extend(self.value.iter().map(|c| c.name.clone()));
        out
    }
}

/// Table name for a container member of `class`.
pub fn container_table_name(
    model: &Model,
    class: ClassId,
    member: &Member,
    shape: &ContainerShape,
) -> Result<String, SchemaError> {
    Ok(match &shape.table {
        Some(name) => name.clone(),
        None => format!("{}_{}", model.class(class)?.table, member.column),
    })
}

pub fn container_layout<'m>(
    model: &'m Model,
    class: ClassId,
    member: &'m Member,
    shape: &ContainerShape,
) -> Result<ContainerLayout<'m>, SchemaError> {
    let ids = id_columns(model, class)?;
    let single = ids.len() == 1;
    let object_id = ids
        .into_iter()
        .map(|c| LeafColumn {
            name: if single {
                OBJECT_ID.to_string()
            } else {
                format!("{OBJECT_ID}_{}", c.name)
            },
            auto: false,
            nullable: false,
            default: None,
            ..c
        })
        .collect();

    let mut key = Vec::new();
    if let Some(element) = &shape.key {
        walk_element(model, class, member, element, "key", false, &mut key)?;
    }
    let mut value = Vec::new();
    walk_element(
        model,
        class,
        member,
        &shape.value,
        "value",
        shape.value_nullable,
        &mut value,
    )?;

    Ok(ContainerLayout {
        table: container_table_name(model, class, member, shape)?,
        object_id,
        index: shape.kind.is_ordered().then(|| INDEX.to_string()),
        key,
        value,
    })
}

fn container_table(
    model: &Model,
    class: ClassId,
    member: &Member,
    shape: &ContainerShape,
) -> Result<Table, SchemaError> {
    let layout = container_layout(model, class, member, shape)?;
    let owner = model.class(class)?;
    let mut table = Table::new(
        &layout.table,
        TableOrigin::Container {
            owner: class,
            member: member.name.clone(),
        },
    );

    table.columns.extend(layout.object_id.iter().map(to_column));
    if let Some(index) = &layout.index {
        table.columns.push(Column::new(index, SqlType::BigInt, false));
    }
    table.columns.extend(layout.key.iter().map(to_column));
    table.columns.extend(layout.value.iter().map(to_column));

    let object_id: KeyColumns = layout.object_id.iter().map(|c| c.name.clone()).collect();
    table.foreign_keys.push(ForeignKey {
        name: format!("{}_{OBJECT_ID}_fk", table.name),
        columns: object_id.clone(),
        referenced_table: owner.table.clone(),
        referenced_columns: id_columns(model, class)?
            .into_iter()
            .map(|c| c.name)
            .collect(),
        on_delete: Some(OnDelete::Cascade),
        deferrable: false,
    });
    for leaf in layout.key.iter().chain(&layout.value) {
        if let ColumnRole::Pointer(target) = leaf.role {
            table
                .foreign_keys
                .push(pointer_key(model, &table.name, &leaf.name, target, None)?);
        }
    }

    table.indexes.push(Index {
        name: format!("{}_{OBJECT_ID}_i", table.name),
        columns: object_id.into_iter().collect(),
        unique: false,
    });
    if let Some(index) = &layout.index {
        table.indexes.push(Index {
            name: format!("{}_{index}_i", table.name),
            columns: vec![index.clone()],
            unique: false,
        });
    }
    Ok(table)
}
