//! Per-class statement plans.
//!
//! Slot lists come from [`collect_columns`], the same traversal the schema
//! builder turns into table columns. Role rules:
//!
//! - INSERT binds every column except a database-assigned id and the
//!   version, which starts at its column default;
//! - UPDATE sets data and pointer columns, bumps the version in place, and
//!   binds id (and the expected version) in its WHERE;
//! - the discriminator is only ever written by the root's INSERT.
//!
//! A polymorphic class's find and query join every table from the root down
//! to the class; each level below the root contributes its columns minus
//! the repeated id.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ormc_core::traverse::{collect_columns, container_members, inverse_pointer_members};
use ormc_core::{ClassId, ClassKind, MemberKind, Model, PointerKind};
use ormc_schema::Dialect;

use crate::container::{container_plan, ContainerPlan};
use crate::error::PlanError;
use crate::inverse::{inverse_select, InversePlan};
use crate::polymorphic::{polymorphic_plan, PolymorphicPlan};
use crate::slot::{Slot, SlotRole};
use crate::sql::SqlWriter;
use crate::statement::{StatementKind, StatementPlan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPlan {
    pub class: ClassId,
    pub name: String,
    pub table: String,
    pub is_abstract: bool,
    pub view: bool,
    /// Own table columns in table order.
    pub columns: Vec<Slot>,
    pub id: Vec<Slot>,
    pub auto_id: bool,
    /// Version column of this table (root or standalone classes only).
    pub version: Option<Slot>,
    pub persist: Option<StatementPlan>,
    pub find: Option<StatementPlan>,
    pub find_level: Option<StatementPlan>,
    pub update: Option<StatementPlan>,
    pub erase: Option<StatementPlan>,
    pub optimistic_erase: Option<StatementPlan>,
    pub find_version: Option<StatementPlan>,
    /// SELECT without a condition; callers append `WHERE ...`.
    pub query: StatementPlan,
    /// DELETE without a condition; absent for polymorphic classes.
    pub erase_query: Option<StatementPlan>,
    pub polymorphic: Option<PolymorphicPlan>,
    pub containers: Vec<ContainerPlan>,
    pub inverse_pointers: Vec<InversePlan>,
}

/// One table of a joined selection.
struct Level {
    table: String,
    slots: Vec<Slot>,
}

pub(crate) fn class_plan(
    model: &Model,
    dialect: &'static dyn Dialect,
    class: ClassId,
) -> Result<ClassPlan, PlanError> {
    let decl = model.class(class)?;
    let columns: Vec<Slot> = collect_columns(model, class)?
        .iter()
        .map(Slot::from_leaf)
        .collect();
    let table = decl.table.clone();

    if decl.kind == ClassKind::View {
        let query = select(dialect, &[Level { table: table.clone(), slots: columns.clone() }], None);
        return Ok(ClassPlan {
            class,
            name: decl.name.clone(),
            table,
            is_abstract: decl.is_abstract,
            view: true,
            columns,
            id: Vec::new(),
            auto_id: false,
            version: None,
            persist: None,
            find: None,
            find_level: None,
            update: None,
            erase: None,
            optimistic_erase: None,
            find_version: None,
            query,
            erase_query: None,
            polymorphic: None,
            containers: Vec::new(),
            inverse_pointers: Vec::new(),
        });
    }

    let id: Vec<Slot> = columns.iter().filter(|s| s.role == SlotRole::Id).cloned().collect();
    let auto_id = !decl.is_polymorphic_derived()
        && model.id_member(class)?.is_some_and(|m| m.auto);
    let version = columns.iter().find(|s| s.role == SlotRole::Version).cloned();
    let has_id = !id.is_empty();

    // Levels root..=class for the joined selection.
    let chain = model.hierarchy_chain(class)?;
    let mut levels = Vec::with_capacity(chain.len());
    for (depth, level) in chain.iter().enumerate() {
        let slots: Vec<Slot> = if *level == class {
            columns.clone()
        } else {
            collect_columns(model, *level)?.iter().map(Slot::from_leaf).collect()
        };
        let slots = if depth == 0 {
            slots
        } else {
            slots.into_iter().filter(|s| s.role != SlotRole::Id).collect()
        };
        levels.push(Level {
            table: model.class(*level)?.table.clone(),
            slots,
        });
    }

    let find = has_id.then(|| select(dialect, &levels, Some(id.as_slice())));
    let query = select(dialect, &levels, None);

    let polymorphic = if model.is_polymorphic(class)? {
        let root_columns = &levels[0].slots;
        let discriminator = root_columns
            .iter()
            .find(|s| s.role == SlotRole::Discriminator)
            .cloned();
        match discriminator {
            Some(discriminator) => Some(polymorphic_plan(model, class, discriminator)?),
            None => None,
        }
    } else {
        None
    };

    let find_level = match &polymorphic {
        Some(p) if !p.is_root() => {
            let own = levels.last().map(|l| l.slots.clone()).unwrap_or_default();
            (!own.is_empty()).then(|| {
                let mut plan = select(
                    dialect,
                    &[Level { table: table.clone(), slots: own }],
                    Some(id.as_slice()),
                );
                plan.kind = StatementKind::FindLevel;
                plan
            })
        }
        _ => None,
    };

    let persist = Some(insert(dialect, &table, &columns, auto_id));
    let update = if has_id { update(dialect, &table, &columns, &id, version.as_ref()) } else { None };
    let erase = has_id.then(|| delete(dialect, StatementKind::Erase, &table, &id, None));
    let optimistic_erase = version
        .as_ref()
        .filter(|_| has_id)
        .map(|v| delete(dialect, StatementKind::OptimisticErase, &table, &id, Some(v)));
    let find_version = version.as_ref().filter(|_| has_id).map(|v| {
        let mut plan = select(
            dialect,
            &[Level { table: table.clone(), slots: vec![v.clone()] }],
            Some(id.as_slice()),
        );
        plan.kind = StatementKind::FindVersion;
        plan
    });
    let erase_query = polymorphic.is_none().then(|| {
        let mut sql = SqlWriter::new(dialect);
        sql.push("DELETE FROM ").ident(&table);
        StatementPlan::new(StatementKind::EraseQuery, sql.finish(), Vec::new(), Vec::new())
    });

    let mut containers = Vec::new();
    if has_id {
        for (owner, member) in container_members(model, class)? {
            if let MemberKind::Container(shape) = &member.kind {
                containers.push(container_plan(model, dialect, class, owner, member, shape)?);
            }
        }
    }

    let mut inverse_pointers = Vec::new();
    for (_, member) in inverse_pointer_members(model, class)? {
        if let MemberKind::Pointer(shape) = &member.kind {
            if let Some(inverse) = &shape.inverse {
                let mut select = inverse_select(
                    model,
                    dialect,
                    class,
                    &member.name,
                    shape.target,
                    inverse,
                    SlotRole::Pointer,
                )?;
                for slot in &mut select.results {
                    slot.lazy = shape.lazy;
                    slot.weak = shape.kind == PointerKind::Weak;
                }
                inverse_pointers.push(InversePlan {
                    member: member.name.clone(),
                    target: shape.target,
                    select,
                });
            }
        }
    }

    debug!(
        class = %decl.name,
        columns = columns.len(),
        containers = containers.len(),
        polymorphic = polymorphic.is_some(),
        "class plan"
    );

    Ok(ClassPlan {
        class,
        name: decl.name.clone(),
        table,
        is_abstract: decl.is_abstract,
        view: false,
        columns,
        id,
        auto_id,
        version,
        persist,
        find,
        find_level,
        update,
        erase,
        optimistic_erase,
        find_version,
        query,
        erase_query,
        polymorphic,
        containers,
        inverse_pointers,
    })
}

/// `SELECT <levels> FROM <last> JOIN <others> ON id [WHERE id = ?]`.
fn select(dialect: &'static dyn Dialect, levels: &[Level], key: Option<&[Slot]>) -> StatementPlan {
    let mut sql = SqlWriter::new(dialect);
    let results: Vec<Slot> = levels.iter().flat_map(|l| l.slots.iter().cloned()).collect();
    sql.push("SELECT ").select_list(
        levels
            .iter()
            .flat_map(|l| l.slots.iter().map(move |s| (l.table.as_str(), s))),
    );

    // The most derived table drives the join; every ancestor row exists.
    let Some(driver) = levels.last() else {
        return StatementPlan::new(StatementKind::Query, sql.finish(), Vec::new(), results);
    };
    sql.push(" FROM ").ident(&driver.table);
    let join_id: Vec<Slot> = levels[0]
        .slots
        .iter()
        .filter(|s| s.role == SlotRole::Id)
        .cloned()
        .collect();
    for level in levels[..levels.len() - 1].iter().rev() {
        sql.push(" JOIN ").ident(&level.table).push(" ON ");
        join_on(&mut sql, &level.table, &driver.table, &join_id);
    }

    match key {
        Some(id) => {
            sql.push(" WHERE ").where_eq(&driver.table, id);
            StatementPlan::new(StatementKind::Find, sql.finish(), id.to_vec(), results)
        }
        None => StatementPlan::new(StatementKind::Query, sql.finish(), Vec::new(), results),
    }
}

fn join_on(sql: &mut SqlWriter, table: &str, driver: &str, id: &[Slot]) {
    for (i, slot) in id.iter().enumerate() {
        if i > 0 {
            sql.push(" AND ");
        }
        sql.qualified(table, &slot.column)
            .push(" = ")
            .qualified(driver, &slot.column);
    }
}

fn insert(dialect: &'static dyn Dialect, table: &str, columns: &[Slot], auto_id: bool) -> StatementPlan {
    let params: Vec<Slot> = columns
        .iter()
        .filter(|s| !(auto_id && s.role == SlotRole::Id) && s.role != SlotRole::Version)
        .cloned()
        .collect();
    let mut sql = SqlWriter::new(dialect);
    sql.push("INSERT INTO ").ident(table);
    if params.is_empty() {
        sql.push(" DEFAULT VALUES");
    } else {
        sql.push(" (");
        for (i, slot) in params.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.ident(&slot.column);
        }
        sql.push(") VALUES (");
        for i in 0..params.len() {
            if i > 0 {
                sql.push(", ");
            }
            sql.param();
        }
        sql.push(")");
    }

    let mut results = Vec::new();
    if auto_id && dialect.supports_returning() {
        results = columns.iter().filter(|s| s.role == SlotRole::Id).cloned().collect();
        sql.push(" RETURNING ");
        for (i, slot) in results.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.ident(&slot.column);
        }
    }
    StatementPlan::new(StatementKind::Persist, sql.finish(), params, results)
}

fn update(
    dialect: &'static dyn Dialect,
    table: &str,
    columns: &[Slot],
    id: &[Slot],
    version: Option<&Slot>,
) -> Option<StatementPlan> {
    let set: Vec<Slot> = columns
        .iter()
        .filter(|s| s.is_updatable() && s.role != SlotRole::Version)
        .cloned()
        .collect();
    if set.is_empty() && version.is_none() {
        return None;
    }

    let mut sql = SqlWriter::new(dialect);
    sql.push("UPDATE ").ident(table).push(" SET ");
    for (i, slot) in set.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.ident(&slot.column).push(" = ").param();
    }
    if let Some(v) = version {
        if !set.is_empty() {
            sql.push(", ");
        }
        sql.ident(&v.column).push(" = ").ident(&v.column).push(" + 1");
    }
    sql.push(" WHERE ").where_eq(table, id);

    let mut params = set;
    params.extend(id.iter().cloned());
    if let Some(v) = version {
        sql.push(" AND ").where_eq(table, std::slice::from_ref(v));
        params.push(v.clone());
    }
    Some(StatementPlan::new(StatementKind::Update, sql.finish(), params, Vec::new()))
}

fn delete(
    dialect: &'static dyn Dialect,
    kind: StatementKind,
    table: &str,
    id: &[Slot],
    version: Option<&Slot>,
) -> StatementPlan {
    let mut sql = SqlWriter::new(dialect);
    sql.push("DELETE FROM ")
        .ident(table)
        .push(" WHERE ")
        .where_eq(table, id);
    let mut params = id.to_vec();
    if let Some(v) = version {
        sql.push(" AND ").where_eq(table, std::slice::from_ref(v));
        params.push(v.clone());
    }
    StatementPlan::new(kind, sql.finish(), params, Vec::new())
}
