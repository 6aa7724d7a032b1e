//! Container plans.
//!
//! Each container member maps to its own table (see
//! [`ormc_schema::container_layout`]). Persist inserts every element, load
//! selects every row of the owner (ordered by index for ordered containers),
//! erase deletes every row of the owner. Update is replace-all unless the
//! container is smart:
//!
//! - ordered: UPDATE by index for changed positions, DELETE the tail past
//!   the new length, INSERT the appended positions;
//! - set: DELETE by value for erased elements, INSERT the added ones.
//!
//! Maps, multimaps and multisets always replace everything. Inverse
//! containers only get the SELECT.

use serde::{Deserialize, Serialize};
use tracing::debug;

use ormc_core::{ClassId, ContainerKind, ContainerShape, ElementType, Member, Model, SqlType};
use ormc_schema::{container_layout, Dialect};

use crate::error::PlanError;
use crate::inverse::inverse_select;
use crate::slot::{Slot, SlotRole};
use crate::sql::SqlWriter;
use crate::statement::{StatementKind, StatementPlan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPlan {
    pub member: String,
    /// Class declaring the member.
    pub owner: ClassId,
    pub kind: ContainerKind,
    /// Differential update in effect (ordered and set containers only).
    pub smart: bool,
    pub inverse: bool,
    pub table: Option<String>,
    pub object_id: Vec<Slot>,
    pub index: Option<Slot>,
    pub key: Vec<Slot>,
    pub value: Vec<Slot>,
    pub select: StatementPlan,
    pub insert: Option<StatementPlan>,
    pub delete_all: Option<StatementPlan>,
    pub update_element: Option<StatementPlan>,
    pub delete_element: Option<StatementPlan>,
}

impl ContainerPlan {
    /// Insert image in table order.
    pub fn row_slots(&self) -> Vec<Slot> {
        let mut out = self.object_id.clone();
        out.extend(self.index.iter().cloned());
        out.extend(self.key.iter().cloned());
        out.extend(self.value.iter().cloned());
        out
    }
}

pub(crate) fn container_plan(
    model: &Model,
    dialect: &'static dyn Dialect,
    class: ClassId,
    owner: ClassId,
    member: &Member,
    shape: &ContainerShape,
) -> Result<ContainerPlan, PlanError> {
    if let (Some(inverse), ElementType::Pointer(target)) = (&shape.inverse, &shape.value) {
        let select = inverse_select(
            model,
            dialect,
            class,
            &member.name,
            *target,
            inverse,
            SlotRole::ContainerValue,
        )?;
        return Ok(ContainerPlan {
            member: member.name.clone(),
            owner,
            kind: shape.kind,
            smart: false,
            inverse: true,
            table: None,
            object_id: select.params.clone(),
            index: None,
            key: Vec::new(),
            value: select.results.clone(),
            select,
            insert: None,
            delete_all: None,
            update_element: None,
            delete_element: None,
        });
    }

    let layout = container_layout(model, class, member, shape)?;
    let table = layout.table.clone();
    let object_id: Vec<Slot> = layout
        .object_id
        .iter()
        .map(|c| Slot::element(c, SlotRole::ContainerId))
        .collect();
    let index = layout.index.as_ref().map(|column| Slot {
        column: column.clone(),
        member: member.name.clone(),
        path: Vec::new(),
        sql_type: SqlType::BigInt,
        nullable: false,
        role: SlotRole::ContainerIndex,
        readonly: false,
        target: None,
        lazy: false,
        weak: false,
    });
    let key: Vec<Slot> = layout
        .key
        .iter()
        .map(|c| Slot::element(c, SlotRole::ContainerKey))
        .collect();
    let value: Vec<Slot> = layout
        .value
        .iter()
        .map(|c| Slot::element(c, SlotRole::ContainerValue))
        .collect();

    // SELECT [index,] key..., value... WHERE owner [ORDER BY index]
    let mut results: Vec<Slot> = index.iter().cloned().collect();
    results.extend(key.iter().cloned());
    results.extend(value.iter().cloned());
    let mut sql = SqlWriter::new(dialect);
    sql.push("SELECT ")
        .select_list(results.iter().map(|s| (table.as_str(), s)))
        .push(" FROM ")
        .ident(&table)
        .push(" WHERE ")
        .where_eq(&table, &object_id);
    if let Some(index) = &index {
        sql.push(" ORDER BY ").qualified(&table, &index.column);
    }
    let select = StatementPlan::new(
        StatementKind::ContainerSelect,
        sql.finish(),
        object_id.clone(),
        results,
    );

    let mut row = object_id.clone();
    row.extend(index.iter().cloned());
    row.extend(key.iter().cloned());
    row.extend(value.iter().cloned());
    let mut sql = SqlWriter::new(dialect);
    sql.push("INSERT INTO ").ident(&table).push(" (");
    for (i, slot) in row.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.ident(&slot.column);
    }
    sql.push(") VALUES (");
    for i in 0..row.len() {
        if i > 0 {
            sql.push(", ");
        }
        sql.param();
    }
    sql.push(")");
    let insert = StatementPlan::new(StatementKind::ContainerInsert, sql.finish(), row, Vec::new());

    let mut sql = SqlWriter::new(dialect);
    sql.push("DELETE FROM ")
        .ident(&table)
        .push(" WHERE ")
        .where_eq(&table, &object_id);
    let delete_all = StatementPlan::new(
        StatementKind::ContainerDeleteAll,
        sql.finish(),
        object_id.clone(),
        Vec::new(),
    );

    let smart = shape.smart && matches!(shape.kind, ContainerKind::Ordered | ContainerKind::Set);
    let (update_element, delete_element) = match (smart, &index) {
        (true, Some(index)) => {
            // UPDATE ... SET value... WHERE owner AND index = ?
            let mut params = value.clone();
            params.extend(object_id.iter().cloned());
            params.push(index.clone());
            let mut sql = SqlWriter::new(dialect);
            sql.push("UPDATE ").ident(&table).push(" SET ");
            for (i, slot) in value.iter().enumerate() {
                if i > 0 {
                    sql.push(", ");
                }
                sql.ident(&slot.column).push(" = ").param();
            }
            sql.push(" WHERE ")
                .where_eq(&table, &object_id)
                .push(" AND ")
                .where_eq(&table, std::slice::from_ref(index));
            let update = StatementPlan::new(StatementKind::ContainerUpdate, sql.finish(), params, Vec::new());

            // DELETE ... WHERE owner AND index >= ? (truncate the tail)
            let mut params = object_id.clone();
            params.push(index.clone());
            let mut sql = SqlWriter::new(dialect);
            sql.push("DELETE FROM ")
                .ident(&table)
                .push(" WHERE ")
                .where_eq(&table, &object_id)
                .push(" AND ")
                .qualified(&table, &index.column)
                .push(" >= ")
                .param();
            let delete = StatementPlan::new(StatementKind::ContainerDelete, sql.finish(), params, Vec::new());
            (Some(update), Some(delete))
        }
        (true, None) => {
            // DELETE ... WHERE owner AND value = ?
            let mut params = object_id.clone();
            params.extend(value.iter().cloned());
            let mut sql = SqlWriter::new(dialect);
            sql.push("DELETE FROM ")
                .ident(&table)
                .push(" WHERE ")
                .where_eq(&table, &object_id)
                .push(" AND ")
                .where_eq(&table, &value);
            let delete = StatementPlan::new(StatementKind::ContainerDelete, sql.finish(), params, Vec::new());
            (None, Some(delete))
        }
        (false, _) => (None, None),
    };

    debug!(table = %table, smart, "container plan");
    Ok(ContainerPlan {
        member: member.name.clone(),
        owner,
        kind: shape.kind,
        smart,
        inverse: false,
        table: Some(table),
        object_id,
        index,
        key,
        value,
        select,
        insert: Some(insert),
        delete_all: Some(delete_all),
        update_element,
        delete_element,
    })
}
