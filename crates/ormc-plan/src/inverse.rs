//! Inverse relationships: storage lives on the other side, so this side
//! only ever reads it back with one SELECT keyed on the other side's
//! foreign key column.

use serde::{Deserialize, Serialize};

use ormc_core::traverse::collect_columns;
use ormc_core::{ClassId, ColumnRole, Model, ModelError};
use ormc_schema::Dialect;

use crate::error::PlanError;
use crate::slot::{Slot, SlotRole};
use crate::sql::SqlWriter;
use crate::statement::{StatementKind, StatementPlan};

/// Inverse pointer member of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InversePlan {
    pub member: String,
    pub target: ClassId,
    pub select: StatementPlan,
}

/// `SELECT "x"."id" FROM "x" WHERE "x"."<inverse>" = ?` where `x` is the
/// table of `target`'s hierarchy holding the `inverse` pointer column.
/// Results carry role `result_role` and point at `target`.
pub(crate) fn inverse_select(
    model: &Model,
    dialect: &'static dyn Dialect,
    owner: ClassId,
    member: &str,
    target: ClassId,
    inverse: &str,
    result_role: SlotRole,
) -> Result<StatementPlan, PlanError> {
    for level in model.hierarchy_chain(target)? {
        let leaves = collect_columns(model, level)?;
        let Some(fk) = leaves
            .iter()
            .find(|c| c.member.name == inverse && matches!(c.role, ColumnRole::Pointer(_)))
        else {
            continue;
        };
        let table = &model.class(level)?.table;
        let ids: Vec<Slot> = leaves
            .iter()
            .filter(|c| c.role == ColumnRole::Id)
            .map(|c| Slot {
                member: member.to_string(),
                path: Vec::new(),
                role: result_role,
                target: Some(target),
                ..Slot::from_leaf(c)
            })
            .collect();
        let param = Slot {
            member: member.to_string(),
            path: Vec::new(),
            role: SlotRole::Id,
            target: None,
            ..Slot::from_leaf(fk)
        };

        let mut sql = SqlWriter::new(dialect);
        sql.push("SELECT ")
            .select_list(ids.iter().map(|s| (table.as_str(), s)))
            .push(" FROM ")
            .ident(table)
            .push(" WHERE ")
            .where_eq(table, std::slice::from_ref(&param));
        return Ok(StatementPlan::new(
            StatementKind::InverseSelect,
            sql.finish(),
            vec![param],
            ids,
        ));
    }

    let owner = model.class(owner)?;
    Err(ModelError::AmbiguousRelationship {
        class: owner.name.clone(),
        member: member.to_string(),
        reason: format!("no pointer column '{inverse}' on the other side"),
        location: owner
            .member_named(member)
            .map(|m| m.location.clone())
            .unwrap_or_default(),
    }
    .into())
}
