//! Statement Planner.
//!
//! [`build_plan`] derives, for every object and view class of a model, the
//! image layouts and parameterized SQL of each operation. The resulting
//! [`Plan`] is plain data: it serializes for inspection and drives the
//! runtime directly.

pub mod error;
pub mod slot;
pub mod statement;
pub mod class;
pub mod container;
pub mod inverse;
pub mod polymorphic;
mod sql;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ormc_core::{ClassId, ClassKind, Model};
use ormc_schema::{build_schema, has_table, DialectKind, Schema};

pub use error::PlanError;
pub use slot::{Slot, SlotRole};
pub use statement::{StatementKind, StatementPlan};
pub use class::ClassPlan;
pub use container::ContainerPlan;
pub use inverse::InversePlan;
pub use polymorphic::PolymorphicPlan;

/// Planner configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    pub dialect: DialectKind,
    /// Emit pointer foreign keys as DEFERRABLE INITIALLY DEFERRED.
    pub deferrable_keys: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        PlanOptions {
            dialect: DialectKind::default(),
            deferrable_keys: true,
        }
    }
}

/// Statement plans for every class of a model, indexed by [`ClassId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub dialect: DialectKind,
    classes: Vec<Option<ClassPlan>>,
}

impl Plan {
    pub fn class(&self, id: ClassId) -> Option<&ClassPlan> {
        self.classes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassPlan> {
        self.classes().find(|c| c.name == name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassPlan> {
        self.classes.iter().flatten()
    }
}

/// Schema for a model under the given options.
pub fn schema_for(model: &Model, options: &PlanOptions) -> Result<Schema, PlanError> {
    let mut schema = build_schema(model)?;
    if !options.deferrable_keys {
        let mut relaxed = Schema::new();
        for table in schema.tables() {
            let mut table = table.clone();
            for key in &mut table.foreign_keys {
                key.deferrable = false;
            }
            relaxed.add_table(table)?;
        }
        schema = relaxed;
    }
    Ok(schema)
}

/// Builds the plan for a validated model.
pub fn build_plan(model: &Model, options: &PlanOptions) -> Result<Plan, PlanError> {
    let dialect = options.dialect.dialect();
    let mut classes = vec![None; model.len()];
    for id in model.persistent_classes()? {
        let decl = model.class(id)?;
        if decl.kind == ClassKind::View || has_table(model, id)? {
            classes[id.0 as usize] = Some(class::class_plan(model, dialect, id)?);
        }
    }
    let plan = Plan {
        dialect: options.dialect,
        classes,
    };
    check_layout(&plan, &build_schema(model)?)?;
    debug!(classes = plan.classes().count(), dialect = %options.dialect, "plan built");
    Ok(plan)
}

/// Verifies that every image lists exactly its table's columns, in order.
pub fn check_layout(plan: &Plan, schema: &Schema) -> Result<(), PlanError> {
    for class in plan.classes().filter(|c| !c.view) {
        let table = schema
            .table(&class.table)
            .ok_or_else(|| PlanError::TableNotFound(class.table.clone()))?;
        compare(&class.table, slot::columns(&class.columns), table)?;

        for container in class.containers.iter().filter(|c| !c.inverse) {
            let name = container.table.clone().unwrap_or_default();
            let table = schema
                .table(&name)
                .ok_or_else(|| PlanError::TableNotFound(name.clone()))?;
            compare(&name, slot::columns(&container.row_slots()), table)?;
        }
    }
    Ok(())
}

fn compare(name: &str, image: Vec<String>, table: &ormc_schema::Table) -> Result<(), PlanError> {
    let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    if image != columns {
        return Err(PlanError::LayoutMismatch {
            table: name.to_string(),
            image,
            columns,
        });
    }
    Ok(())
}
