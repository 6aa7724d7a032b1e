//! Container members at run time: one row per element in the container's
//! own table.

use tracing::trace;

use ormc_core::ClassId;
use ormc_plan::{ContainerPlan, Slot, SlotRole};

use crate::error::RuntimeError;
use crate::object::{set_path, Changes, ContainerValue, Element, Field, Fields, ObjectRef};
use crate::session::Session;
use crate::value::Value;

impl Session<'_> {
    /// Inserts every element of the container.
    pub(crate) fn persist_container(
        &mut self,
        class: ClassId,
        plan: &ContainerPlan,
        object: &ObjectRef,
        id: &[Value],
    ) -> Result<(), RuntimeError> {
        let Some(insert) = &plan.insert else {
            return Ok(());
        };
        let rows = {
            let object = object.borrow();
            let owner = self.class_name(object.class());
            match object.container(&plan.member) {
                Some(container) => container
                    .elements()
                    .iter()
                    .enumerate()
                    .map(|(i, element)| self.row_values(&owner, plan, id, i, element))
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            }
        };
        trace!(member = %plan.member, rows = rows.len(), "insert container");
        for row in &rows {
            self.run(class, insert, &plan.member, row)?;
        }
        self.mark_stored(plan, object);
        Ok(())
    }

    pub(crate) fn load_container(
        &mut self,
        class: ClassId,
        plan: &ContainerPlan,
        object: &ObjectRef,
        id: &[Value],
    ) -> Result<(), RuntimeError> {
        // Rows are drained before any element pointer is resolved, so nested
        // loads cannot disturb this statement.
        let rows = self.select(class, &plan.select, &plan.member, id)?;
        let owner = self.class_name(object.borrow().class());
        let mut container = ContainerValue::new();
        for row in rows {
            let mut key = Vec::new();
            let mut value = Vec::new();
            for (slot, v) in plan.select.results.iter().zip(row) {
                match slot.role {
                    SlotRole::ContainerKey => key.push((slot, v)),
                    SlotRole::ContainerIndex => {}
                    _ => value.push((slot, v)),
                }
            }
            let value = self.element_field(&owner, value)?;
            if key.is_empty() {
                container.push(value);
            } else {
                let key = self.element_field(&owner, key)?;
                container.push_entry(key, value);
            }
        }
        if plan.smart {
            container.mark_stored(plan.kind);
        }
        object.borrow_mut().set(&plan.member, container);
        Ok(())
    }

    /// Replace-all for plain containers; the recorded changes only for
    /// smart containers that were loaded or stored before.
    pub(crate) fn update_container(
        &mut self,
        class: ClassId,
        plan: &ContainerPlan,
        object: &ObjectRef,
        id: &[Value],
    ) -> Result<(), RuntimeError> {
        let changes = match object.borrow().container(&plan.member) {
            Some(container) if plan.smart => container.changes(),
            _ => Changes::Replace,
        };
        let owner = self.class_name(object.borrow().class());

        match changes {
            Changes::Replace => {
                self.erase_container(class, plan, id)?;
                return self.persist_container(class, plan, object, id);
            }
            Changes::Ordered {
                updated,
                truncate,
                appended,
            } => {
                if let Some(stmt) = &plan.update_element {
                    for (index, value) in &updated {
                        let mut params = self.element_values(&owner, value, &plan.value)?;
                        params.extend(id.iter().cloned());
                        params.push(Value::Int(*index as i64));
                        self.run(class, stmt, &plan.member, &params)?;
                    }
                }
                if let (Some(len), Some(stmt)) = (truncate, &plan.delete_element) {
                    let mut params = id.to_vec();
                    params.push(Value::Int(len as i64));
                    self.run(class, stmt, &plan.member, &params)?;
                }
                if let Some(stmt) = &plan.insert {
                    for (index, value) in &appended {
                        let element = Element {
                            key: None,
                            value: value.clone(),
                        };
                        let row = self.row_values(&owner, plan, id, *index, &element)?;
                        self.run(class, stmt, &plan.member, &row)?;
                    }
                }
                trace!(
                    member = %plan.member,
                    updated = updated.len(),
                    appended = appended.len(),
                    "smart update"
                );
            }
            Changes::Set { erased, inserted } => {
                if let Some(stmt) = &plan.delete_element {
                    for value in &erased {
                        let mut params = id.to_vec();
                        params.extend(self.element_values(&owner, value, &plan.value)?);
                        self.run(class, stmt, &plan.member, &params)?;
                    }
                }
                if let Some(stmt) = &plan.insert {
                    for value in &inserted {
                        let element = Element {
                            key: None,
                            value: value.clone(),
                        };
                        let row = self.row_values(&owner, plan, id, 0, &element)?;
                        self.run(class, stmt, &plan.member, &row)?;
                    }
                }
                trace!(
                    member = %plan.member,
                    erased = erased.len(),
                    inserted = inserted.len(),
                    "smart update"
                );
            }
        }
        self.mark_stored(plan, object);
        Ok(())
    }

    pub(crate) fn erase_container(
        &mut self,
        class: ClassId,
        plan: &ContainerPlan,
        id: &[Value],
    ) -> Result<(), RuntimeError> {
        if let Some(stmt) = &plan.delete_all {
            self.run(class, stmt, &plan.member, id)?;
        }
        Ok(())
    }

    fn mark_stored(&self, plan: &ContainerPlan, object: &ObjectRef) {
        if !plan.smart {
            return;
        }
        if let Some(container) = object.borrow_mut().container_mut(&plan.member) {
            container.mark_stored(plan.kind);
        }
    }

    /// Insert row in table order: owner id, index, key, value.
    fn row_values(
        &self,
        owner: &str,
        plan: &ContainerPlan,
        id: &[Value],
        index: usize,
        element: &Element,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut row = id.to_vec();
        if plan.index.is_some() {
            row.push(Value::Int(index as i64));
        }
        if !plan.key.is_empty() {
            let key = element.key.clone().unwrap_or(Field::Value(Value::Null));
            row.extend(self.element_values(owner, &key, &plan.key)?);
        }
        row.extend(self.element_values(owner, &element.value, &plan.value)?);
        Ok(row)
    }

    /// Builds a key or value element from its columns.
    fn element_field(&mut self, owner: &str, mut columns: Vec<(&Slot, Value)>) -> Result<Field, RuntimeError> {
        if columns.len() == 1 && columns[0].0.path.is_empty() {
            let (slot, value) = columns.remove(0);
            return match slot.target {
                Some(_) => self.resolve_pointer(owner, slot, value),
                None => Ok(Field::Value(value)),
            };
        }
        let mut fields = Fields::new();
        for (slot, value) in columns {
            let field = match slot.target {
                Some(_) => self.resolve_pointer(owner, slot, value)?,
                None => Field::Value(value),
            };
            set_path(&mut fields, &slot.path, field);
        }
        Ok(Field::Composite(fields))
    }
}
