//! Per-class operation records.
//!
//! The session never dispatches on a class directly: it looks up the
//! [`ClassOps`] registered for an object's dynamic class, or for the class
//! a stored discriminator names, and calls through it. The standard
//! operations cover every planned class; a caller may register its own
//! record for a class to wrap or replace them.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use ormc_core::ClassId;
use ormc_plan::Plan;

use crate::error::RuntimeError;
use crate::object::{Object, ObjectRef};
use crate::session::{self, Session};
use crate::value::Value;

pub type CreateFn = fn(ClassId) -> Object;
pub type ObjectFn = fn(&mut Session<'_>, &ObjectRef) -> Result<(), RuntimeError>;
pub type FindFn = fn(&mut Session<'_>, ClassId, &[Value]) -> Result<Option<ObjectRef>, RuntimeError>;
pub type QueryFn =
    fn(&mut Session<'_>, ClassId, &str, &[Value]) -> Result<Vec<ObjectRef>, RuntimeError>;
/// Loads the levels of an object below the class it was found through.
pub type DispatchFn = fn(&mut Session<'_>, &ObjectRef, ClassId) -> Result<(), RuntimeError>;

#[derive(Clone, Copy)]
pub struct ClassOps {
    pub create: CreateFn,
    pub persist: ObjectFn,
    pub find: FindFn,
    pub update: ObjectFn,
    pub erase: ObjectFn,
    pub query: QueryFn,
    pub dispatch: DispatchFn,
}

impl ClassOps {
    pub fn standard() -> Self {
        ClassOps {
            create: Object::new,
            persist: session::persist_object,
            find: session::find_object,
            update: session::update_object,
            erase: session::erase_object,
            query: session::query_objects,
            dispatch: session::load_levels,
        }
    }
}

impl fmt::Debug for ClassOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassOps").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    ops: HashMap<ClassId, ClassOps>,
    /// (hierarchy root, discriminator value) to concrete class.
    discriminators: HashMap<(ClassId, String), ClassId>,
}

impl Registry {
    /// Standard operations for every class of `plan`.
    pub fn from_plan(plan: &Plan) -> Self {
        RegistryBuilder::new(plan).build()
    }

    pub fn ops(&self, class: ClassId) -> Result<ClassOps, RuntimeError> {
        self.ops
            .get(&class)
            .copied()
            .ok_or(RuntimeError::UnknownClass(class))
    }

    pub fn resolve(&self, root: ClassId, discriminator: &str) -> Option<ClassId> {
        self.discriminators
            .get(&(root, discriminator.to_string()))
            .copied()
    }
}

pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    pub fn new(plan: &Plan) -> Self {
        let mut registry = Registry::default();
        for class in plan.classes() {
            registry.ops.insert(class.class, ClassOps::standard());
            if let Some(p) = &class.polymorphic {
                registry
                    .discriminators
                    .insert((p.root, p.discriminator_value.clone()), class.class);
            }
        }
        RegistryBuilder { registry }
    }

    /// Replaces the operations of one class.
    pub fn with_ops(mut self, class: ClassId, ops: ClassOps) -> Self {
        self.registry.ops.insert(class, ops);
        self
    }

    pub fn build(self) -> Registry {
        debug!(
            classes = self.registry.ops.len(),
            discriminators = self.registry.discriminators.len(),
            "registry built"
        );
        self.registry
    }
}
