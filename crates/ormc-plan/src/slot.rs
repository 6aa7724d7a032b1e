//! Image slots.
//!
//! A [`Slot`] is one positional entry of an image: the column it binds to,
//! the member path it reads from or writes to, and its role. Slots are built
//! from the shared column traversal so their order always equals the table's
//! column order.

use serde::{Deserialize, Serialize};

use ormc_core::{ClassId, ColumnRole, LeafColumn, MemberKind, PointerKind, SqlType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotRole {
    Id,
    Data,
    Version,
    Discriminator,
    /// Foreign id of the object named by `Slot::target`.
    Pointer,
    ContainerId,
    ContainerIndex,
    ContainerKey,
    ContainerValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub column: String,
    /// Top-level member the value belongs to.
    pub member: String,
    /// Member names from the object (or container element) down to the leaf.
    pub path: Vec<String>,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub role: SlotRole,
    pub readonly: bool,
    /// Pointed-to class for pointer slots and pointer elements.
    pub target: Option<ClassId>,
    /// Pointer loaded on demand.
    #[serde(default)]
    pub lazy: bool,
    /// Pointer that does not own its target.
    #[serde(default)]
    pub weak: bool,
}

impl Slot {
    /// Slot for a column of the owner table.
    pub fn from_leaf(leaf: &LeafColumn<'_>) -> Self {
        let (role, target) = match leaf.role {
            ColumnRole::Id => (SlotRole::Id, None),
            ColumnRole::Data | ColumnRole::ReadOnly => (SlotRole::Data, None),
            ColumnRole::Version => (SlotRole::Version, None),
            ColumnRole::Discriminator => (SlotRole::Discriminator, None),
            ColumnRole::Pointer(t) => (SlotRole::Pointer, Some(t)),
        };
        let (lazy, weak) = match &leaf.member.kind {
            MemberKind::Pointer(shape) if target.is_some() => {
                (shape.lazy, shape.kind == PointerKind::Weak)
            }
            _ => (false, false),
        };
        Slot {
            column: leaf.name.clone(),
            member: leaf.member.name.clone(),
            path: leaf.path.clone(),
            sql_type: leaf.sql_type,
            nullable: leaf.nullable,
            role,
            readonly: leaf.readonly || leaf.role == ColumnRole::ReadOnly,
            target,
            lazy,
            weak,
        }
    }

    /// Slot for a container table column with an explicit role.
    pub fn element(leaf: &LeafColumn<'_>, role: SlotRole) -> Self {
        let target = match leaf.role {
            ColumnRole::Pointer(t) => Some(t),
            _ => None,
        };
        Slot {
            role,
            target,
            lazy: false,
            weak: false,
            ..Slot::from_leaf(leaf)
        }
    }

    pub fn is_variable_length(&self) -> bool {
        self.sql_type.is_variable_length()
    }

    /// Columns written by UPDATE's SET list.
    pub fn is_updatable(&self) -> bool {
        !self.readonly
            && matches!(self.role, SlotRole::Data | SlotRole::Pointer | SlotRole::Version)
    }
}

/// Column names of a slot list.
pub fn columns(slots: &[Slot]) -> Vec<String> {
    slots.iter().map(|s| s.column.clone()).collect()
}
