//! Shared column traversal.
//!
//! [`walk_columns`] is the single source of column order for a class's table.
//! The schema builder turns each [`LeafColumn`] into a table column and the
//! statement planner turns the very same sequence into image slots, so the
//! two orders cannot drift apart.
//!
//! Order rules:
//! - a polymorphic derived class starts with its root's id column(s);
//! - a reuse (non-polymorphic) base contributes its columns first;
//! - members follow in declaration order, composites expanding in place
//!   with a `column_` prefix;
//! - pointers contribute the target's id column; containers and inverse
//!   members contribute nothing.

use crate::error::ModelError;
use crate::id::ClassId;
use crate::model::Model;
use crate::types::{ElementType, Member, MemberKind, SqlType};

/// What a leaf column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColumnRole {
    Id,
    Data,
    ReadOnly,
    Version,
    Discriminator,
    /// Foreign id of a pointed-to object.
    Pointer(ClassId),
}

/// One physical column produced by the traversal.
#[derive(Debug, Clone)]
pub struct LeafColumn<'m> {
    pub name: String,
    /// Member names from the class (or container element) down to the leaf.
    pub path: Vec<String>,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub role: ColumnRole,
    pub auto: bool,
    /// Set for columns of readonly members, whatever their role.
    pub readonly: bool,
    pub default: Option<String>,
    /// Top-level member this column comes from.
    pub member: &'m Member,
    /// Class declaring that member.
    pub owner: ClassId,
}

/// Receives leaf columns in table order.
pub trait ColumnVisitor<'m> {
    fn column(&mut self, column: LeafColumn<'m>) -> Result<(), ModelError>;
}

impl<'m> ColumnVisitor<'m> for Vec<LeafColumn<'m>> {
    fn column(&mut self, column: LeafColumn<'m>) -> Result<(), ModelError> {
        self.push(column);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Inherited {
    id: bool,
    readonly: bool,
    nullable: bool,
}

/// Walks the columns of `class`'s own table in table order.
pub fn walk_columns<'m>(
    model: &'m Model,
    class: ClassId,
    visitor: &mut dyn ColumnVisitor<'m>,
) -> Result<(), ModelError> {
    let decl = model.class(class)?;
    if decl.is_polymorphic_derived() {
        for column in id_columns(model, class)? {
            visitor.column(LeafColumn {
                auto: false,
                ..column
            })?;
        }
    } else if let Some(base) = decl.base {
        walk_columns(model, base.base, visitor)?;
    }

    for member in &decl.members {
        walk_member(
            model,
            class,
            member,
            member,
            "",
            Vec::new(),
            Inherited::default(),
            visitor,
        )?;
    }
    Ok(())
}

/// Collects [`walk_columns`] into a vector.
pub fn collect_columns(model: &Model, class: ClassId) -> Result<Vec<LeafColumn<'_>>, ModelError> {
    let mut out = Vec::new();
    walk_columns(model, class, &mut out)?;
    Ok(out)
}

/// Id column(s) of the class that owns `class`'s identity.
pub fn id_columns(model: &Model, class: ClassId) -> Result<Vec<LeafColumn<'_>>, ModelError> {
    let Some(owner) = model.id_owner(class)? else {
        return Ok(Vec::new());
    };
    let decl = model.class(owner)?;
    let mut out = Vec::new();
    if let Some(member) = decl.id_member() {
        walk_member(
            model,
            owner,
            member,
            member,
            "",
            Vec::new(),
            Inherited::default(),
            &mut out,
        )?;
    }
    Ok(out)
}

/// Walks the columns of a container key or value element.
///
/// Leaf names start from `base_name` ("value", "key"); paths are relative to
/// the element.
pub fn walk_element<'m>(
    model: &'m Model,
    owner: ClassId,
    member: &'m Member,
    element: &ElementType,
    base_name: &str,
    nullable: bool,
    visitor: &mut dyn ColumnVisitor<'m>,
) -> Result<(), ModelError> {
    match element {
        ElementType::Simple(sql_type) => visitor.column(LeafColumn {
            name: base_name.to_string(),
            path: Vec::new(),
            sql_type: *sql_type,
            nullable,
            role: ColumnRole::Data,
            auto: false,
            readonly: false,
            default: None,
            member,
            owner,
        }),
        ElementType::Composite(composite) => {
            let prefix = format!("{base_name}_");
            for inner in &model.class(*composite)?.members {
                walk_member(
                    model,
                    owner,
                    member,
                    inner,
                    &prefix,
                    Vec::new(),
                    Inherited {
                        nullable,
                        ..Inherited::default()
                    },
                    visitor,
                )?;
            }
            Ok(())
        }
        ElementType::Pointer(target) => {
            let sql_type = pointee_id_type(model, owner, member, *target)?;
            visitor.column(LeafColumn {
                name: base_name.to_string(),
                path: Vec::new(),
                sql_type,
                nullable,
                role: ColumnRole::Pointer(*target),
                auto: false,
                readonly: false,
                default: None,
                member,
                owner,
            })
        }
    }
}

/// Container members stored for `class`, including those inherited through
/// reuse bases, paired with their declaring class.
pub fn container_members(model: &Model, class: ClassId) -> Result<Vec<(ClassId, &Member)>, ModelError> {
    members_matching(model, class, &|m: &Member| m.is_container())
}

/// Pointer members whose storage lives on the other side.
pub fn inverse_pointer_members(model: &Model, class: ClassId) -> Result<Vec<(ClassId, &Member)>, ModelError> {
    members_matching(model, class, &|m: &Member| {
        matches!(&m.kind, MemberKind::Pointer(p) if p.inverse.is_some())
    })
}

fn members_matching<'m>(
    model: &'m Model,
    class: ClassId,
    pred: &dyn Fn(&Member) -> bool,
) -> Result<Vec<(ClassId, &'m Member)>, ModelError> {
    let decl = model.class(class)?;
    let mut out = Vec::new();
    if let Some(base) = decl.base.filter(|b| !b.polymorphic) {
        out.extend(members_matching(model, base.base, pred)?);
    }
    out.extend(decl.members.iter().filter(|m| pred(m)).map(|m| (class, m)));
    Ok(out)
}

/// SQL type of the id column a pointer to `target` stores.
pub fn pointee_id_type(
    model: &Model,
    owner: ClassId,
    member: &Member,
    target: ClassId,
) -> Result<SqlType, ModelError> {
    let owner_name = model.class(owner)?.name.clone();
    let target_decl = model.class(target)?;
    match model.id_member(target)?.map(|m| &m.kind) {
        Some(MemberKind::Simple(t)) => Ok(*t),
        Some(_) => Err(ModelError::UnsupportedShape {
            class: owner_name,
            member: member.name.clone(),
            reason: format!("pointer to '{}' which has a composite id", target_decl.name),
            location: member.location.clone(),
        }),
        None => Err(ModelError::MissingId {
            class: target_decl.name.clone(),
            referenced_by: format!("{owner_name}::{}", member.name),
            location: member.location.clone(),
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_member<'m>(
    model: &'m Model,
    owner: ClassId,
    top: &'m Member,
    member: &'m Member,
    prefix: &str,
    mut path: Vec<String>,
    inherited: Inherited,
    visitor: &mut dyn ColumnVisitor<'m>,
) -> Result<(), ModelError> {
    let id = inherited.id || member.id;
    let readonly = inherited.readonly || member.readonly;
    let nullable = !id && (inherited.nullable || member.nullable);
    path.push(member.name.clone());
    let name = format!("{prefix}{}", member.column);

    let role = if id {
        ColumnRole::Id
    } else if readonly {
        ColumnRole::ReadOnly
    } else {
        ColumnRole::Data
    };

    match &member.kind {
        MemberKind::Simple(sql_type) => visitor.column(LeafColumn {
            name,
            path,
            sql_type: *sql_type,
            nullable,
            role,
            auto: member.auto,
            readonly,
            default: member.default.clone(),
            member: top,
            owner,
        }),
        MemberKind::Composite(composite) => {
            let prefix = format!("{name}_");
            for inner in &model.class(*composite)?.members {
                walk_member(
                    model,
                    owner,
                    top,
                    inner,
                    &prefix,
                    path.clone(),
                    Inherited {
                        id,
                        readonly,
                        nullable,
                    },
                    visitor,
                )?;
            }
            Ok(())
        }
        MemberKind::Pointer(shape) => {
            if shape.inverse.is_some() {
                return Ok(());
            }
            let sql_type = pointee_id_type(model, owner, member, shape.target)?;
            visitor.column(LeafColumn {
                name,
                path,
                sql_type,
                nullable,
                role: ColumnRole::Pointer(shape.target),
                auto: false,
                readonly,
                default: None,
                member: top,
                owner,
            })
        }
        MemberKind::Container(_) => Ok(()),
        MemberKind::Version => visitor.column(LeafColumn {
            name,
            path,
            sql_type: SqlType::BigInt,
            nullable: false,
            role: ColumnRole::Version,
            auto: false,
            readonly,
            default: Some("1".to_string()),
            member: top,
            owner,
        }),
        MemberKind::Discriminator => visitor.column(LeafColumn {
            name,
            path,
            sql_type: SqlType::Text,
            nullable: false,
            role: ColumnRole::Discriminator,
            auto: false,
            readonly,
            default: None,
            member: top,
            owner,
        }),
        MemberKind::Unmapped(source_type) => Err(ModelError::UnmappableType {
            class: model.class(owner)?.name.clone(),
            member: member.name.clone(),
            source_type: source_type.clone(),
            location: member.location.clone(),
        }),
    }
}
