//! Model validation.
//!
//! Checks every class and member for shapes the backend cannot map, reports
//! each problem to the [`DiagnosticSink`], and fails with
//! [`ModelError::Invalid`] when anything was wrong. Generation never starts on
//! a model that did not validate.

use std::collections::HashSet;

use crate::diagnostics::DiagnosticSink;
use crate::error::ModelError;
use crate::id::ClassId;
use crate::model::Model;
use crate::traverse::collect_columns;
use crate::types::{
    ClassKind, ContainerKind, ElementType, Member, MemberKind, PersistentClass,
};

/// Validates the whole model.
pub fn validate(model: &Model, sink: &mut DiagnosticSink) -> Result<(), ModelError> {
    if let Err(err) = model.dependency_order() {
        sink.report(&err);
        return sink.finish();
    }

    for (id, class) in model.classes() {
        let before = sink.error_count();
        check_class(model, id, class, sink)?;
        for member in &class.members {
            check_member(model, id, class, member, sink)?;
        }
        check_indexes(class, sink);

        // Column-level problems only matter once the declarations are sound.
        if sink.error_count() == before && class.kind == ClassKind::Object {
            check_columns(model, id, class, sink);
        }
    }

    sink.finish()
}

fn invalid(class: &PersistentClass, reason: impl Into<String>) -> ModelError {
    ModelError::InvalidClass {
        class: class.name.clone(),
        reason: reason.into(),
        location: class.location.clone(),
    }
}

fn unsupported(class: &PersistentClass, member: &Member, reason: impl Into<String>) -> ModelError {
    ModelError::UnsupportedShape {
        class: class.name.clone(),
        member: member.name.clone(),
        reason: reason.into(),
        location: member.location.clone(),
    }
}

fn ambiguous(class: &PersistentClass, member: &Member, reason: impl Into<String>) -> ModelError {
    ModelError::AmbiguousRelationship {
        class: class.name.clone(),
        member: member.name.clone(),
        reason: reason.into(),
        location: member.location.clone(),
    }
}

fn check_class(
    model: &Model,
    id: ClassId,
    class: &PersistentClass,
    sink: &mut DiagnosticSink,
) -> Result<(), ModelError> {
    let ids = class.members.iter().filter(|m| m.id).count();
    let versions = class
        .members
        .iter()
        .filter(|m| matches!(m.kind, MemberKind::Version))
        .count();
    let discriminators = class
        .members
        .iter()
        .filter(|m| matches!(m.kind, MemberKind::Discriminator))
        .count();

    if ids > 1 {
        sink.report(&invalid(class, "more than one id member"));
    }
    if versions > 1 {
        sink.report(&invalid(class, "more than one version member"));
    }

    match class.kind {
        ClassKind::View => {
            if ids > 0 {
                sink.report(&invalid(class, "views cannot declare an id member"));
            }
            if class.base.is_some() || class.polymorphic {
                sink.report(&invalid(class, "views cannot take part in inheritance"));
            }
        }
        ClassKind::Composite => {
            if ids > 0 || versions > 0 || discriminators > 0 {
                sink.report(&invalid(
                    class,
                    "composite values cannot declare id, version or discriminator members",
                ));
            }
            for member in class.members.iter().filter(|m| m.is_container()) {
                sink.report(&unsupported(class, member, "container inside a composite value"));
            }
        }
        ClassKind::Object => {}
    }

    if class.polymorphic {
        if class.base.is_some_and(|b| b.polymorphic) {
            sink.report(&invalid(class, "polymorphic root cannot have a polymorphic base"));
        }
        if discriminators != 1 {
            sink.report(&invalid(
                class,
                "polymorphic root must declare exactly one discriminator member",
            ));
        }
    } else if discriminators > 0 {
        sink.report(&invalid(class, "discriminator outside a polymorphic root"));
    }

    if let Some(base) = class.base {
        let base_decl = model.class(base.base)?;
        if base_decl.kind != class.kind {
            sink.report(&invalid(
                class,
                format!("base '{}' is a different kind of class", base_decl.name),
            ));
        }
        let base_polymorphic = model.is_polymorphic(base.base)?;
        if base.polymorphic && !base_polymorphic {
            sink.report(&invalid(
                class,
                format!("polymorphic base '{}' is not part of a polymorphic hierarchy", base_decl.name),
            ));
        }
        if !base.polymorphic && base_polymorphic {
            sink.report(&invalid(
                class,
                format!("reuse inheritance from polymorphic class '{}'", base_decl.name),
            ));
        }
        if base.polymorphic && (ids > 0 || versions > 0) {
            sink.report(&invalid(
                class,
                "derived classes share the root's id and version",
            ));
        }
    }

    if class.kind == ClassKind::Object && ids == 0 && model.id_owner(id)?.is_none() {
        for member in class.members.iter().filter(|m| m.is_container()) {
            sink.report(&unsupported(class, member, "container in a class without an id"));
        }
    }
    Ok(())
}

fn check_member(
    model: &Model,
    id: ClassId,
    class: &PersistentClass,
    member: &Member,
    sink: &mut DiagnosticSink,
) -> Result<(), ModelError> {
    if member.auto {
        let integral = matches!(&member.kind, MemberKind::Simple(t) if t.is_integral());
        if !member.id || !integral {
            sink.report(&unsupported(class, member, "auto requires an integral id member"));
        }
    }

    match &member.kind {
        MemberKind::Simple(_) | MemberKind::Version | MemberKind::Discriminator => {}
        MemberKind::Unmapped(source_type) => sink.report(&ModelError::UnmappableType {
            class: class.name.clone(),
            member: member.name.clone(),
            source_type: source_type.clone(),
            location: member.location.clone(),
        }),
        MemberKind::Composite(target) => {
            if model.class(*target)?.kind != ClassKind::Composite {
                sink.report(&unsupported(class, member, "composite member of a non-composite class"));
            }
        }
        MemberKind::Pointer(shape) => {
            if member.id {
                sink.report(&unsupported(class, member, "object pointer used as id"));
            }
            check_pointee(model, class, member, shape.target, sink)?;
            if let Some(inverse) = &shape.inverse {
                check_inverse(model, id, class, member, shape.target, inverse, sink)?;
            }
        }
        MemberKind::Container(shape) => {
            if member.id {
                sink.report(&unsupported(class, member, "container used as id"));
            }
            if shape.kind.is_map() != shape.key.is_some() {
                sink.report(&unsupported(class, member, "map containers need a key, others must not have one"));
            }
            for element in [Some(&shape.value), shape.key.as_ref()].into_iter().flatten() {
                match element {
                    ElementType::Simple(_) => {}
                    ElementType::Composite(c) => {
                        let decl = model.class(*c)?;
                        if decl.kind != ClassKind::Composite {
                            sink.report(&unsupported(class, member, "composite element of a non-composite class"));
                        } else if decl.members.iter().any(|m| m.is_container()) {
                            sink.report(&unsupported(class, member, "nested container in element"));
                        }
                    }
                    ElementType::Pointer(target) => {
                        check_pointee(model, class, member, *target, sink)?;
                    }
                }
            }
            if shape.smart && !matches!(shape.kind, ContainerKind::Ordered | ContainerKind::Set) {
                sink.warn(
                    &member.location,
                    format!(
                        "'{}::{}': differential update is not supported for {:?} containers, using replace-all",
                        class.name, member.name, shape.kind
                    ),
                );
            }
            if let Some(inverse) = &shape.inverse {
                match &shape.value {
                    ElementType::Pointer(target) if shape.key.is_none() => {
                        check_inverse(model, id, class, member, *target, inverse, sink)?;
                    }
                    _ => sink.report(&ambiguous(
                        class,
                        member,
                        "inverse containers must hold object pointers",
                    )),
                }
            }
        }
    }
    Ok(())
}

fn check_pointee(
    model: &Model,
    class: &PersistentClass,
    member: &Member,
    target: ClassId,
    sink: &mut DiagnosticSink,
) -> Result<(), ModelError> {
    let decl = model.class(target)?;
    if decl.kind != ClassKind::Object {
        sink.report(&unsupported(class, member, format!("pointer to non-object class '{}'", decl.name)));
        return Ok(());
    }
    match model.id_member(target)?.map(|m| &m.kind) {
        None => sink.report(&ModelError::MissingId {
            class: decl.name.clone(),
            referenced_by: format!("{}::{}", class.name, member.name),
            location: member.location.clone(),
        }),
        Some(MemberKind::Simple(_)) => {}
        Some(_) => sink.report(&unsupported(
            class,
            member,
            format!("pointer to '{}' which has a composite id", decl.name),
        )),
    }
    Ok(())
}

/// The other side of an inverse member must be a non-inverse pointer back to
/// this class (or one of its bases).
fn check_inverse(
    model: &Model,
    id: ClassId,
    class: &PersistentClass,
    member: &Member,
    target: ClassId,
    inverse: &str,
    sink: &mut DiagnosticSink,
) -> Result<(), ModelError> {
    let target_decl = model.class(target)?;
    let Some(other) = target_decl.member_named(inverse) else {
        sink.report(&ambiguous(
            class,
            member,
            format!("'{}' has no member '{inverse}'", target_decl.name),
        ));
        return Ok(());
    };
    match &other.kind {
        MemberKind::Pointer(p) if p.inverse.is_some() => sink.report(&ambiguous(
            class,
            member,
            format!("both '{}::{inverse}' and this member are inverse", target_decl.name),
        )),
        MemberKind::Pointer(p) => {
            if !model.is_same_or_derived(id, p.target)? {
                sink.report(&ambiguous(
                    class,
                    member,
                    format!("'{}::{inverse}' does not point back to '{}'", target_decl.name, class.name),
                ));
            }
        }
        _ => sink.report(&ambiguous(
            class,
            member,
            format!("'{}::{inverse}' is not an object pointer", target_decl.name),
        )),
    }
    Ok(())
}

fn check_indexes(class: &PersistentClass, sink: &mut DiagnosticSink) {
    for def in &class.indexes {
        for name in &def.members {
            let known = class
                .member_named(name)
                .is_some_and(|m| !m.is_container() && !m.is_inverse());
            if !known {
                sink.report(&ModelError::UnknownIndexMember {
                    class: class.name.clone(),
                    member: name.clone(),
                    location: def.location.clone(),
                });
            }
        }
    }
}

fn check_columns(model: &Model, id: ClassId, class: &PersistentClass, sink: &mut DiagnosticSink) {
    match collect_columns(model, id) {
        Ok(columns) => {
            let mut seen = HashSet::new();
            for column in &columns {
                if !seen.insert(column.name.as_str()) {
                    sink.report(&invalid(class, format!("duplicate column '{}'", column.name)));
                }
            }
        }
        Err(err) => sink.report(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Location;
    use crate::types::{ContainerShape, IndexDef, IndexKind, SqlType};

    fn validate_model(model: &Model) -> (Result<(), ModelError>, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let result = validate(model, &mut sink);
        (result, sink)
    }

    #[test]
    fn valid_person_model() {
        let mut model = Model::new();
        model
            .add_class(
                PersistentClass::object("Person")
                    .member(Member::id("id", SqlType::Integer))
                    .member(Member::simple("name", SqlType::Text))
                    .member(Member::container(
                        "phones",
                        ContainerShape::ordered(ElementType::Simple(SqlType::Text)),
                    )),
            )
            .unwrap();
        let (result, sink) = validate_model(&model);
        assert!(result.is_ok(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn every_problem_is_reported_with_location() {
        let mut model = Model::new();
        let log = model
            .add_class(PersistentClass::object("Log").member(Member::simple("line", SqlType::Text)))
            .unwrap();
        model
            .add_class(
                PersistentClass::object("Holder")
                    .member(Member::id("id", SqlType::Integer))
                    .member(
                        Member::pointer("log", log).at(Location::new("holder.hxx", 7, 3)),
                    )
                    .member(
                        Member::new("lock", MemberKind::Unmapped("std::mutex".into()))
                            .at(Location::new("holder.hxx", 8, 3)),
                    )
                    .index(IndexDef {
                        name: None,
                        members: vec!["missing".into()],
                        kind: IndexKind::Index,
                        location: Location::new("holder.hxx", 2, 1),
                    }),
            )
            .unwrap();

        let (result, sink) = validate_model(&model);
        assert_eq!(result, Err(ModelError::Invalid { count: 3 }));
        let lines: Vec<u32> = sink.diagnostics().iter().map(|d| d.location.line).collect();
        assert!(lines.contains(&7));
        assert!(lines.contains(&8));
        assert!(lines.contains(&2));
    }

    #[test]
    fn view_with_id_is_invalid() {
        let mut model = Model::new();
        model
            .add_class(PersistentClass::view("Summary").member(Member::id("id", SqlType::Integer)))
            .unwrap();
        let (result, _) = validate_model(&model);
        assert!(result.is_err());
    }

    #[test]
    fn polymorphic_rules() {
        let mut model = Model::new();
        let root = model
            .add_class(PersistentClass::object("Root").member(Member::id("id", SqlType::Integer)))
            .unwrap();
        // Root is not polymorphic, so a polymorphic derive is invalid.
        model
            .add_class(PersistentClass::object("Leaf").derives(root, true))
            .unwrap();
        let (result, sink) = validate_model(&model);
        assert!(result.is_err());
        assert!(sink.diagnostics()[0].message.contains("not part of a polymorphic hierarchy"));
    }

    #[test]
    fn inverse_must_point_back() {
        let mut model = Model::new();
        let a = model
            .add_class(
                PersistentClass::object("A")
                    .member(Member::id("id", SqlType::Integer))
                    .member(Member::pointer("b", ClassId(1)).pointer_shape(|p| {
                        p.inverse = Some("a".into());
                    })),
            )
            .unwrap();
        model
            .add_class(
                PersistentClass::object("B")
                    .member(Member::id("id", SqlType::Integer))
                    .member(Member::pointer("a", a).pointer_shape(|p| {
                        p.inverse = Some("b".into());
                    })),
            )
            .unwrap();
        let (result, sink) = validate_model(&model);
        assert!(result.is_err());
        assert!(sink
            .diagnostics()
            .iter()
            .all(|d| d.message.contains("ambiguous relationship")));
    }

    #[test]
    fn nested_container_shape_rejected() {
        let mut model = Model::new();
        let inner = model
            .add_class(PersistentClass::composite("Inner").member(Member::container(
                "tags",
                ContainerShape::set(ElementType::Simple(SqlType::Text)),
            )))
            .unwrap();
        model
            .add_class(
                PersistentClass::object("Outer")
                    .member(Member::id("id", SqlType::Integer))
                    .member(Member::container(
                        "items",
                        ContainerShape::ordered(ElementType::Composite(inner)),
                    )),
            )
            .unwrap();
        let (result, sink) = validate_model(&model);
        assert!(result.is_err());
        assert!(sink
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("nested container")));
    }

    #[test]
    fn smart_map_only_warns() {
        let mut model = Model::new();
        model
            .add_class(
                PersistentClass::object("Config")
                    .member(Member::id("id", SqlType::Integer))
                    .member(Member::container(
                        "entries",
                        ContainerShape::map(
                            ElementType::Simple(SqlType::Text),
                            ElementType::Simple(SqlType::Text),
                        )
                        .smart(),
                    )),
            )
            .unwrap();
        let (result, sink) = validate_model(&model);
        assert!(result.is_ok());
        assert_eq!(sink.diagnostics().len(), 1);
    }
}
