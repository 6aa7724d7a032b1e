//! The semantic model's vocabulary: persistent classes and their members.
//!
//! A [`PersistentClass`] is an object, a view, or a composite value. Each has
//! an ordered list of [`Member`]s whose [`MemberKind`] says how the member is
//! stored: a plain column, a nested composite, a container table, a pointer
//! to another object, the optimistic-concurrency version, or the polymorphic
//! discriminator.
//!
//! Table and column names arrive already resolved. The constructors here fill
//! in the conventional snake_case defaults so hand-built models stay short.

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

use crate::id::{ClassId, Location};

/// Resolved SQL type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Text,
    VarChar(u32),
    Blob,
}

impl SqlType {
    /// Whether values of this type are bound through a growable byte buffer.
    ///
    /// Only these slots can be reported as truncated by a driver.
    pub fn is_variable_length(&self) -> bool {
        matches!(self, SqlType::Text | SqlType::VarChar(_) | SqlType::Blob)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }
}

/// What kind of persistent class this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Object,
    View,
    Composite,
}

/// Container shapes supported by the container mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    Ordered,
    Set,
    Multiset,
    Map,
    Multimap,
}

impl ContainerKind {
    pub fn is_ordered(&self) -> bool {
        matches!(self, ContainerKind::Ordered)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ContainerKind::Map | ContainerKind::Multimap)
    }
}

/// Ownership flavor of an object pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerKind {
    Plain,
    Shared,
    Weak,
}

/// Referential action on the foreign key generated for a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    Cascade,
    SetNull,
}

/// Index flavor requested on a member or declared at class level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Index,
    Unique,
}

/// Element type stored in a container's key or value column(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Simple(SqlType),
    Composite(ClassId),
    Pointer(ClassId),
}

/// Shape of an object-pointer member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerShape {
    pub target: ClassId,
    pub kind: PointerKind,
    pub lazy: bool,
    /// Name of the member on the target class that owns the storage.
    pub inverse: Option<String>,
    pub on_delete: Option<OnDelete>,
}

/// Shape of a container member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerShape {
    pub kind: ContainerKind,
    pub value: ElementType,
    pub key: Option<ElementType>,
    pub value_nullable: bool,
    /// Differential update support.
    pub smart: bool,
    /// Name of the pointer member on the element class that owns the storage.
    pub inverse: Option<String>,
    /// Explicit table name override.
    pub table: Option<String>,
}

impl ContainerShape {
    pub fn new(kind: ContainerKind, value: ElementType) -> Self {
        ContainerShape {
            kind,
            value,
            key: None,
            value_nullable: false,
            smart: false,
            inverse: None,
            table: None,
        }
    }

    pub fn ordered(value: ElementType) -> Self {
        ContainerShape::new(ContainerKind::Ordered, value)
    }

    pub fn set(value: ElementType) -> Self {
        ContainerShape::new(ContainerKind::Set, value)
    }

    pub fn map(key: ElementType, value: ElementType) -> Self {
        ContainerShape {
            key: Some(key),
            ..ContainerShape::new(ContainerKind::Map, value)
        }
    }

    pub fn smart(mut self) -> Self {
        self.smart = true;
        self
    }

    pub fn inverse(mut self, member: impl Into<String>) -> Self {
        self.inverse = Some(member.into());
        self
    }
}

/// How a member is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Simple(SqlType),
    Composite(ClassId),
    Container(ContainerShape),
    Pointer(PointerShape),
    /// Optimistic-concurrency version counter.
    Version,
    /// Concrete-type tag of a polymorphic root.
    Discriminator,
    /// A source type the front end could not map to SQL.
    Unmapped(String),
}

/// A data member of a persistent class with its pragma overrides applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub kind: MemberKind,
    /// Resolved column name (or column prefix for composites).
    pub column: String,
    pub id: bool,
    /// Database-assigned id.
    pub auto: bool,
    pub nullable: bool,
    pub readonly: bool,
    pub default: Option<String>,
    pub index: Option<IndexKind>,
    #[serde(default)]
    pub location: Location,
}

impl Member {
    pub fn new(name: impl Into<String>, kind: MemberKind) -> Self {
        let name = name.into();
        Member {
            column: name.to_snake_case(),
            name,
            kind,
            id: false,
            auto: false,
            nullable: false,
            readonly: false,
            default: None,
            index: None,
            location: Location::default(),
        }
    }

    pub fn simple(name: impl Into<String>, sql_type: SqlType) -> Self {
        Member::new(name, MemberKind::Simple(sql_type))
    }

    pub fn id(name: impl Into<String>, sql_type: SqlType) -> Self {
        Member {
            id: true,
            ..Member::simple(name, sql_type)
        }
    }

    pub fn auto_id(name: impl Into<String>) -> Self {
        Member {
            id: true,
            auto: true,
            ..Member::simple(name, SqlType::BigInt)
        }
    }

    pub fn composite(name: impl Into<String>, class: ClassId) -> Self {
        Member::new(name, MemberKind::Composite(class))
    }

    pub fn container(name: impl Into<String>, shape: ContainerShape) -> Self {
        Member::new(name, MemberKind::Container(shape))
    }

    pub fn pointer(name: impl Into<String>, target: ClassId) -> Self {
        let mut member = Member::new(
            name,
            MemberKind::Pointer(PointerShape {
                target,
                kind: PointerKind::Shared,
                lazy: false,
                inverse: None,
                on_delete: None,
            }),
        );
        member.nullable = true;
        member
    }

    pub fn version(name: impl Into<String>) -> Self {
        Member::new(name, MemberKind::Version)
    }

    pub fn discriminator(name: impl Into<String>) -> Self {
        Member::new(name, MemberKind::Discriminator)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn with_default(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    pub fn indexed(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Adjusts the pointer shape in place. No-op for other member kinds.
    pub fn pointer_shape(mut self, f: impl FnOnce(&mut PointerShape)) -> Self {
        if let MemberKind::Pointer(shape) = &mut self.kind {
            f(shape);
        }
        self
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, MemberKind::Container(_))
    }

    /// Inverse members (pointer or container) have no storage on this side.
    pub fn is_inverse(&self) -> bool {
        match &self.kind {
            MemberKind::Pointer(p) => p.inverse.is_some(),
            MemberKind::Container(c) => c.inverse.is_some(),
            _ => false,
        }
    }
}

/// Inheritance edge from a class to its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inheritance {
    pub base: ClassId,
    pub polymorphic: bool,
}

/// Class-level index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: Option<String>,
    pub members: Vec<String>,
    pub kind: IndexKind,
    #[serde(default)]
    pub location: Location,
}

/// A persistent class description produced by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentClass {
    pub name: String,
    pub kind: ClassKind,
    /// Resolved table name (objects) or source table (views).
    pub table: String,
    pub members: Vec<Member>,
    pub base: Option<Inheritance>,
    /// Set on the root of a polymorphic hierarchy.
    pub polymorphic: bool,
    pub is_abstract: bool,
    /// Discriminator value override; defaults to the class name.
    pub discriminator: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub location: Location,
}

impl PersistentClass {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        let name = name.into();
        PersistentClass {
            table: name.to_snake_case(),
            name,
            kind,
            members: Vec::new(),
            base: None,
            polymorphic: false,
            is_abstract: false,
            discriminator: None,
            indexes: Vec::new(),
            location: Location::default(),
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        PersistentClass::new(name, ClassKind::Object)
    }

    pub fn view(name: impl Into<String>) -> Self {
        PersistentClass::new(name, ClassKind::View)
    }

    pub fn composite(name: impl Into<String>) -> Self {
        PersistentClass::new(name, ClassKind::Composite)
    }

    /// Marks this class as the root of a polymorphic hierarchy and appends a
    /// `typeid` discriminator member.
    pub fn polymorphic_root(mut self) -> Self {
        self.polymorphic = true;
        self.members.push(Member::discriminator("typeid"));
        self
    }

    pub fn derives(mut self, base: ClassId, polymorphic: bool) -> Self {
        self.base = Some(Inheritance { base, polymorphic });
        self
    }

    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn index(mut self, def: IndexDef) -> Self {
        self.indexes.push(def);
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn member_named(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn id_member(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.id)
    }

    pub fn version_member(&self) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| matches!(m.kind, MemberKind::Version))
    }

    pub fn discriminator_member(&self) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| matches!(m.kind, MemberKind::Discriminator))
    }

    /// Derived class in a polymorphic hierarchy.
    pub fn is_polymorphic_derived(&self) -> bool {
        self.base.is_some_and(|b| b.polymorphic)
    }

    pub fn discriminator_value(&self) -> &str {
        self.discriminator.as_deref().unwrap_or(&self.name)
    }
}
