//! Dynamic persistent objects.
//!
//! An [`Object`] is a class id plus named fields. Composite members nest as
//! field maps, relationships as [`Pointer`]s, and container members as
//! [`ContainerValue`]s. Objects are shared through [`ObjectRef`] so that the
//! identity cache, pointers, and the caller all see the same instance.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use ormc_core::{ClassId, ContainerKind};

use crate::value::Value;

pub type ObjectRef = Rc<RefCell<Object>>;
pub type WeakObjectRef = Weak<RefCell<Object>>;
pub type Fields = IndexMap<String, Field>;

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    Composite(Fields),
    Pointer(Pointer),
    Container(ContainerValue),
}

impl Field {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Field::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&ContainerValue> {
        match self {
            Field::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut ContainerValue> {
        match self {
            Field::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn composite(fields: impl IntoIterator<Item = (impl Into<String>, Field)>) -> Self {
        Field::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

macro_rules! field_from_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Field {
            fn from(value: $t) -> Self {
                Field::Value(value.into())
            }
        })*
    };
}

field_from_value!(Value, i64, i32, f64, bool, &str, String, Vec<u8>);

impl From<Pointer> for Field {
    fn from(pointer: Pointer) -> Self {
        Field::Pointer(pointer)
    }
}

impl From<ContainerValue> for Field {
    fn from(container: ContainerValue) -> Self {
        Field::Container(container)
    }
}

/// Field at `path` below `fields`, descending through composites.
pub fn get_path<'f>(fields: &'f Fields, path: &[String]) -> Option<&'f Field> {
    let (first, rest) = path.split_first()?;
    let field = fields.get(first)?;
    if rest.is_empty() {
        return Some(field);
    }
    match field {
        Field::Composite(inner) => get_path(inner, rest),
        _ => None,
    }
}

/// Stores `field` at `path`, creating intermediate composites.
pub fn set_path(fields: &mut Fields, path: &[String], field: Field) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), field);
        return;
    }
    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| Field::Composite(Fields::new()));
    if !matches!(entry, Field::Composite(_)) {
        *entry = Field::Composite(Fields::new());
    }
    if let Field::Composite(inner) = entry {
        set_path(inner, rest, field);
    }
}

#[derive(Clone, Default)]
pub enum Pointer {
    #[default]
    Null,
    Strong(ObjectRef),
    Weak(WeakObjectRef),
    /// Not loaded yet: the target's class and id.
    Lazy { class: ClassId, id: Vec<Value> },
}

impl Pointer {
    pub fn to(object: &ObjectRef) -> Self {
        Pointer::Strong(Rc::clone(object))
    }

    pub fn weak(object: &ObjectRef) -> Self {
        Pointer::Weak(Rc::downgrade(object))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Pointer::Null)
    }

    /// The target, if loaded and alive.
    pub fn get(&self) -> Option<ObjectRef> {
        match self {
            Pointer::Strong(o) => Some(Rc::clone(o)),
            Pointer::Weak(w) => w.upgrade(),
            Pointer::Null | Pointer::Lazy { .. } => None,
        }
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Pointer::Null, Pointer::Null) => true,
            (Pointer::Lazy { class: a, id: x }, Pointer::Lazy { class: b, id: y }) => a == b && x == y,
            (Pointer::Strong(_) | Pointer::Weak(_), Pointer::Strong(_) | Pointer::Weak(_)) => {
                match (self.get(), other.get()) {
                    (Some(a), Some(b)) => Rc::ptr_eq(&a, &b),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

// Targets are not followed: object graphs may be cyclic.
impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointer::Null => write!(f, "Null"),
            Pointer::Strong(o) => write!(f, "Strong({:p})", Rc::as_ptr(o)),
            Pointer::Weak(w) => write!(f, "Weak({:p})", w.as_ptr()),
            Pointer::Lazy { class, id } => write!(f, "Lazy({class:?}, {id:?})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub key: Option<Field>,
    pub value: Field,
}

/// Differential state of a smart container since its last store.
#[derive(Debug, Clone, PartialEq)]
enum Tracker {
    Ordered {
        stored_len: usize,
        dirty: BTreeSet<usize>,
    },
    Set {
        inserted: Vec<Field>,
        erased: Vec<Field>,
    },
}

/// Pending work for a container update.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Changes {
    /// Untracked: delete everything and insert the current contents.
    Replace,
    Ordered {
        updated: Vec<(usize, Field)>,
        /// New length when elements were removed from the end.
        truncate: Option<usize>,
        appended: Vec<(usize, Field)>,
    },
    Set {
        erased: Vec<Field>,
        inserted: Vec<Field>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ContainerValue {
    elements: Vec<Element>,
    tracker: Option<Tracker>,
}

impl PartialEq for ContainerValue {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl ContainerValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = impl Into<Field>>) -> Self {
        ContainerValue {
            elements: values
                .into_iter()
                .map(|v| Element { key: None, value: v.into() })
                .collect(),
            tracker: None,
        }
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = (impl Into<Field>, impl Into<Field>)>,
    ) -> Self {
        ContainerValue {
            elements: entries
                .into_iter()
                .map(|(k, v)| Element { key: Some(k.into()), value: v.into() })
                .collect(),
            tracker: None,
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn values(&self) -> impl Iterator<Item = &Field> {
        self.elements.iter().map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, value: &Field) -> bool {
        self.values().any(|v| v == value)
    }

    // ---------------------------------------------------------------------
    // Sequence operations
    // ---------------------------------------------------------------------

    pub fn push(&mut self, value: impl Into<Field>) {
        let value = value.into();
        if let Some(Tracker::Set { inserted, erased }) = &mut self.tracker {
            track_insert(inserted, erased, &value);
        }
        self.elements.push(Element { key: None, value });
    }

    /// Replaces the element at `index`; false if out of range.
    pub fn set(&mut self, index: usize, value: impl Into<Field>) -> bool {
        let Some(element) = self.elements.get_mut(index) else {
            return false;
        };
        element.value = value.into();
        if let Some(Tracker::Ordered { dirty, .. }) = &mut self.tracker {
            dirty.insert(index);
        }
        true
    }

    pub fn truncate(&mut self, len: usize) {
        if len >= self.elements.len() {
            return;
        }
        if let Some(Tracker::Ordered { stored_len, dirty }) = &mut self.tracker {
            dirty.extend(len..*stored_len);
        }
        self.elements.truncate(len);
    }

    pub fn pop(&mut self) -> Option<Field> {
        let len = self.elements.len().checked_sub(1)?;
        let value = self.elements.get(len).map(|e| e.value.clone());
        self.truncate(len);
        value
    }

    // ---------------------------------------------------------------------
    // Set and map operations
    // ---------------------------------------------------------------------

    /// Adds `value` unless an equal element exists.
    pub fn insert(&mut self, value: impl Into<Field>) -> bool {
        let value = value.into();
        if self.contains(&value) {
            return false;
        }
        self.push(value);
        true
    }

    /// Removes the first element equal to `value`.
    pub fn remove(&mut self, value: &Field) -> bool {
        let Some(pos) = self.elements.iter().position(|e| &e.value == value) else {
            return false;
        };
        let removed = self.elements.remove(pos);
        match &mut self.tracker {
            Some(Tracker::Set { inserted, erased }) => {
                if let Some(i) = inserted.iter().position(|v| v == &removed.value) {
                    inserted.remove(i);
                } else {
                    erased.push(removed.value);
                }
            }
            // Every later position shifted.
            Some(Tracker::Ordered { stored_len, dirty }) => {
                dirty.extend(pos..*stored_len);
            }
            None => {}
        }
        true
    }

    /// Map insert: replaces the value of an existing key.
    pub fn insert_entry(&mut self, key: impl Into<Field>, value: impl Into<Field>) {
        let key = key.into();
        let value = value.into();
        match self.elements.iter_mut().find(|e| e.key.as_ref() == Some(&key)) {
            Some(element) => element.value = value,
            None => self.elements.push(Element { key: Some(key), value }),
        }
    }

    /// Multimap insert: always adds.
    pub fn push_entry(&mut self, key: impl Into<Field>, value: impl Into<Field>) {
        self.elements.push(Element {
            key: Some(key.into()),
            value: value.into(),
        });
    }

    pub fn get(&self, key: &Field) -> Option<&Field> {
        self.elements
            .iter()
            .find(|e| e.key.as_ref() == Some(key))
            .map(|e| &e.value)
    }

    // ---------------------------------------------------------------------
    // Change tracking
    // ---------------------------------------------------------------------

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    /// Marks the current contents as stored. Only ordered and set kinds
    /// track changes.
    pub(crate) fn mark_stored(&mut self, kind: ContainerKind) {
        self.tracker = match kind {
            ContainerKind::Ordered => Some(Tracker::Ordered {
                stored_len: self.elements.len(),
                dirty: BTreeSet::new(),
            }),
            ContainerKind::Set => Some(Tracker::Set {
                inserted: Vec::new(),
                erased: Vec::new(),
            }),
            _ => None,
        };
    }

    pub(crate) fn changes(&self) -> Changes {
        match &self.tracker {
            None => Changes::Replace,
            Some(Tracker::Ordered { stored_len, dirty }) => {
                let len = self.elements.len();
                let updated = dirty
                    .iter()
                    .filter(|&&i| i < len.min(*stored_len))
                    .map(|&i| (i, self.elements[i].value.clone()))
                    .collect();
                let appended = (*stored_len..len)
                    .map(|i| (i, self.elements[i].value.clone()))
                    .collect();
                Changes::Ordered {
                    updated,
                    truncate: (len < *stored_len).then_some(len),
                    appended,
                }
            }
            Some(Tracker::Set { inserted, erased }) => Changes::Set {
                erased: erased.clone(),
                inserted: inserted.clone(),
            },
        }
    }
}

fn track_insert(inserted: &mut Vec<Field>, erased: &mut Vec<Field>, value: &Field) {
    if let Some(i) = erased.iter().position(|v| v == value) {
        erased.remove(i);
    } else {
        inserted.push(value.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    class: ClassId,
    fields: Fields,
}

impl Object {
    pub fn new(class: ClassId) -> Self {
        Object {
            class,
            fields: Fields::new(),
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub(crate) fn set_class(&mut self, class: ClassId) {
        self.class = class;
    }

    pub fn with(mut self, name: &str, field: impl Into<Field>) -> Self {
        self.set(name, field);
        self
    }

    pub fn set(&mut self, name: &str, field: impl Into<Field>) -> &mut Self {
        self.fields.insert(name.to_string(), field.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    /// Simple value of a top-level member.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Field::as_value)
    }

    pub fn pointer(&self, name: &str) -> Option<&Pointer> {
        self.get(name).and_then(Field::as_pointer)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerValue> {
        self.get(name).and_then(Field::as_container)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerValue> {
        self.get_mut(name).and_then(Field::as_container_mut)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get_path(&self, path: &[String]) -> Option<&Field> {
        get_path(&self.fields, path)
    }

    pub fn set_path(&mut self, path: &[String], field: Field) {
        set_path(&mut self.fields, path, field);
    }

    pub fn into_ref(self) -> ObjectRef {
        Rc::new(RefCell::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn nested_paths() {
        let mut object = Object::new(ClassId(0));
        object.set_path(&path(&["address", "city"]), Field::from("Oslo"));
        object.set_path(&path(&["address", "zip"]), Field::from("0150"));
        assert_eq!(
            object.get_path(&path(&["address", "city"])),
            Some(&Field::from("Oslo"))
        );
        assert!(matches!(object.get("address"), Some(Field::Composite(f)) if f.len() == 2));
    }

    #[test]
    fn ordered_tracking() {
        let mut c = ContainerValue::from_values(["a", "b", "c"]);
        assert_eq!(c.changes(), Changes::Replace);
        c.mark_stored(ContainerKind::Ordered);

        c.set(1, "B");
        c.push("d");
        assert_eq!(
            c.changes(),
            Changes::Ordered {
                updated: vec![(1, Field::from("B"))],
                truncate: None,
                appended: vec![(3, Field::from("d"))],
            }
        );

        c.mark_stored(ContainerKind::Ordered);
        c.truncate(1);
        c.push("x");
        assert_eq!(
            c.changes(),
            Changes::Ordered {
                updated: vec![(1, Field::from("x"))],
                truncate: Some(2),
                appended: vec![],
            }
        );
    }

    #[test]
    fn set_tracking_cancels_out() {
        let mut c = ContainerValue::from_values(["a", "b"]);
        c.mark_stored(ContainerKind::Set);
        assert!(!c.insert("a"));
        assert!(c.insert("c"));
        assert!(c.remove(&Field::from("a")));
        assert!(c.remove(&Field::from("c")));
        assert!(c.insert("a"));
        assert_eq!(
            c.changes(),
            Changes::Set { erased: vec![], inserted: vec![] }
        );
    }

    #[test]
    fn map_entries() {
        let mut c = ContainerValue::new();
        c.insert_entry("k", 1);
        c.insert_entry("k", 2);
        c.push_entry("j", 3);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&Field::from("k")), Some(&Field::from(2)));
    }

    #[test]
    fn pointers_compare_by_identity() {
        let a = Object::new(ClassId(0)).into_ref();
        let b = Object::new(ClassId(0)).into_ref();
        assert_eq!(Pointer::to(&a), Pointer::weak(&a));
        assert_ne!(Pointer::to(&a), Pointer::to(&b));
        assert_eq!(format!("{:?}", Pointer::Null), "Null");
    }
}
