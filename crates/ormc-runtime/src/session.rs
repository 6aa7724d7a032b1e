//! The [`Session`]: persist, load, update and erase objects through a
//! [`Plan`].
//!
//! Every public operation goes through the [`Registry`] record of the
//! object's dynamic class (or, for loads, of the class asked for), so a
//! polymorphic object is always stored and erased as its most derived type.
//!
//! # Loading
//!
//! Loaded objects enter the identity cache, keyed by hierarchy root and id,
//! before their fields are initialized. A pointer to an object that is
//! already cached resolves to that instance, so cyclic graphs load once.
//! While a class's find statement is in use its class is locked; a pointer
//! that needs another object of a locked class gets an empty placeholder
//! that is queued and loaded once the lock is released.
//!
//! # Hierarchies
//!
//! Persist walks the hierarchy from the root down, one INSERT per level.
//! Erase walks it from the most derived level up, after container rows.
//! Update writes every level and checks the version held by the root.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use ormc_core::ClassId;
use ormc_plan::{ClassPlan, Plan, Slot, SlotRole, StatementPlan};

use crate::binding::{self, StatementCache, StatementKey};
use crate::driver::{Driver, ExecResult};
use crate::error::{display_id, RuntimeError};
use crate::object::{get_path, Field, Object, ObjectRef, Pointer, WeakObjectRef};
use crate::options::{CacheMode, RuntimeOptions};
use crate::registry::Registry;
use crate::value::{id_key, IdKey, Value};

type CacheKey = (ClassId, IdKey);

/// An object whose load waits for its class's statements to be released.
struct Delayed {
    class: ClassId,
    id: Vec<Value>,
    object: ObjectRef,
}

pub struct Session<'p> {
    plan: &'p Plan,
    registry: &'p Registry,
    driver: Box<dyn Driver>,
    options: RuntimeOptions,
    statements: StatementCache,
    cache: HashMap<CacheKey, ObjectRef>,
    locked: HashSet<ClassId>,
    delayed: Vec<Delayed>,
    /// Cache entries added by loads during the current top-level call.
    loaded: Vec<CacheKey>,
    /// Weak pointers resolved during the current top-level call.
    weak: Vec<(ClassId, WeakObjectRef)>,
    depth: usize,
}

impl<'p> Session<'p> {
    pub fn new(
        plan: &'p Plan,
        registry: &'p Registry,
        driver: Box<dyn Driver>,
        options: RuntimeOptions,
    ) -> Self {
        Session {
            plan,
            registry,
            driver,
            options,
            statements: StatementCache::new(),
            cache: HashMap::new(),
            locked: HashSet::new(),
            delayed: Vec::new(),
            loaded: Vec::new(),
            weak: Vec::new(),
            depth: 0,
        }
    }

    pub fn plan(&self) -> &'p Plan {
        self.plan
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    // -----------------------------------------------------------------------
    // Transactions and cache
    // -----------------------------------------------------------------------

    pub fn begin(&mut self) -> Result<(), RuntimeError> {
        self.driver.begin()
    }

    pub fn commit(&mut self) -> Result<(), RuntimeError> {
        self.driver.commit()
    }

    /// Rolls back and forgets every cached object, whose state may no
    /// longer match the database.
    pub fn rollback(&mut self) -> Result<(), RuntimeError> {
        self.cache.clear();
        self.driver.rollback()
    }

    /// The cached instance of `class` with the given id, if any.
    pub fn cached(&self, class: ClassId, id: &[Value]) -> Option<ObjectRef> {
        let key = self.cache_key(class, id).ok()?;
        self.cache.get(&key).cloned()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // -----------------------------------------------------------------------
    // Object operations
    // -----------------------------------------------------------------------

    /// A new, empty object of `class`.
    pub fn create(&self, class: ClassId) -> Result<ObjectRef, RuntimeError> {
        let ops = self.registry.ops(class)?;
        Ok((ops.create)(class).into_ref())
    }

    /// Inserts the object as its dynamic class, assigning its id if the
    /// database generates it and setting its version to 1.
    pub fn persist(&mut self, object: &ObjectRef) -> Result<(), RuntimeError> {
        self.top_level(|s| {
            let ops = s.registry.ops(object.borrow().class())?;
            (ops.persist)(s, object)
        })
    }

    /// Writes every level of the object and bumps its version.
    pub fn update(&mut self, object: &ObjectRef) -> Result<(), RuntimeError> {
        self.top_level(|s| {
            let ops = s.registry.ops(object.borrow().class())?;
            (ops.update)(s, object)
        })
    }

    pub fn erase(&mut self, object: &ObjectRef) -> Result<(), RuntimeError> {
        self.top_level(|s| {
            let ops = s.registry.ops(object.borrow().class())?;
            (ops.erase)(s, object)
        })
    }

    /// Loads the object of `class` (or a class derived from it) with the
    /// given id; `None` if there is no such row.
    pub fn find(&mut self, class: ClassId, id: &[Value]) -> Result<Option<ObjectRef>, RuntimeError> {
        self.top_level(|s| s.find_inner(class, id))
    }

    /// Like [`find`](Self::find) but a missing row is an error.
    pub fn load(&mut self, class: ClassId, id: &[Value]) -> Result<ObjectRef, RuntimeError> {
        self.top_level(|s| {
            s.find_inner(class, id)?
                .ok_or_else(|| s.not_persistent(class, id))
        })
    }

    /// Erases by id. The object is loaded first to learn its dynamic class.
    pub fn erase_by_id(&mut self, class: ClassId, id: &[Value]) -> Result<(), RuntimeError> {
        self.top_level(|s| {
            let object = s
                .find_inner(class, id)?
                .ok_or_else(|| s.not_persistent(class, id))?;
            let ops = s.registry.ops(object.borrow().class())?;
            (ops.erase)(s, &object)
        })
    }

    /// Objects of `class` matching `condition`, a SQL boolean expression
    /// over the class's columns using the dialect's placeholders for
    /// `params`. An empty condition selects everything.
    pub fn query(
        &mut self,
        class: ClassId,
        condition: &str,
        params: &[Value],
    ) -> Result<Vec<ObjectRef>, RuntimeError> {
        self.top_level(|s| {
            let ops = s.registry.ops(class)?;
            (ops.query)(s, class, condition, params)
        })
    }

    /// Deletes the rows matching `condition` and returns how many objects
    /// went. Container rows follow through ON DELETE CASCADE; polymorphic
    /// classes are queried and erased one by one.
    pub fn erase_query(
        &mut self,
        class: ClassId,
        condition: &str,
        params: &[Value],
    ) -> Result<u64, RuntimeError> {
        self.top_level(|s| {
            let cp = s.class_plan(class)?;
            if let Some(stmt) = &cp.erase_query {
                let sql = with_condition(&stmt.sql, condition);
                let (result, _) = s.exec(class, stmt, condition, &sql, &[], params)?;
                let root = root_of(cp);
                s.cache.retain(|(r, _), _| *r != root);
                debug!(class = %cp.name, erased = result.affected, "erase query");
                return Ok(result.affected);
            }
            let query = s.registry.ops(class)?.query;
            let objects = query(s, class, condition, params)?;
            for object in &objects {
                let ops = s.registry.ops(object.borrow().class())?;
                (ops.erase)(s, object)?;
            }
            Ok(objects.len() as u64)
        })
    }

    /// Resolves a lazy pointer member in place and returns its target.
    pub fn load_lazy(
        &mut self,
        object: &ObjectRef,
        member: &str,
    ) -> Result<Option<ObjectRef>, RuntimeError> {
        self.top_level(|s| {
            let pointer = object.borrow().pointer(member).cloned();
            match pointer {
                Some(Pointer::Lazy { class, id }) => {
                    let target = s
                        .find_inner(class, &id)?
                        .ok_or_else(|| s.not_persistent(class, &id))?;
                    object.borrow_mut().set(member, Pointer::to(&target));
                    Ok(Some(target))
                }
                Some(pointer) => Ok(pointer.get()),
                None => Ok(None),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Call framing
    // -----------------------------------------------------------------------

    fn top_level<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        self.depth += 1;
        let result = op(self);
        self.depth -= 1;
        if self.depth > 0 {
            return result;
        }

        let result = match result {
            Ok(value) => self.drain_delayed().map(|_| value),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.delayed.clear();
            self.locked.clear();
            // Objects loaded by a failed call may be half initialized.
            for key in self.loaded.drain(..) {
                self.cache.remove(&key);
            }
        }
        self.loaded.clear();

        let weak = std::mem::take(&mut self.weak);
        if self.options.cache_mode == CacheMode::Transient {
            self.cache.clear();
        }
        let value = result?;
        if let Some((class, _)) = weak.iter().find(|(_, w)| w.upgrade().is_none()) {
            return Err(RuntimeError::SessionRequired {
                class: self.class_name(*class),
            });
        }
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    pub(crate) fn find_inner(
        &mut self,
        class: ClassId,
        id: &[Value],
    ) -> Result<Option<ObjectRef>, RuntimeError> {
        let ops = self.registry.ops(class)?;
        (ops.find)(self, class, id)
    }

    /// Loads the row of `class` into `object`. Returns false if missing.
    fn load_into(&mut self, class: ClassId, id: &[Value], object: &ObjectRef) -> Result<bool, RuntimeError> {
        let cp = self.class_plan(class)?;
        let Some(find) = &cp.find else {
            return Err(unsupported(cp, "find"));
        };
        self.locked.insert(class);
        trace!(class = %cp.name, id = %display_id(id), "load");
        let result = self.load_locked(cp, find, id, object);
        self.locked.remove(&class);
        result
    }

    fn load_locked(
        &mut self,
        cp: &ClassPlan,
        find: &StatementPlan,
        id: &[Value],
        object: &ObjectRef,
    ) -> Result<bool, RuntimeError> {
        let Some(row) = self.select(cp.class, find, "", id)?.into_iter().next() else {
            return Ok(false);
        };
        self.populate(cp, object, &find.results, row, id)?;
        Ok(true)
    }

    /// Initializes `object` from a find or query row of `cp`, then loads
    /// deeper levels, containers and inverse pointers.
    fn populate(
        &mut self,
        cp: &ClassPlan,
        object: &ObjectRef,
        results: &[Slot],
        row: Vec<Value>,
        id: &[Value],
    ) -> Result<(), RuntimeError> {
        let dynamic = self.dynamic_class(cp, results, &row)?;
        object.borrow_mut().set_class(dynamic);
        self.init_fields(object, results, row)?;
        if dynamic != cp.class {
            let ops = self.registry.ops(dynamic)?;
            (ops.dispatch)(self, object, cp.class)?;
        }
        self.load_relations(object, dynamic, id)
    }

    fn dynamic_class(&self, cp: &ClassPlan, results: &[Slot], row: &[Value]) -> Result<ClassId, RuntimeError> {
        let Some(poly) = &cp.polymorphic else {
            return Ok(cp.class);
        };
        let stored = results
            .iter()
            .position(|s| s.role == SlotRole::Discriminator)
            .and_then(|i| row.get(i))
            .cloned()
            .unwrap_or_default();
        let unknown = || RuntimeError::UnknownDiscriminator {
            root: self.class_name(poly.root),
            value: stored.to_string(),
        };
        let Value::Text(value) = &stored else {
            return Err(unknown());
        };
        let dynamic = self.registry.resolve(poly.root, value).ok_or_else(unknown)?;
        // The stored class must be the static class or below it.
        if !chain_of(self.class_plan(dynamic)?).contains(&cp.class) {
            return Err(unknown());
        }
        Ok(dynamic)
    }

    /// Stores a row's values into the object, resolving pointers.
    pub(crate) fn init_fields(
        &mut self,
        object: &ObjectRef,
        slots: &[Slot],
        row: Vec<Value>,
    ) -> Result<(), RuntimeError> {
        let owner = self.class_name(object.borrow().class());
        for (slot, value) in slots.iter().zip(row) {
            let field = match slot.role {
                SlotRole::Pointer => self.resolve_pointer(&owner, slot, value)?,
                _ => Field::Value(value),
            };
            object.borrow_mut().set_path(&slot.path, field);
        }
        Ok(())
    }

    /// Turns a stored foreign id into a pointer field.
    pub(crate) fn resolve_pointer(
        &mut self,
        owner: &str,
        slot: &Slot,
        value: Value,
    ) -> Result<Field, RuntimeError> {
        let Some(target) = slot.target else {
            return Ok(Field::Value(value));
        };
        if value.is_null() {
            if !slot.nullable {
                return Err(RuntimeError::NullPointer {
                    class: owner.to_string(),
                    member: slot.member.clone(),
                });
            }
            return Ok(Field::Pointer(Pointer::Null));
        }
        let id = vec![value];
        if slot.lazy {
            return Ok(Field::Pointer(Pointer::Lazy { class: target, id }));
        }
        let object = self
            .find_inner(target, &id)?
            .ok_or_else(|| self.not_persistent(target, &id))?;
        if slot.weak {
            self.weak.push((target, Rc::downgrade(&object)));
            return Ok(Field::Pointer(Pointer::weak(&object)));
        }
        Ok(Field::Pointer(Pointer::Strong(object)))
    }

    fn load_relations(&mut self, object: &ObjectRef, class: ClassId, id: &[Value]) -> Result<(), RuntimeError> {
        for level in chain_of(self.class_plan(class)?) {
            let lp = self.class_plan(level)?;
            for container in &lp.containers {
                self.load_container(level, container, object, id)?;
            }
            for inverse in &lp.inverse_pointers {
                let row = self
                    .select(level, &inverse.select, &inverse.member, id)?
                    .into_iter()
                    .next();
                let field = match (row.and_then(|r| r.into_iter().next()), inverse.select.results.first()) {
                    (Some(value), Some(slot)) => {
                        let owner = self.class_name(class);
                        self.resolve_pointer(&owner, slot, value)?
                    }
                    _ => Field::Pointer(Pointer::Null),
                };
                object.borrow_mut().set(&inverse.member, field);
            }
        }
        Ok(())
    }

    fn drain_delayed(&mut self) -> Result<(), RuntimeError> {
        loop {
            let pending = std::mem::take(&mut self.delayed);
            if pending.is_empty() {
                return Ok(());
            }
            let mut waiting = Vec::new();
            let mut progressed = false;
            for delayed in pending {
                if self.locked.contains(&delayed.class) {
                    waiting.push(delayed);
                    continue;
                }
                progressed = true;
                trace!(class = ?delayed.class, id = %display_id(&delayed.id), "delayed load");
                if !self.load_into(delayed.class, &delayed.id, &delayed.object)? {
                    return Err(self.not_persistent(delayed.class, &delayed.id));
                }
            }
            waiting.append(&mut self.delayed);
            self.delayed = waiting;
            if !progressed {
                return Ok(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Statement execution
    // -----------------------------------------------------------------------

    /// Runs a statement through the cache; rows are drained when the plan
    /// has results.
    pub(crate) fn exec(
        &mut self,
        class: ClassId,
        stmt: &StatementPlan,
        detail: &str,
        sql: &str,
        values: &[Value],
        extra: &[Value],
    ) -> Result<(ExecResult, Vec<Vec<Value>>), RuntimeError> {
        let key = StatementKey::new(class, stmt.kind, detail);
        let cached = self
            .statements
            .get_or_prepare(self.driver.as_mut(), key, stmt, sql, &self.options)?;
        let result = binding::execute(self.driver.as_mut(), cached, values, extra, &self.options)?;
        if stmt.results.is_empty() {
            return Ok((result, Vec::new()));
        }
        let rows = binding::fetch_all(self.driver.as_mut(), cached, self.options.max_capacity)?;
        Ok((result, rows))
    }

    pub(crate) fn run(
        &mut self,
        class: ClassId,
        stmt: &StatementPlan,
        detail: &str,
        values: &[Value],
    ) -> Result<ExecResult, RuntimeError> {
        Ok(self.exec(class, stmt, detail, &stmt.sql, values, &[])?.0)
    }

    pub(crate) fn select(
        &mut self,
        class: ClassId,
        stmt: &StatementPlan,
        detail: &str,
        values: &[Value],
    ) -> Result<Vec<Vec<Value>>, RuntimeError> {
        Ok(self.exec(class, stmt, detail, &stmt.sql, values, &[])?.1)
    }

    // -----------------------------------------------------------------------
    // Object <-> image values
    // -----------------------------------------------------------------------

    pub(crate) fn class_plan(&self, class: ClassId) -> Result<&'p ClassPlan, RuntimeError> {
        let plan: &'p Plan = self.plan;
        plan.class(class).ok_or(RuntimeError::UnknownClass(class))
    }

    pub(crate) fn class_name(&self, class: ClassId) -> String {
        self.plan
            .class(class)
            .map_or_else(|| format!("{class:?}"), |c| c.name.clone())
    }

    fn cache_key(&self, class: ClassId, id: &[Value]) -> Result<CacheKey, RuntimeError> {
        Ok((root_of(self.class_plan(class)?), id_key(id)))
    }

    /// Caches an object before its load starts.
    fn cache_loading(&mut self, key: CacheKey, object: &ObjectRef) {
        self.cache.insert(key.clone(), Rc::clone(object));
        self.loaded.push(key);
    }

    pub(crate) fn not_persistent(&self, class: ClassId, id: &[Value]) -> RuntimeError {
        RuntimeError::NotPersistent {
            class: self.class_name(class),
            id: display_id(id),
        }
    }

    /// Id values of an object, read through its class's id slots.
    pub(crate) fn id_values(&self, object: &Object) -> Result<Vec<Value>, RuntimeError> {
        let cp = self.class_plan(object.class())?;
        cp.id
            .iter()
            .map(|slot| match object.get_path(&slot.path) {
                Some(Field::Value(v)) if !v.is_null() => Ok(v.clone()),
                _ => Err(RuntimeError::InvalidField {
                    class: cp.name.clone(),
                    member: slot.member.clone(),
                    reason: "object has no id".to_string(),
                }),
            })
            .collect()
    }

    /// Parameter values for `slots` read from the object.
    pub(crate) fn slot_values(&self, object: &Object, slots: &[Slot]) -> Result<Vec<Value>, RuntimeError> {
        let cp = self.class_plan(object.class())?;
        slots
            .iter()
            .map(|slot| {
                if slot.role == SlotRole::Discriminator {
                    let value = cp
                        .polymorphic
                        .as_ref()
                        .map(|p| p.discriminator_value.clone())
                        .unwrap_or_default();
                    return Ok(Value::Text(value));
                }
                self.field_value(&cp.name, slot, object.get_path(&slot.path))
            })
            .collect()
    }

    /// Values for element slots read from a container element.
    pub(crate) fn element_values(
        &self,
        owner: &str,
        element: &Field,
        slots: &[Slot],
    ) -> Result<Vec<Value>, RuntimeError> {
        slots
            .iter()
            .map(|slot| {
                let leaf = match element {
                    _ if slot.path.is_empty() => Some(element),
                    Field::Composite(fields) => get_path(fields, &slot.path),
                    _ => None,
                };
                self.field_value(owner, slot, leaf)
            })
            .collect()
    }

    fn field_value(&self, owner: &str, slot: &Slot, field: Option<&Field>) -> Result<Value, RuntimeError> {
        let value = match field {
            None => Value::Null,
            Some(Field::Value(v)) => v.clone(),
            Some(Field::Pointer(p)) => self.pointer_id(p)?,
            Some(_) => {
                return Err(RuntimeError::InvalidField {
                    class: owner.to_string(),
                    member: slot.member.clone(),
                    reason: format!("column '{}' needs a value or pointer", slot.column),
                })
            }
        };
        if slot.target.is_some() && value.is_null() && !slot.nullable {
            return Err(RuntimeError::NullPointer {
                class: owner.to_string(),
                member: slot.member.clone(),
            });
        }
        Ok(value)
    }

    fn pointer_id(&self, pointer: &Pointer) -> Result<Value, RuntimeError> {
        match pointer {
            Pointer::Null => Ok(Value::Null),
            Pointer::Lazy { id, .. } => Ok(id.first().cloned().unwrap_or_default()),
            Pointer::Strong(_) | Pointer::Weak(_) => match pointer.get() {
                Some(target) => {
                    let id = self.id_values(&target.borrow())?;
                    Ok(id.into_iter().next().unwrap_or_default())
                }
                None => Ok(Value::Null),
            },
        }
    }

    /// `Changed` if the row still exists under another version, otherwise
    /// `NotPersistent`.
    fn missing_or_changed(&mut self, lp: &ClassPlan, id: &[Value]) -> Result<RuntimeError, RuntimeError> {
        if let Some(stmt) = &lp.find_version {
            if !self.select(lp.class, stmt, "", id)?.is_empty() {
                return Ok(RuntimeError::Changed {
                    class: lp.name.clone(),
                    id: display_id(id),
                });
            }
        }
        Ok(self.not_persistent(lp.class, id))
    }
}

// ---------------------------------------------------------------------------
// Standard class operations
// ---------------------------------------------------------------------------

fn chain_of(cp: &ClassPlan) -> Vec<ClassId> {
    cp.polymorphic
        .as_ref()
        .map_or_else(|| vec![cp.class], |p| p.chain.clone())
}

fn root_of(cp: &ClassPlan) -> ClassId {
    cp.polymorphic.as_ref().map_or(cp.class, |p| p.root)
}

fn with_condition(sql: &str, condition: &str) -> String {
    if condition.trim().is_empty() {
        sql.to_string()
    } else {
        format!("{sql} WHERE {condition}")
    }
}

fn unsupported(cp: &ClassPlan, operation: &'static str) -> RuntimeError {
    RuntimeError::Unsupported {
        class: cp.name.clone(),
        operation,
    }
}

fn check_concrete(cp: &ClassPlan, operation: &'static str) -> Result<(), RuntimeError> {
    if cp.view {
        return Err(unsupported(cp, operation));
    }
    if cp.is_abstract {
        return Err(RuntimeError::AbstractClass {
            class: cp.name.clone(),
        });
    }
    Ok(())
}

fn version_of(object: &Object, slot: &Slot) -> Value {
    object
        .get_path(&slot.path)
        .and_then(Field::as_value)
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn persist_object(s: &mut Session<'_>, object: &ObjectRef) -> Result<(), RuntimeError> {
    let class = object.borrow().class();
    let cp = s.class_plan(class)?;
    check_concrete(cp, "persist")?;
    let chain = chain_of(cp);

    for &level in &chain {
        let lp = s.class_plan(level)?;
        let Some(stmt) = &lp.persist else { continue };
        let values = s.slot_values(&object.borrow(), &stmt.params)?;
        let (result, rows) = match s.exec(level, stmt, "", &stmt.sql, &values, &[]) {
            Err(e) if e.is_duplicate_key() => {
                let id = s.id_values(&object.borrow()).unwrap_or_default();
                return Err(RuntimeError::AlreadyPersistent {
                    class: cp.name.clone(),
                    id: display_id(&id),
                });
            }
            other => other?,
        };
        if lp.auto_id {
            let generated = match rows.into_iter().next().and_then(|r| r.into_iter().next()) {
                Some(value) => value,
                None => result.last_insert_id.map_or(Value::Null, Value::Int),
            };
            if let Some(slot) = lp.id.first() {
                object.borrow_mut().set_path(&slot.path, Field::Value(generated));
            }
        }
        if let Some(version) = &lp.version {
            object.borrow_mut().set_path(&version.path, Field::Value(Value::Int(1)));
        }
    }

    let id = s.id_values(&object.borrow())?;
    for &level in &chain {
        for container in s.class_plan(level)?.containers.iter().filter(|c| !c.inverse) {
            s.persist_container(level, container, object, &id)?;
        }
    }

    let key = s.cache_key(class, &id)?;
    s.cache.insert(key, Rc::clone(object));
    debug!(class = %cp.name, id = %display_id(&id), "persisted");
    Ok(())
}

pub(crate) fn find_object(
    s: &mut Session<'_>,
    class: ClassId,
    id: &[Value],
) -> Result<Option<ObjectRef>, RuntimeError> {
    let key = s.cache_key(class, id)?;
    if let Some(object) = s.cache.get(&key).cloned() {
        // Keyed by root: the cached object may sit above `class`.
        let dynamic = object.borrow().class();
        if dynamic != class && !chain_of(s.class_plan(dynamic)?).contains(&class) {
            return Ok(None);
        }
        return Ok(Some(object));
    }

    let create = s.registry.ops(class)?.create;
    let object = create(class).into_ref();
    s.cache_loading(key.clone(), &object);

    if s.locked.contains(&class) {
        trace!(class = %s.class_name(class), id = %display_id(id), "delaying load");
        s.delayed.push(Delayed {
            class,
            id: id.to_vec(),
            object: Rc::clone(&object),
        });
        return Ok(Some(object));
    }

    match s.load_into(class, id, &object) {
        Ok(true) => {}
        Ok(false) => {
            s.cache.remove(&key);
            return Ok(None);
        }
        Err(e) => {
            s.cache.remove(&key);
            return Err(e);
        }
    }
    s.drain_delayed()?;
    Ok(Some(object))
}

/// Loads the levels of `object`'s dynamic class below `from`.
pub(crate) fn load_levels(s: &mut Session<'_>, object: &ObjectRef, from: ClassId) -> Result<(), RuntimeError> {
    let dynamic = s.class_plan(object.borrow().class())?;
    let (Some(to), Some(from)) = (&dynamic.polymorphic, &s.class_plan(from)?.polymorphic) else {
        return Ok(());
    };
    let id = s.id_values(&object.borrow())?;
    for &level in from.extra_levels(&to.chain) {
        let lp = s.class_plan(level)?;
        let Some(stmt) = &lp.find_level else { continue };
        let row = s
            .select(level, stmt, "", &id)?
            .into_iter()
            .next()
            .ok_or_else(|| s.not_persistent(level, &id))?;
        s.init_fields(object, &stmt.results, row)?;
    }
    Ok(())
}

pub(crate) fn update_object(s: &mut Session<'_>, object: &ObjectRef) -> Result<(), RuntimeError> {
    let class = object.borrow().class();
    let cp = s.class_plan(class)?;
    check_concrete(cp, "update")?;
    let id = s.id_values(&object.borrow())?;
    let chain = chain_of(cp);

    let mut version = None;
    for &level in &chain {
        let lp = s.class_plan(level)?;
        version = version.or(lp.version.as_ref());
        let Some(stmt) = &lp.update else { continue };
        let values = s.slot_values(&object.borrow(), &stmt.params)?;
        if s.run(level, stmt, "", &values)?.affected == 0 {
            return Err(s.missing_or_changed(lp, &id)?);
        }
    }
    if let Some(slot) = version {
        let mut object = object.borrow_mut();
        let next = version_of(&object, slot).as_int().unwrap_or(0) + 1;
        object.set_path(&slot.path, Field::Value(Value::Int(next)));
    }

    for &level in &chain {
        for container in s.class_plan(level)?.containers.iter().filter(|c| !c.inverse) {
            s.update_container(level, container, object, &id)?;
        }
    }
    debug!(class = %cp.name, id = %display_id(&id), "updated");
    Ok(())
}

pub(crate) fn erase_object(s: &mut Session<'_>, object: &ObjectRef) -> Result<(), RuntimeError> {
    let class = object.borrow().class();
    let cp = s.class_plan(class)?;
    check_concrete(cp, "erase")?;
    let id = s.id_values(&object.borrow())?;
    let chain = chain_of(cp);

    // Check the root's version before touching any level.
    let root = s.class_plan(root_of(cp))?;
    if let (Some(slot), Some(stmt)) = (&root.version, &root.find_version) {
        let expected = version_of(&object.borrow(), slot);
        match s.select(root.class, stmt, "", &id)?.into_iter().next() {
            None => return Err(s.not_persistent(class, &id)),
            Some(row) if row.first() != Some(&expected) => {
                return Err(RuntimeError::Changed {
                    class: cp.name.clone(),
                    id: display_id(&id),
                })
            }
            Some(_) => {}
        }
    }

    for &level in chain.iter().rev() {
        for container in s.class_plan(level)?.containers.iter().filter(|c| !c.inverse) {
            s.erase_container(level, container, &id)?;
        }
    }
    for &level in chain.iter().rev() {
        let lp = s.class_plan(level)?;
        let (stmt, values) = match (&lp.optimistic_erase, &lp.version) {
            (Some(stmt), Some(slot)) => {
                let mut values = id.clone();
                values.push(version_of(&object.borrow(), slot));
                (stmt, values)
            }
            _ => match &lp.erase {
                Some(stmt) => (stmt, id.clone()),
                None => continue,
            },
        };
        if s.run(level, stmt, "", &values)?.affected == 0 {
            return Err(s.missing_or_changed(lp, &id)?);
        }
    }

    let key = s.cache_key(class, &id)?;
    s.cache.remove(&key);
    debug!(class = %cp.name, id = %display_id(&id), "erased");
    Ok(())
}

pub(crate) fn query_objects(
    s: &mut Session<'_>,
    class: ClassId,
    condition: &str,
    params: &[Value],
) -> Result<Vec<ObjectRef>, RuntimeError> {
    let cp = s.class_plan(class)?;
    let sql = with_condition(&cp.query.sql, condition);
    let (_, rows) = s.exec(class, &cp.query, condition, &sql, &[], params)?;

    if cp.view {
        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let object = Object::new(class).into_ref();
            s.init_fields(&object, &cp.query.results, row)?;
            objects.push(object);
        }
        return Ok(objects);
    }

    let id_positions: Vec<usize> = cp
        .query
        .results
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.role == SlotRole::Id)
        .map(|(i, _)| i)
        .collect();

    s.locked.insert(class);
    let result = populate_rows(s, cp, rows, &id_positions);
    s.locked.remove(&class);
    let objects = result?;
    s.drain_delayed()?;
    Ok(objects)
}

fn populate_rows(
    s: &mut Session<'_>,
    cp: &ClassPlan,
    rows: Vec<Vec<Value>>,
    id_positions: &[usize],
) -> Result<Vec<ObjectRef>, RuntimeError> {
    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        let id: Vec<Value> = id_positions
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or_default())
            .collect();
        let key = s.cache_key(cp.class, &id)?;
        if let Some(object) = s.cache.get(&key) {
            objects.push(Rc::clone(object));
            continue;
        }
        let object = Object::new(cp.class).into_ref();
        s.cache_loading(key.clone(), &object);
        if let Err(e) = s.populate(cp, &object, &cp.query.results, row, &id) {
            s.cache.remove(&key);
            return Err(e);
        }
        objects.push(object);
    }
    Ok(objects)
}
