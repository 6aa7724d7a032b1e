//! End-to-end session behavior against SQLite.

mod common;

use std::rc::Rc;

use ormc_core::{ClassId, ContainerShape, ElementType, Member, Model, PersistentClass, PointerKind, SqlType};
use ormc_plan::StatementKind;
use ormc_runtime::{
    CacheMode, ContainerValue, Field, ObjectRef, Pointer, RuntimeError, RuntimeOptions,
    SqliteDriver, StatementKey, Value,
};
use rusqlite::Connection;

use common::{count_prefix, Fixture, Recording};

fn text_of(object: &ObjectRef, member: &str) -> String {
    object
        .borrow()
        .value(member)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn strings(container: Option<&ContainerValue>) -> Vec<String> {
    container
        .map(|c| {
            c.values()
                .filter_map(|f| f.as_value().and_then(|v| v.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn target(object: &ObjectRef, member: &str) -> Option<ObjectRef> {
    object.borrow().pointer(member).and_then(Pointer::get)
}

fn person_model() -> (Model, ClassId) {
    let mut model = Model::new();
    let person = model
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
    (model, person)
}

fn animal_model() -> (Model, ClassId, ClassId) {
    let mut model = Model::new();
    let animal = model
        .add_class(
            PersistentClass::object("Animal")
                .member(Member::auto_id("id"))
                .member(Member::version("version"))
                .member(Member::simple("name", SqlType::Text))
                .polymorphic_root(),
        )
        .unwrap();
    let dog = model
        .add_class(
            PersistentClass::object("Dog")
                .derives(animal, true)
                .member(Member::simple("breed", SqlType::Text)),
        )
        .unwrap();
    (model, animal, dog)
}

/// `A.b -> B` and `B.a -> A`.
fn cycle_model() -> (Model, ClassId, ClassId) {
    let mut model = Model::new();
    let a = model
        .add_class(
            PersistentClass::object("A")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::simple("name", SqlType::Text))
                .member(Member::pointer("b", ClassId(1))),
        )
        .unwrap();
    let b = model
        .add_class(
            PersistentClass::object("B")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::pointer("a", a)),
        )
        .unwrap();
    (model, a, b)
}

fn new_person(fx: &Fixture, session: &ormc_runtime::Session<'_>, id: i64, name: &str, phones: &[&str]) -> ObjectRef {
    let class = fx.model.class_by_name("Person").unwrap();
    let person = session.create(class).unwrap();
    person
        .borrow_mut()
        .set("id", id)
        .set("name", name)
        .set("phones", ContainerValue::from_values(phones.iter().copied()));
    person
}

// ---------------------------------------------------------------------------
// Persist and load
// ---------------------------------------------------------------------------

#[test]
fn person_with_phones_round_trips_through_a_file() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    fx.create_file(&path);

    let mut session = fx.session(SqliteDriver::open(&path).unwrap());
    let ann = new_person(&fx, &session, 1, "Ann", &["555", "556"]);
    session.persist(&ann).unwrap();

    let conn = Connection::open(&path).unwrap();
    let name: String = conn
        .query_row(r#"SELECT "name" FROM "person" WHERE "id" = 1"#, [], |r| r.get(0))
        .unwrap();
    assert_eq!(name, "Ann");
    let mut stmt = conn
        .prepare(r#"SELECT "object_id", "index", "value" FROM "person_phones" ORDER BY "index""#)
        .unwrap();
    let rows: Vec<(i64, i64, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        rows,
        vec![(1, 0, "555".to_string()), (1, 1, "556".to_string())]
    );

    session.clear_cache();
    let loaded = session.find(person, &[Value::Int(1)]).unwrap().unwrap();
    assert!(!Rc::ptr_eq(&loaded, &ann));
    assert_eq!(text_of(&loaded, "name"), "Ann");
    assert_eq!(strings(loaded.borrow().container("phones")), vec!["555", "556"]);
}

#[test]
fn find_returns_the_cached_instance() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());
    let ann = new_person(&fx, &session, 1, "Ann", &[]);
    session.persist(&ann).unwrap();

    let found = session.find(person, &[Value::Int(1)]).unwrap().unwrap();
    assert!(Rc::ptr_eq(&found, &ann));
    assert!(session.find(person, &[Value::Int(2)]).unwrap().is_none());
    assert!(matches!(
        session.load(person, &[Value::Int(2)]),
        Err(RuntimeError::NotPersistent { .. })
    ));
}

#[test]
fn persisting_twice_is_a_duplicate() {
    let (model, _) = person_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());
    let ann = new_person(&fx, &session, 1, "Ann", &["555"]);
    session.persist(&ann).unwrap();

    let err = session.persist(&ann).unwrap_err();
    assert!(matches!(err, RuntimeError::AlreadyPersistent { ref class, .. } if class == "Person"));
}

#[test]
fn rollback_forgets_cached_objects() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    session.begin().unwrap();
    let ann = new_person(&fx, &session, 1, "Ann", &["555"]);
    session.persist(&ann).unwrap();
    assert!(session.cached(person, &[Value::Int(1)]).is_some());
    session.rollback().unwrap();

    assert!(session.cached(person, &[Value::Int(1)]).is_none());
    assert!(session.find(person, &[Value::Int(1)]).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Polymorphism
// ---------------------------------------------------------------------------

#[test]
fn derived_object_is_stored_per_level_and_loaded_as_itself() {
    let (model, animal, dog) = animal_model();
    let fx = Fixture::new(model);
    let (driver, log) = Recording::new(fx.memory_driver());
    let mut session = fx.session(driver);

    let rex = session.create(dog).unwrap();
    rex.borrow_mut().set("name", "Rex").set("breed", "collie");
    session.persist(&rex).unwrap();

    assert_eq!(count_prefix(&log, r#"INSERT INTO "animal""#), 1);
    assert_eq!(count_prefix(&log, r#"INSERT INTO "dog""#), 1);
    let id = rex.borrow().value("id").cloned().unwrap();
    assert!(matches!(id, Value::Int(_)));
    assert_eq!(rex.borrow().value("version"), Some(&Value::Int(1)));

    session.clear_cache();
    let loaded = session.find(animal, &[id.clone()]).unwrap().unwrap();
    assert_eq!(loaded.borrow().class(), dog);
    assert_eq!(text_of(&loaded, "name"), "Rex");
    assert_eq!(text_of(&loaded, "breed"), "collie");

    // Erase goes through the dynamic class: derived level first.
    session.erase(&loaded).unwrap();
    let deletes: Vec<String> = log
        .borrow()
        .iter()
        .filter(|s| s.starts_with("DELETE"))
        .cloned()
        .collect();
    assert_eq!(deletes.len(), 2);
    assert!(deletes[0].starts_with(r#"DELETE FROM "dog""#));
    assert!(deletes[1].starts_with(r#"DELETE FROM "animal""#));
    assert!(session.find(animal, &[id]).unwrap().is_none());
}

#[test]
fn cached_base_object_is_not_found_as_derived() {
    let (model, animal, dog) = animal_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    let cat = session.create(animal).unwrap();
    cat.borrow_mut().set("name", "Tom");
    session.persist(&cat).unwrap();
    let rex = session.create(dog).unwrap();
    rex.borrow_mut().set("name", "Rex").set("breed", "collie");
    session.persist(&rex).unwrap();
    let cat_id = cat.borrow().value("id").cloned().unwrap();
    let rex_id = rex.borrow().value("id").cloned().unwrap();

    // Same answers whether the objects are cached or not.
    for cached in [true, false] {
        if !cached {
            session.clear_cache();
        }
        assert!(session.find(dog, &[cat_id.clone()]).unwrap().is_none());
        let found = session.find(animal, &[cat_id.clone()]).unwrap().unwrap();
        assert_eq!(found.borrow().class(), animal);
        let found = session.find(animal, &[rex_id.clone()]).unwrap().unwrap();
        assert_eq!(found.borrow().class(), dog);
        assert!(session.find(dog, &[rex_id.clone()]).unwrap().is_some());
    }
}

#[test]
fn derived_update_checks_and_bumps_the_root_version() {
    let (model, _, dog) = animal_model();
    let fx = Fixture::new(model);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zoo.db");
    fx.create_file(&path);
    let mut session = fx.session(SqliteDriver::open(&path).unwrap());

    let rex = session.create(dog).unwrap();
    rex.borrow_mut().set("name", "Rex").set("breed", "collie");
    session.persist(&rex).unwrap();
    rex.borrow_mut().set("breed", "pug");
    session.update(&rex).unwrap();
    assert_eq!(rex.borrow().value("version"), Some(&Value::Int(2)));

    let conn = Connection::open(&path).unwrap();
    let stored: i64 = conn
        .query_row(r#"SELECT "version" FROM "animal""#, [], |r| r.get(0))
        .unwrap();
    assert_eq!(stored, 2);

    conn.execute(r#"UPDATE "animal" SET "version" = "version" + 1"#, [])
        .unwrap();
    rex.borrow_mut().set("breed", "beagle");
    let err = session.update(&rex).unwrap_err();
    assert!(matches!(err, RuntimeError::Changed { .. }), "{err}");
    let err = session.erase(&rex).unwrap_err();
    assert!(matches!(err, RuntimeError::Changed { .. }), "{err}");

    let breed: String = conn
        .query_row(r#"SELECT "breed" FROM "dog""#, [], |r| r.get(0))
        .unwrap();
    assert_eq!(breed, "pug");
}

#[test]
fn abstract_class_cannot_be_persisted() {
    let mut model = Model::new();
    let shape = model
        .add_class(
            PersistentClass::object("Shape")
                .member(Member::auto_id("id"))
                .polymorphic_root()
                .abstract_class(),
        )
        .unwrap();
    model
        .add_class(
            PersistentClass::object("Circle")
                .derives(shape, true)
                .member(Member::simple("radius", SqlType::Double)),
        )
        .unwrap();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    let object = session.create(shape).unwrap();
    let err = session.persist(&object).unwrap_err();
    assert!(matches!(err, RuntimeError::AbstractClass { ref class } if class == "Shape"));
}

// ---------------------------------------------------------------------------
// Pointers
// ---------------------------------------------------------------------------

#[test]
fn cyclic_pointers_load_to_the_same_instances() {
    let (model, a, b) = cycle_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    let a1 = session.create(a).unwrap();
    let b1 = session.create(b).unwrap();
    a1.borrow_mut().set("id", 1i64).set("name", "first").set("b", Pointer::to(&b1));
    b1.borrow_mut().set("id", 1i64).set("a", Pointer::to(&a1));
    session.begin().unwrap();
    session.persist(&a1).unwrap();
    session.persist(&b1).unwrap();
    session.commit().unwrap();

    session.clear_cache();
    let loaded = session.find(a, &[Value::Int(1)]).unwrap().unwrap();
    let b_loaded = target(&loaded, "b").unwrap();
    let back = target(&b_loaded, "a").unwrap();
    assert!(Rc::ptr_eq(&loaded, &back));
    assert_eq!(text_of(&back, "name"), "first");
}

#[test]
fn load_of_a_locked_class_is_delayed_until_release() {
    let (model, a, b) = cycle_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    // A1 -> B2 -> A3, and A3 points nowhere.
    let a1 = session.create(a).unwrap();
    let b2 = session.create(b).unwrap();
    let a3 = session.create(a).unwrap();
    a1.borrow_mut().set("id", 1i64).set("name", "one").set("b", Pointer::to(&b2));
    b2.borrow_mut().set("id", 2i64).set("a", Pointer::to(&a3));
    a3.borrow_mut().set("id", 3i64).set("name", "three").set("b", Pointer::Null);
    session.begin().unwrap();
    for object in [&a3, &b2, &a1] {
        session.persist(object).unwrap();
    }
    session.commit().unwrap();

    session.clear_cache();
    let loaded = session.find(a, &[Value::Int(1)]).unwrap().unwrap();
    let third = target(&target(&loaded, "b").unwrap(), "a").unwrap();
    assert_eq!(text_of(&third, "name"), "three");
    assert!(third.borrow().pointer("b").unwrap().is_null());
    let cached = session.cached(a, &[Value::Int(3)]).unwrap();
    assert!(Rc::ptr_eq(&cached, &third));
}

#[test]
fn failed_delayed_load_leaves_nothing_cached() {
    let (model, a, b) = cycle_model();
    let fx = Fixture::new(model);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycle.db");
    fx.create_file(&path);
    {
        let mut session = fx.session(SqliteDriver::open(&path).unwrap());
        let a1 = session.create(a).unwrap();
        let b2 = session.create(b).unwrap();
        let a3 = session.create(a).unwrap();
        a1.borrow_mut().set("id", 1i64).set("name", "one").set("b", Pointer::to(&b2));
        b2.borrow_mut().set("id", 2i64).set("a", Pointer::to(&a3));
        a3.borrow_mut()
            .set("id", 3i64)
            .set("name", "x".repeat(40))
            .set("b", Pointer::Null);
        session.begin().unwrap();
        for object in [&a3, &b2, &a1] {
            session.persist(object).unwrap();
        }
        session.commit().unwrap();
    }

    // A3 is reached through the delayed queue and does not fit.
    let small = RuntimeOptions {
        initial_capacity: 8,
        max_capacity: 16,
        ..RuntimeOptions::default()
    };
    let mut session = fx.session_with(SqliteDriver::open(&path).unwrap(), small);
    let err = session.find(a, &[Value::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::BufferLimit { required: 40, .. }), "{err}");

    assert!(session.cached(a, &[Value::Int(1)]).is_none());
    assert!(session.cached(b, &[Value::Int(2)]).is_none());
    assert!(session.cached(a, &[Value::Int(3)]).is_none());
    assert!(matches!(
        session.find(a, &[Value::Int(3)]),
        Err(RuntimeError::BufferLimit { .. })
    ));
    assert!(session.cached(a, &[Value::Int(3)]).is_none());
}

#[test]
fn null_required_pointer_is_rejected() {
    let mut model = Model::new();
    let parent = model
        .add_class(PersistentClass::object("Parent").member(Member::id("id", SqlType::Integer)))
        .unwrap();
    let child = model
        .add_class(
            PersistentClass::object("Child")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::pointer("parent", parent).not_null()),
        )
        .unwrap();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    let orphan = session.create(child).unwrap();
    orphan.borrow_mut().set("id", 1i64);
    let err = session.persist(&orphan).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::NullPointer { ref class, ref member } if class == "Child" && member == "parent"
    ));
}

fn weak_model() -> (Model, ClassId, ClassId) {
    let mut model = Model::new();
    let parent = model
        .add_class(
            PersistentClass::object("Parent")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::simple("name", SqlType::Text)),
        )
        .unwrap();
    let child = model
        .add_class(
            PersistentClass::object("Child")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::pointer("parent", parent).pointer_shape(|p| p.kind = PointerKind::Weak)),
        )
        .unwrap();
    (model, parent, child)
}

#[test]
fn weak_pointer_needs_a_session_cache() {
    let (model, parent, child) = weak_model();
    let fx = Fixture::new(model);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weak.db");
    fx.create_file(&path);

    {
        let mut session = fx.session(SqliteDriver::open(&path).unwrap());
        let p = session.create(parent).unwrap();
        p.borrow_mut().set("id", 1i64).set("name", "root");
        let c = session.create(child).unwrap();
        c.borrow_mut().set("id", 1i64).set("parent", Pointer::weak(&p));
        session.persist(&p).unwrap();
        session.persist(&c).unwrap();
    }

    let transient = RuntimeOptions {
        cache_mode: CacheMode::Transient,
        ..RuntimeOptions::default()
    };
    let mut session = fx.session_with(SqliteDriver::open(&path).unwrap(), transient);
    let err = session.find(child, &[Value::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::SessionRequired { ref class } if class == "Parent"));

    let mut session = fx.session(SqliteDriver::open(&path).unwrap());
    let c = session.find(child, &[Value::Int(1)]).unwrap().unwrap();
    let p = target(&c, "parent").unwrap();
    assert_eq!(text_of(&p, "name"), "root");
}

#[test]
fn lazy_pointer_loads_on_demand() {
    let mut model = Model::new();
    let customer = model
        .add_class(
            PersistentClass::object("Customer")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::simple("name", SqlType::Text)),
        )
        .unwrap();
    let order = model
        .add_class(
            PersistentClass::object("Order")
                .table("orders")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::pointer("customer", customer).pointer_shape(|p| p.lazy = true)),
        )
        .unwrap();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    let c = session.create(customer).unwrap();
    c.borrow_mut().set("id", 7i64).set("name", "Acme");
    let o = session.create(order).unwrap();
    o.borrow_mut().set("id", 1i64).set("customer", Pointer::to(&c));
    session.persist(&c).unwrap();
    session.persist(&o).unwrap();

    session.clear_cache();
    let loaded = session.find(order, &[Value::Int(1)]).unwrap().unwrap();
    assert!(session.cached(customer, &[Value::Int(7)]).is_none());
    assert!(matches!(
        loaded.borrow().pointer("customer"),
        Some(Pointer::Lazy { id, .. }) if id == &vec![Value::Int(7)]
    ));

    let c = session.load_lazy(&loaded, "customer").unwrap().unwrap();
    assert_eq!(text_of(&c, "name"), "Acme");
    assert!(matches!(loaded.borrow().pointer("customer"), Some(Pointer::Strong(_))));
}

#[test]
fn inverse_container_reads_the_other_side() {
    let mut model = Model::new();
    let employer = model
        .add_class(
            PersistentClass::object("Employer")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::container(
                    "employees",
                    ContainerShape::ordered(ElementType::Pointer(ClassId(1))).inverse("employer"),
                )),
        )
        .unwrap();
    let employee = model
        .add_class(
            PersistentClass::object("Employee")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::simple("name", SqlType::Text))
                .member(Member::pointer("employer", employer)),
        )
        .unwrap();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());

    let acme = session.create(employer).unwrap();
    acme.borrow_mut().set("id", 1i64);
    session.persist(&acme).unwrap();
    for (id, name) in [(1i64, "Ann"), (2, "Bob")] {
        let e = session.create(employee).unwrap();
        e.borrow_mut().set("id", id).set("name", name).set("employer", Pointer::to(&acme));
        session.persist(&e).unwrap();
    }

    session.clear_cache();
    let loaded = session.find(employer, &[Value::Int(1)]).unwrap().unwrap();
    let staff: Vec<ObjectRef> = loaded
        .borrow()
        .container("employees")
        .unwrap()
        .values()
        .filter_map(|f| f.as_pointer().and_then(Pointer::get))
        .collect();
    let mut names: Vec<String> = staff.iter().map(|e| text_of(e, "name")).collect();
    names.sort();
    assert_eq!(names, vec!["Ann", "Bob"]);
    for e in &staff {
        assert!(Rc::ptr_eq(&target(e, "employer").unwrap(), &loaded));
    }
}

// ---------------------------------------------------------------------------
// Update and erase
// ---------------------------------------------------------------------------

fn account_model() -> (Model, ClassId) {
    let mut model = Model::new();
    let account = model
        .add_class(
            PersistentClass::object("Account")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::simple("balance", SqlType::Double))
                .member(Member::version("version")),
        )
        .unwrap();
    (model, account)
}

#[test]
fn stale_version_is_reported_as_changed() {
    let (model, account) = account_model();
    let fx = Fixture::new(model);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bank.db");
    fx.create_file(&path);
    let mut session = fx.session(SqliteDriver::open(&path).unwrap());

    let acc = session.create(account).unwrap();
    acc.borrow_mut().set("id", 1i64).set("balance", 10.0);
    session.persist(&acc).unwrap();
    acc.borrow_mut().set("balance", 20.0);
    session.update(&acc).unwrap();
    assert_eq!(acc.borrow().value("version"), Some(&Value::Int(2)));

    let conn = Connection::open(&path).unwrap();
    conn.execute(r#"UPDATE "account" SET "version" = "version" + 1 WHERE "id" = 1"#, [])
        .unwrap();

    acc.borrow_mut().set("balance", 30.0);
    let err = session.update(&acc).unwrap_err();
    assert!(matches!(err, RuntimeError::Changed { ref class, .. } if class == "Account"));
    let err = session.erase(&acc).unwrap_err();
    assert!(matches!(err, RuntimeError::Changed { .. }));

    conn.execute(r#"DELETE FROM "account" WHERE "id" = 1"#, []).unwrap();
    let err = session.update(&acc).unwrap_err();
    assert!(matches!(err, RuntimeError::NotPersistent { .. }));
}

#[test]
fn erase_removes_object_and_container_rows() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let (driver, log) = Recording::new(fx.memory_driver());
    let mut session = fx.session(driver);

    let ann = new_person(&fx, &session, 1, "Ann", &["555", "556"]);
    session.persist(&ann).unwrap();
    session.erase(&ann).unwrap();

    let deletes: Vec<String> = log
        .borrow()
        .iter()
        .filter(|s| s.starts_with("DELETE"))
        .cloned()
        .collect();
    assert_eq!(deletes.len(), 2);
    assert!(deletes[0].starts_with(r#"DELETE FROM "person_phones""#));
    assert!(session.find(person, &[Value::Int(1)]).unwrap().is_none());

    let err = session.erase(&ann).unwrap_err();
    assert!(matches!(err, RuntimeError::NotPersistent { .. }));
    assert!(matches!(
        session.erase_by_id(person, &[Value::Int(1)]),
        Err(RuntimeError::NotPersistent { .. })
    ));
}

#[test]
fn smart_ordered_container_writes_only_changes() {
    let mut model = Model::new();
    let doc = model
        .add_class(
            PersistentClass::object("Doc")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::container(
                    "tags",
                    ContainerShape::ordered(ElementType::Simple(SqlType::Text)).smart(),
                )),
        )
        .unwrap();
    let fx = Fixture::new(model);
    let (driver, log) = Recording::new(fx.memory_driver());
    let mut session = fx.session(driver);

    let d = session.create(doc).unwrap();
    d.borrow_mut()
        .set("id", 1i64)
        .set("tags", ContainerValue::from_values(["a", "b", "c"]));
    session.persist(&d).unwrap();
    assert_eq!(count_prefix(&log, r#"INSERT INTO "doc_tags""#), 3);

    {
        let mut object = d.borrow_mut();
        let tags = object.container_mut("tags").unwrap();
        assert!(tags.set(1, "B"));
        tags.push("d");
    }
    session.update(&d).unwrap();
    assert_eq!(count_prefix(&log, "DELETE"), 0);
    assert_eq!(count_prefix(&log, r#"UPDATE "doc_tags""#), 1);
    assert_eq!(count_prefix(&log, r#"INSERT INTO "doc_tags""#), 4);

    session.clear_cache();
    let loaded = session.find(doc, &[Value::Int(1)]).unwrap().unwrap();
    assert_eq!(strings(loaded.borrow().container("tags")), vec!["a", "B", "c", "d"]);

    loaded.borrow_mut().container_mut("tags").unwrap().truncate(1);
    session.update(&loaded).unwrap();
    let deletes: Vec<String> = log
        .borrow()
        .iter()
        .filter(|s| s.starts_with("DELETE"))
        .cloned()
        .collect();
    assert_eq!(deletes.len(), 1);
    assert!(deletes[0].contains(">= ?"));

    session.clear_cache();
    let loaded = session.find(doc, &[Value::Int(1)]).unwrap().unwrap();
    assert_eq!(strings(loaded.borrow().container("tags")), vec!["a"]);
}

#[test]
fn smart_set_container_erases_and_inserts_elements() {
    let mut model = Model::new();
    let team = model
        .add_class(
            PersistentClass::object("Team")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::container(
                    "members",
                    ContainerShape::set(ElementType::Simple(SqlType::Text)).smart(),
                )),
        )
        .unwrap();
    let fx = Fixture::new(model);
    let (driver, log) = Recording::new(fx.memory_driver());
    let mut session = fx.session(driver);

    let t = session.create(team).unwrap();
    t.borrow_mut()
        .set("id", 1i64)
        .set("members", ContainerValue::from_values(["x", "y"]));
    session.persist(&t).unwrap();

    {
        let mut object = t.borrow_mut();
        let members = object.container_mut("members").unwrap();
        assert!(members.remove(&Field::from("x")));
        assert!(members.insert("z"));
    }
    session.update(&t).unwrap();
    assert_eq!(count_prefix(&log, r#"DELETE FROM "team_members""#), 1);
    assert_eq!(count_prefix(&log, r#"INSERT INTO "team_members""#), 3);

    session.clear_cache();
    let loaded = session.find(team, &[Value::Int(1)]).unwrap().unwrap();
    let mut members = strings(loaded.borrow().container("members"));
    members.sort();
    assert_eq!(members, vec!["y", "z"]);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn query_filters_by_condition() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());
    for (id, name) in [(1, "Ann"), (2, "Bob"), (3, "Amy")] {
        let p = new_person(&fx, &session, id, name, &["1"]);
        session.persist(&p).unwrap();
    }
    session.clear_cache();

    let found = session
        .query(person, r#""name" LIKE ?"#, &[Value::from("A%")])
        .unwrap();
    let mut names: Vec<String> = found.iter().map(|p| text_of(p, "name")).collect();
    names.sort();
    assert_eq!(names, vec!["Amy", "Ann"]);
    assert!(found
        .iter()
        .all(|p| strings(p.borrow().container("phones")) == vec!["1"]));

    assert_eq!(session.query(person, "", &[]).unwrap().len(), 3);
}

#[test]
fn evicted_query_statements_are_prepared_again() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let options = RuntimeOptions {
        max_query_statements: 1,
        ..RuntimeOptions::default()
    };
    let mut session = fx.session_with(fx.memory_driver(), options);
    for (id, name) in [(1, "Ann"), (2, "Bob")] {
        let p = new_person(&fx, &session, id, name, &[]);
        session.persist(&p).unwrap();
    }

    for _ in 0..2 {
        let found = session.query(person, r#""name" = ?"#, &[Value::from("Bob")]).unwrap();
        assert_eq!(found.len(), 1);
        let found = session.query(person, r#""id" < ?"#, &[Value::Int(3)]).unwrap();
        assert_eq!(found.len(), 2);
    }
    let key = |condition: &str| StatementKey::new(person, StatementKind::Query, condition);
    assert!(session.statements().get(&key(r#""name" = ?"#)).is_none());
    assert!(session.statements().get(&key(r#""id" < ?"#)).is_some());
}

#[test]
fn erase_query_cascades_to_container_rows() {
    let (model, person) = person_model();
    let fx = Fixture::new(model);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    fx.create_file(&path);
    let mut session = fx.session(SqliteDriver::open(&path).unwrap());

    for (id, name) in [(1, "Ann"), (2, "Bob")] {
        let p = new_person(&fx, &session, id, name, &["555", "556"]);
        session.persist(&p).unwrap();
    }
    let erased = session
        .erase_query(person, r#""id" = ?"#, &[Value::Int(1)])
        .unwrap();
    assert_eq!(erased, 1);
    assert!(session.cached(person, &[Value::Int(1)]).is_none());

    let conn = Connection::open(&path).unwrap();
    let count = |owner: i64| -> i64 {
        conn.query_row(
            r#"SELECT COUNT(*) FROM "person_phones" WHERE "object_id" = ?1"#,
            [owner],
            |r| r.get(0),
        )
        .unwrap()
    };
    assert_eq!(count(1), 0);
    assert_eq!(count(2), 2);
}

#[test]
fn erase_query_on_a_hierarchy_erases_every_level() {
    let (model, animal, dog) = animal_model();
    let fx = Fixture::new(model);
    let mut session = fx.session(fx.memory_driver());
    for (name, breed) in [("Rex", "collie"), ("Fido", "pug")] {
        let d = session.create(dog).unwrap();
        d.borrow_mut().set("name", name).set("breed", breed);
        session.persist(&d).unwrap();
    }
    session.clear_cache();

    let erased = session.erase_query(animal, r#""name" = ?"#, &[Value::from("Rex")]).unwrap();
    assert_eq!(erased, 1);
    let left = session.query(dog, "", &[]).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(text_of(&left[0], "breed"), "pug");
}
