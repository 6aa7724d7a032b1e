//! Statement text and image layouts for representative models.

use ormc_core::{
    ClassId, ContainerShape, ElementType, Member, Model, PersistentClass, SqlType,
};
use ormc_plan::{build_plan, check_layout, PlanOptions, SlotRole, StatementKind};
use ormc_schema::{build_schema, DialectKind};

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

fn postgres() -> PlanOptions {
    PlanOptions {
        dialect: DialectKind::Postgres,
        ..PlanOptions::default()
    }
}

#[test]
fn person_statements() {
    let (model, person) = person_model();
    let plan = build_plan(&model, &PlanOptions::default()).unwrap();
    let class = plan.class(person).unwrap();

    assert_eq!(
        class.persist.as_ref().unwrap().sql,
        r#"INSERT INTO "person" ("id", "name") VALUES (?, ?)"#
    );
    assert_eq!(
        class.find.as_ref().unwrap().sql,
        r#"SELECT "person"."id", "person"."name" FROM "person" WHERE "person"."id" = ?"#
    );
    assert_eq!(
        class.update.as_ref().unwrap().sql,
        r#"UPDATE "person" SET "name" = ? WHERE "person"."id" = ?"#
    );
    assert_eq!(
        class.erase.as_ref().unwrap().sql,
        r#"DELETE FROM "person" WHERE "person"."id" = ?"#
    );

    let phones = &class.containers[0];
    assert_eq!(phones.table.as_deref(), Some("person_phones"));
    assert_eq!(
        phones.select.sql,
        r#"SELECT "person_phones"."index", "person_phones"."value" FROM "person_phones" WHERE "person_phones"."object_id" = ? ORDER BY "person_phones"."index""#
    );
    let insert = phones.insert.as_ref().unwrap();
    assert_eq!(
        insert.sql,
        r#"INSERT INTO "person_phones" ("object_id", "index", "value") VALUES (?, ?, ?)"#
    );
    let roles: Vec<SlotRole> = insert.params.iter().map(|s| s.role).collect();
    assert_eq!(
        roles,
        vec![SlotRole::ContainerId, SlotRole::ContainerIndex, SlotRole::ContainerValue]
    );
    assert!(phones.update_element.is_none());
}

#[test]
fn update_image_excludes_id_and_readonly_from_set() {
    let mut model = Model::new();
    let account = model
        .add_class(
            PersistentClass::object("Account")
                .member(Member::id("id", SqlType::BigInt))
                .member(Member::simple("created", SqlType::BigInt).readonly())
                .member(Member::simple("balance", SqlType::Double))
                .member(Member::version("version")),
        )
        .unwrap();
    let plan = build_plan(&model, &PlanOptions::default()).unwrap();
    let class = plan.class(account).unwrap();

    let update = class.update.as_ref().unwrap();
    assert_eq!(
        update.sql,
        r#"UPDATE "account" SET "balance" = ?, "version" = "version" + 1 WHERE "account"."id" = ? AND "account"."version" = ?"#
    );
    let params: Vec<&str> = update.params.iter().map(|s| s.column.as_str()).collect();
    assert_eq!(params, vec!["balance", "id", "version"]);

    let persist = class.persist.as_ref().unwrap();
    let params: Vec<&str> = persist.params.iter().map(|s| s.column.as_str()).collect();
    assert_eq!(params, vec!["id", "created", "balance"]);

    assert_eq!(
        class.find_version.as_ref().unwrap().sql,
        r#"SELECT "account"."version" FROM "account" WHERE "account"."id" = ?"#
    );
    assert_eq!(class.find_version.as_ref().unwrap().kind, StatementKind::FindVersion);
}

#[test]
fn polymorphic_find_joins_root_to_class() {
    let (model, animal, dog) = animal_model();
    let plan = build_plan(&model, &postgres()).unwrap();

    let root = plan.class(animal).unwrap();
    assert_eq!(
        root.persist.as_ref().unwrap().sql,
        r#"INSERT INTO "animal" ("name", "typeid") VALUES ($1, $2) RETURNING "id""#
    );
    assert!(root.polymorphic.as_ref().unwrap().is_root());

    let derived = plan.class(dog).unwrap();
    insta::assert_snapshot!(derived.find.as_ref().unwrap().sql, @r#"SELECT "animal"."id", "animal"."version", "animal"."name", "animal"."typeid", "dog"."breed" FROM "dog" JOIN "animal" ON "animal"."id" = "dog"."id" WHERE "dog"."id" = $1"#);
    assert_eq!(
        derived.find_level.as_ref().unwrap().sql,
        r#"SELECT "dog"."breed" FROM "dog" WHERE "dog"."id" = $1"#
    );
    let poly = derived.polymorphic.as_ref().unwrap();
    assert_eq!(poly.chain, vec![animal, dog]);
    assert_eq!(poly.discriminator_value, "Dog");
    assert_eq!(poly.discriminator.column, "typeid");

    // The derived insert binds the root id explicitly and never the version.
    assert_eq!(
        derived.persist.as_ref().unwrap().sql,
        r#"INSERT INTO "dog" ("id", "breed") VALUES ($1, $2)"#
    );
    assert!(derived.version.is_none());
    assert!(derived.erase_query.is_none());
}

#[test]
fn smart_containers_get_element_statements() {
    let mut model = Model::new();
    let doc = model
        .add_class(
            PersistentClass::object("Doc")
                .member(Member::id("id", SqlType::Integer))
                .member(Member::container(
                    "lines",
                    ContainerShape::ordered(ElementType::Simple(SqlType::Text)).smart(),
                ))
                .member(Member::container(
                    "tags",
                    ContainerShape::set(ElementType::Simple(SqlType::Text)).smart(),
                ))
                .member(Member::container(
                    "meta",
                    ContainerShape::map(
                        ElementType::Simple(SqlType::Text),
                        ElementType::Simple(SqlType::Text),
                    )
                    .smart(),
                )),
        )
        .unwrap();
    let plan = build_plan(&model, &PlanOptions::default()).unwrap();
    let class = plan.class(doc).unwrap();

    let lines = &class.containers[0];
    assert!(lines.smart);
    assert_eq!(
        lines.update_element.as_ref().unwrap().sql,
        r#"UPDATE "doc_lines" SET "value" = ? WHERE "doc_lines"."object_id" = ? AND "doc_lines"."index" = ?"#
    );
    assert_eq!(
        lines.delete_element.as_ref().unwrap().sql,
        r#"DELETE FROM "doc_lines" WHERE "doc_lines"."object_id" = ? AND "doc_lines"."index" >= ?"#
    );

    let tags = &class.containers[1];
    assert!(tags.update_element.is_none());
    assert_eq!(
        tags.delete_element.as_ref().unwrap().sql,
        r#"DELETE FROM "doc_tags" WHERE "doc_tags"."object_id" = ? AND "doc_tags"."value" = ?"#
    );

    let meta = &class.containers[2];
    assert!(!meta.smart);
    assert!(meta.delete_element.is_none());
}

#[test]
fn inverse_members_only_select() {
    let mut model = Model::new();
    let employer = model
        .add_class(
            PersistentClass::object("Employer")
                .member(Member::auto_id("id"))
                .member(Member::container(
                    "employees",
                    ContainerShape::set(ElementType::Pointer(ClassId(1))).inverse("employer"),
                )),
        )
        .unwrap();
    model
        .add_class(
            PersistentClass::object("Employee")
                .member(Member::auto_id("id"))
                .member(Member::pointer("employer", employer)),
        )
        .unwrap();
    let plan = build_plan(&model, &PlanOptions::default()).unwrap();
    let employees = &plan.class(employer).unwrap().containers[0];
    assert!(employees.inverse);
    assert!(employees.insert.is_none() && employees.delete_all.is_none());
    assert_eq!(
        employees.select.sql,
        r#"SELECT "employee"."id" FROM "employee" WHERE "employee"."employer" = ?"#
    );
    assert_eq!(employees.value[0].target, Some(ClassId(1)));
}

#[test]
fn views_only_query() {
    let mut model = Model::new();
    let summary = model
        .add_class(
            PersistentClass::view("Summary")
                .table("person")
                .member(Member::simple("name", SqlType::Text)),
        )
        .unwrap();
    let plan = build_plan(&model, &PlanOptions::default()).unwrap();
    let view = plan.class(summary).unwrap();
    assert!(view.view);
    assert!(view.persist.is_none() && view.find.is_none() && view.erase_query.is_none());
    assert_eq!(view.query.sql, r#"SELECT "person"."name" FROM "person""#);
}

#[test]
fn every_image_matches_its_table() {
    for (model, _) in [person_model()] {
        let plan = build_plan(&model, &PlanOptions::default()).unwrap();
        check_layout(&plan, &build_schema(&model).unwrap()).unwrap();
    }
    let (model, _, _) = animal_model();
    let plan = build_plan(&model, &postgres()).unwrap();
    let schema = build_schema(&model).unwrap();
    for class in plan.classes() {
        let table = schema.table(&class.table).unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        let slots: Vec<&str> = class.columns.iter().map(|s| s.column.as_str()).collect();
        assert_eq!(names, slots);
    }
}

#[test]
fn plan_serializes() {
    let (model, person) = person_model();
    let plan = build_plan(&model, &PlanOptions::default()).unwrap();
    let json = serde_json::to_string(&plan).unwrap();
    let back: ormc_plan::Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(back.class(person), plan.class(person));
}
