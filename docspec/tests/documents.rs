use std::sync::Arc;

use docspec::{memory::InMemoryStore, prelude::*};
use serde_json::json;

fn base() -> Arc<Schema> {
    Schema::document("a")
        .collection("a")
        .field("n", FieldSpec::numeric().build().unwrap())
        .field("label", FieldSpec::text().max_length(10).build().unwrap())
        .index(IndexSpec::on("label"))
        .build()
        .unwrap()
}

fn extension(base: &Arc<Schema>) -> Arc<Schema> {
    Schema::document("a_prime")
        .extends(base)
        .collection(":prime")
        .field("n2", FieldSpec::numeric().required().build().unwrap())
        .build()
        .unwrap()
}

async fn registry(schemas: &[&Arc<Schema>]) -> Registry {
    let mut builder = Registry::builder().connection("default", InMemoryStore::new());
    for schema in schemas {
        builder = builder.register(schema).unwrap();
    }
    builder.build().await.unwrap()
}

#[tokio::test]
async fn subtype_round_trip_through_base_collection() {
    let a = base();
    let a_prime = extension(&a);
    let registry = registry(&[&a, &a_prime]).await;

    let mut doc = Document::new(&a_prime).unwrap();
    match doc.save(&registry).await {
        Err(DocumentStoreError::FieldValidation(err)) => assert_eq!(err.field, "n2"),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(registry.count("a", &Filter::all()).await.unwrap(), 0);

    doc.set("n2", 5).unwrap();
    let id = doc.save(&registry).await.unwrap();

    let loaded = Document::load(&registry, &a, id).await.unwrap();
    assert_eq!(loaded.schema().name(), "a_prime");
    assert_eq!(loaded.value("n2").unwrap(), &Value::Int(5));
    assert_eq!(loaded.value("n").unwrap(), &Value::Null);
    assert_eq!(loaded, doc);
    assert!(!loaded.is_new());
}

#[tokio::test]
async fn find_inflates_each_document_as_its_subtype() {
    let a = base();
    let a_prime = extension(&a);
    let registry = registry(&[&a, &a_prime]).await;

    let mut plain = registry.factory("a", None).await.unwrap();
    plain.set("label", "plain").unwrap();
    plain.save(&registry).await.unwrap();

    let mut derived = registry.factory("a:prime", None).await.unwrap();
    derived.set("label", "derived").unwrap();
    derived.set("n2", 1).unwrap();
    derived.save(&registry).await.unwrap();

    let query = Query::builder().sort("label", SortDirection::Asc).build();
    let found = registry.find("a", query).unwrap().try_collect().await.unwrap();

    let names: Vec<&str> = found.iter().map(|doc| doc.schema().name()).collect();
    assert_eq!(names, vec!["a_prime", "a"]);

    let plain_only = registry
        .find("a", Query::filter(Filter::not_exists("_subtype")))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(plain_only, vec![plain]);
}

#[tokio::test]
async fn cursor_restarts_after_rewind() {
    let a = base();
    let registry = registry(&[&a]).await;

    for n in 0..3 {
        let mut doc = Document::new(&a).unwrap();
        doc.set("n", n).unwrap();
        doc.save(&registry).await.unwrap();
    }

    let mut cursor = registry.find("a", Query::builder().limit(2).build()).unwrap();
    assert_eq!(cursor.count().await.unwrap(), 3);
    assert!(cursor.next().await.unwrap().is_some());
    assert!(cursor.next().await.unwrap().is_some());
    assert!(cursor.next().await.unwrap().is_none());

    cursor.rewind();
    assert!(cursor.next().await.unwrap().is_some());
}

#[tokio::test]
async fn unknown_discriminator_fails_inflation() {
    let a = base();
    let registry = registry(&[&a]).await;

    let raw = bson::doc! { "_id": bson::oid::ObjectId::new(), "_subtype": "ghost" };
    assert!(matches!(
        registry.inflate("a", &raw),
        Err(DocumentStoreError::Definition(_)),
    ));
}

#[tokio::test]
async fn update_and_delete_by_filter() {
    let a = base();
    let registry = registry(&[&a]).await;

    for label in ["x", "y", "y"] {
        let mut doc = Document::new(&a).unwrap();
        doc.set("label", label).unwrap();
        doc.save(&registry).await.unwrap();
    }

    let updated = registry
        .update("a", &Filter::eq("label", "y"), &Update::new().set("n", 7))
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(registry.count("a", &Filter::eq("n", 7)).await.unwrap(), 2);

    assert!(matches!(
        registry.update("a", &Filter::all(), &Update::new()).await,
        Err(DocumentStoreError::Definition(_)),
    ));

    assert_eq!(registry.delete("a", Filter::eq("label", "y")).await.unwrap(), 2);
    assert_eq!(registry.count("a", &Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn wire_payloads_apply_all_or_nothing() {
    let a = base();
    let registry = registry(&[&a]).await;

    let mut doc = Document::new(&a).unwrap();
    doc.set("label", "wire").unwrap();
    doc.set("n", 2.5).unwrap();
    doc.save(&registry).await.unwrap();

    let wire = doc.to_wire();
    assert_eq!(doc.to_wire(), wire);
    let copy = Document::from_wire(&a, &wire).unwrap();
    assert_eq!(copy, doc);
    assert_eq!(copy.value("label").unwrap(), &Value::from("wire"));

    let mut payload = wire.clone();
    payload.insert("label".to_string(), json!("far too long for ten"));
    assert!(Document::from_wire(&a, &payload).is_err());

    let mut payload = wire;
    payload.insert("label".to_string(), json!(12));
    let mut broken = Document::new(&a).unwrap();
    assert!(broken.apply_wire(&payload).is_err());
    assert!(!broken.is_set("n"));
}

#[tokio::test]
async fn validation_report_is_carried_on_the_wire() {
    let a = base();
    let a_prime = extension(&a);

    let mut doc = Document::new(&a_prime).unwrap();
    assert!(doc.validate_with_report(true).is_err());

    let report = doc.validate_with_report(false).unwrap();
    assert_eq!(report.paths().collect::<Vec<_>>(), vec!["n2"]);

    let wire = doc.to_wire();
    assert!(wire["errors"]["n2"].is_array());
}

#[tokio::test]
async fn registration_rejects_bad_wiring() {
    let a = base();
    let stranger = Schema::document("stranger")
        .collection("a:stranger")
        .build()
        .unwrap();

    let builder = Registry::builder().connection("default", InMemoryStore::new());
    assert!(matches!(
        builder.register(&stranger),
        Err(DocumentStoreError::Definition(_)),
    ));

    let builder = Registry::builder()
        .connection("default", InMemoryStore::new())
        .register(&a)
        .unwrap();
    assert!(matches!(builder.register(&a), Err(DocumentStoreError::Definition(_))));

    let registry = registry(&[&a]).await;
    assert!(matches!(
        registry.factory("missing", None).await,
        Err(DocumentStoreError::CollectionNotFound(_)),
    ));
}

#[tokio::test]
async fn overridden_defaults_apply_to_subtypes_only() {
    let animal = Schema::document("animal")
        .collection("animals")
        .field("sound", FieldSpec::text().default("...").build().unwrap())
        .build()
        .unwrap();
    let dog = Schema::document("dog")
        .extends(&animal)
        .collection(":dog")
        .field("sound", FieldSpec::text().default("woof").build().unwrap())
        .build()
        .unwrap();
    let registry = registry(&[&animal, &dog]).await;

    assert_eq!(Document::new(&dog).unwrap().value("sound").unwrap(), &Value::from("woof"));

    let mut generic = Document::new(&animal).unwrap();
    assert_eq!(generic.value("sound").unwrap(), &Value::from("..."));
    let id = generic.save(&registry).await.unwrap();

    let through_child = registry.factory("animals:dog", Some(id)).await.unwrap();
    assert_eq!(through_child.schema().name(), "animal");
    assert_eq!(through_child.value("sound").unwrap(), &Value::from("..."));
    assert_eq!(through_child, generic);

    let listed = registry.find("animals:dog", Query::new()).unwrap().try_collect().await.unwrap();
    assert_eq!(listed, vec![generic]);
}
