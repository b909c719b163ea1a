/// Embedded documents write through their root's version
///
/// Run with: cargo test --test embedded_tests

use doclock::{
    Collection, Database, Document, EmbeddedEntity, EntityType, InMemoryDocumentStore, LockError,
    LockingConfig, RootResolver, UpdateOperator,
};
use serde_json::{Value, json};
use std::sync::Arc;

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

struct Fixture {
    store: Arc<InMemoryDocumentStore>,
    db: Database,
    people: Collection,
}

fn setup() -> Fixture {
    let store = Arc::new(InMemoryDocumentStore::new());
    let db = Database::new(store.clone(), LockingConfig::new()).unwrap();
    let people = db
        .register(EntityType::root("person").collection("people").optimistic())
        .unwrap();
    db.register_embedded(EntityType::embedded_many("phone", "person", "phones").optimistic())
        .unwrap();
    db.register_embedded(EntityType::embedded_one("address", "person", "address"))
        .unwrap();
    Fixture { store, db, people }
}

#[tokio::test]
async fn test_embedded_insert_bumps_root_version() {
    let fx = setup();
    let mut person = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();

    let mut phone = fx.db.embedded("phone", doc(json!({ "number": "555-0100" }))).unwrap();
    phone.bind(&person);
    phone.insert(&mut person).await.unwrap();

    assert!(phone.is_persisted());
    assert_eq!(person.version(), 1);

    let stored = fx.store.document("people", person.identity()).await.unwrap();
    assert_eq!(stored["lock_version"], json!(1));
    let phones = stored["phones"].as_array().unwrap();
    assert_eq!(phones.len(), 1);
    assert_eq!(phones[0]["number"], json!("555-0100"));
    assert!(phones[0].get("lock_version").is_none());
}

#[tokio::test]
async fn test_sequential_embedded_inserts() {
    let fx = setup();
    let mut person = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();
    let phone_type = fx.db.entity_type("phone").unwrap();

    for number in ["1", "2", "3"] {
        let mut phone = EmbeddedEntity::new_in(
            Arc::clone(&phone_type),
            doc(json!({ "number": number })),
            &person,
        )
        .unwrap();
        phone.insert(&mut person).await.unwrap();
    }

    assert_eq!(person.version(), 3);
    let children = RootResolver::new(&mut person).children(&phone_type).unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|child| child.is_persisted()));
}

#[tokio::test]
async fn test_unbound_child_has_no_parent() {
    let fx = setup();
    let mut person = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();
    let writes = fx.store.write_count();

    let mut phone = fx.db.embedded("phone", doc(json!({ "number": "1" }))).unwrap();
    let err = phone.insert(&mut person).await.unwrap_err();
    assert!(matches!(err, LockError::MissingParent { .. }));
    assert_eq!(err.identity(), Some(phone.identity()));

    let other = fx.people.create(doc(json!({ "name": "Paul" }))).await.unwrap();
    phone.bind(&other);
    assert!(matches!(
        phone.insert(&mut person).await,
        Err(LockError::MissingParent { .. })
    ));

    assert_eq!(fx.store.write_count(), writes);
    assert_eq!(person.version(), 0);
}

#[tokio::test]
async fn test_embedded_update_and_remove() {
    let fx = setup();
    let mut person = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();
    let mut home = fx
        .db
        .embedded("phone", doc(json!({ "_id": "home", "number": "1" })))
        .unwrap();
    let mut work = fx
        .db
        .embedded("phone", doc(json!({ "_id": "work", "number": "2" })))
        .unwrap();
    home.bind(&person);
    work.bind(&person);
    home.insert(&mut person).await.unwrap();
    work.insert(&mut person).await.unwrap();

    work.update(&mut person, doc(json!({ "number": "22" })))
        .await
        .unwrap();
    assert_eq!(work.get("number"), Some(&json!("22")));
    assert_eq!(person.version(), 3);

    RootResolver::new(&mut person)
        .apply(&mut work, UpdateOperator::Rename, doc(json!({ "number": "digits" })))
        .await
        .unwrap();
    assert_eq!(work.get("digits"), Some(&json!("22")));
    assert_eq!(person.version(), 4);

    home.remove(&mut person).await.unwrap();
    assert!(!home.is_persisted());
    assert_eq!(person.version(), 5);

    let stored = fx.store.document("people", person.identity()).await.unwrap();
    assert_eq!(
        stored["phones"],
        json!([{ "_id": "work", "digits": "22" }])
    );
    assert_eq!(stored["lock_version"], json!(5));

    let err = home
        .update(&mut person, doc(json!({ "number": "9" })))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::DocumentNotFound { .. }));
}

#[tokio::test]
async fn test_embedded_identity_cannot_change() {
    let fx = setup();
    let mut person = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();
    let mut phone = fx.db.embedded("phone", doc(json!({ "number": "1" }))).unwrap();
    phone.bind(&person);
    phone.insert(&mut person).await.unwrap();

    let err = phone
        .update(&mut person, doc(json!({ "_id": "other" })))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::InvalidOperation(_)));
    assert_eq!(person.version(), 1);
}

#[tokio::test]
async fn test_embeds_one_relation() {
    let fx = setup();
    let mut person = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();
    let mut address = fx
        .db
        .embedded("address", doc(json!({ "city": "Paris" })))
        .unwrap();
    address.bind(&person);

    address.insert(&mut person).await.unwrap();
    address
        .update(&mut person, doc(json!({ "city": "Rome" })))
        .await
        .unwrap();
    assert_eq!(person.get("address.city"), Some(&json!("Rome")));
    assert_eq!(person.version(), 2);

    address.remove(&mut person).await.unwrap();
    assert_eq!(person.version(), 3);
    let stored = fx.store.document("people", person.identity()).await.unwrap();
    assert!(stored.get("address").is_none());
}

#[tokio::test]
async fn test_insert_into_unsaved_root_inserts_the_root() {
    let fx = setup();
    let mut person = fx.people.build(doc(json!({ "name": "John" }))).unwrap();
    let mut phone = fx.db.embedded("phone", doc(json!({ "number": "1" }))).unwrap();
    phone.bind(&person);

    phone.insert(&mut person).await.unwrap();

    assert!(person.is_persisted());
    assert_eq!(person.version(), 0);
    assert!(!person.has_changes());
    let stored = fx.store.document("people", person.identity()).await.unwrap();
    assert_eq!(stored["lock_version"], json!(0));
    assert_eq!(stored["phones"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_embedded_writers_conflict() {
    let fx = setup();
    let created = fx.people.create(doc(json!({ "name": "John" }))).await.unwrap();
    let mut first = fx.people.find(created.identity()).await.unwrap();
    let mut second = fx.people.find(created.identity()).await.unwrap();

    let mut a = fx.db.embedded("phone", doc(json!({ "number": "1" }))).unwrap();
    let mut b = fx.db.embedded("phone", doc(json!({ "number": "2" }))).unwrap();
    a.bind(&first);
    b.bind(&second);

    a.insert(&mut first).await.unwrap();
    let err = b.insert(&mut second).await.unwrap_err();
    assert!(matches!(err, LockError::Stale { .. }));
    assert!(!b.is_persisted());

    second.reload().await.unwrap();
    b.insert(&mut second).await.unwrap();
    assert_eq!(second.version(), 2);

    let stored = fx.store.document("people", created.identity()).await.unwrap();
    assert_eq!(stored["phones"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_embedded_types_cannot_be_saved_directly() {
    let fx = setup();
    assert!(matches!(
        fx.db.collection("phone"),
        Err(LockError::InvalidOperation(_))
    ));
    let person_type = fx.db.entity_type("person").unwrap();
    assert!(matches!(
        EmbeddedEntity::new(person_type, Document::new()),
        Err(LockError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_unlocked_root_update_after_concurrent_removal() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let db = Database::new(store.clone(), LockingConfig::new()).unwrap();
    let contacts = db.register(EntityType::root("contact")).unwrap();
    db.register_embedded(EntityType::embedded_many("line", "contact", "lines"))
        .unwrap();

    let mut contact = contacts.create(doc(json!({ "name": "John" }))).await.unwrap();
    for (id, number) in [("home", "1"), ("work", "2"), ("cell", "3")] {
        let mut line = db
            .embedded("line", doc(json!({ "_id": id, "number": number })))
            .unwrap();
        line.bind(&contact);
        line.insert(&mut contact).await.unwrap();
    }

    let mut first = contacts.find(contact.identity()).await.unwrap();
    let mut second = contacts.find(contact.identity()).await.unwrap();
    let line_type = db.entity_type("line").unwrap();
    let mut work = RootResolver::new(&mut first)
        .children(&line_type)
        .unwrap()
        .remove(1);
    let mut home = RootResolver::new(&mut second)
        .children(&line_type)
        .unwrap()
        .remove(0);

    home.remove(&mut second).await.unwrap();

    // "work" moved from index 1 to 0; index 1 now holds "cell".
    let err = work
        .update(&mut first, doc(json!({ "number": "22" })))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Stale { .. }));

    let stored = store.document("contact", contact.identity()).await.unwrap();
    assert_eq!(
        stored["lines"],
        json!([{ "_id": "work", "number": "2" }, { "_id": "cell", "number": "3" }])
    );

    first.reload().await.unwrap();
    work.update(&mut first, doc(json!({ "number": "22" })))
        .await
        .unwrap();
    let stored = store.document("contact", contact.identity()).await.unwrap();
    assert_eq!(
        stored["lines"],
        json!([{ "_id": "work", "number": "22" }, { "_id": "cell", "number": "3" }])
    );
}
