/// Collection-wide updates and their version bookkeeping
///
/// Run with: cargo test --test bulk_update_tests

use doclock::{
    BitwiseOp, Collection, Database, Document, EntityType, Filter, InMemoryDocumentStore,
    LockError, LockingConfig, UpdateOperator,
};
use serde_json::{Value, json};
use std::sync::Arc;

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

async fn seed_people() -> (Arc<InMemoryDocumentStore>, Collection) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let db = Database::new(store.clone(), LockingConfig::new()).unwrap();
    let people = db
        .register(EntityType::root("person").collection("people").optimistic())
        .unwrap();

    let cities = ["Paris", "Paris", "Rome", "Paris", "Oslo"];
    for (i, city) in cities.iter().enumerate() {
        people
            .create(doc(json!({
                "_id": format!("p{}", i),
                "city": city,
                "score": 1,
                "flags": 6,
                "tags": ["x"]
            })))
            .await
            .unwrap();
    }
    (store, people)
}

async fn versions(people: &Collection) -> Vec<(String, u64)> {
    let mut all: Vec<(String, u64)> = people
        .find_all(&Filter::all())
        .await
        .unwrap()
        .into_iter()
        .map(|person| (person.identity().to_string(), person.version()))
        .collect();
    all.sort();
    all
}

#[tokio::test]
async fn test_bulk_set_bumps_only_matched_documents() {
    let (_store, people) = seed_people().await;
    let paris = Filter::all().eq("city", "Paris");

    let matched = people.set(&paris, doc(json!({ "visited": true }))).await.unwrap();
    assert_eq!(matched, 3);

    assert_eq!(
        versions(&people).await,
        vec![
            ("p0".to_string(), 1),
            ("p1".to_string(), 1),
            ("p2".to_string(), 0),
            ("p3".to_string(), 1),
            ("p4".to_string(), 0),
        ]
    );
    let visited = people
        .find_all(&Filter::all().eq("visited", true))
        .await
        .unwrap();
    assert_eq!(visited.len(), 3);
}

#[tokio::test]
async fn test_bulk_unset_also_bumps_version() {
    let (_store, people) = seed_people().await;
    let rome = Filter::all().eq("city", "Rome");

    assert_eq!(people.unset(&rome, vec!["score", "tags"]).await.unwrap(), 1);

    let person = people.find(&"p2".into()).await.unwrap();
    assert_eq!(person.version(), 1);
    assert!(person.get("score").is_none());
    assert!(person.get("tags").is_none());

    // A mapping form names the same fields through its keys.
    assert_eq!(
        people
            .unset(&rome, doc(json!({ "city": "" })))
            .await
            .unwrap(),
        1
    );
    let person = people.find(&"p2".into()).await.unwrap();
    assert_eq!(person.version(), 2);
    assert!(person.get("city").is_none());
}

#[tokio::test]
async fn test_bulk_operators_each_bump_once() {
    let (store, people) = seed_people().await;
    let oslo = Filter::all().eq("city", "Oslo");

    people.inc(&oslo, doc(json!({ "score": 4 }))).await.unwrap();
    people.bit(&oslo, "flags", BitwiseOp::and(3)).await.unwrap();
    people.push(&oslo, doc(json!({ "tags": "y" }))).await.unwrap();
    people
        .push_all(&oslo, doc(json!({ "tags": ["z", "z"] })))
        .await
        .unwrap();
    people.pull(&oslo, doc(json!({ "tags": "z" }))).await.unwrap();
    people
        .add_to_set(&oslo, doc(json!({ "tags": "x" })))
        .await
        .unwrap();
    people
        .add_each_to_set(&oslo, doc(json!({ "tags": ["w", "x"] })))
        .await
        .unwrap();
    people
        .pull_all(&oslo, doc(json!({ "tags": ["y"] })))
        .await
        .unwrap();
    people.pop(&oslo, "tags", 1).await.unwrap();
    people.rename(&oslo, "score", "points").await.unwrap();

    let stored = store.document("people", &"p4".into()).await.unwrap();
    assert_eq!(stored["lock_version"], json!(10));
    assert_eq!(stored["points"], json!(5));
    assert!(stored.get("score").is_none());
    assert_eq!(stored["flags"], json!(2));
    assert_eq!(stored["tags"], json!(["x"]));

    let untouched = store.document("people", &"p0".into()).await.unwrap();
    assert_eq!(untouched["lock_version"], json!(0));
}

#[tokio::test]
async fn test_bulk_with_no_match_is_not_a_conflict() {
    let (_store, people) = seed_people().await;
    let matched = people
        .apply_bulk(
            &Filter::all().eq("city", "Lima"),
            UpdateOperator::Set,
            doc(json!({ "visited": true })),
        )
        .await
        .unwrap();
    assert_eq!(matched, 0);
    assert!(versions(&people).await.iter().all(|(_, version)| *version == 0));
}

#[tokio::test]
async fn test_bulk_with_no_fields_issues_no_write() {
    let (store, people) = seed_people().await;
    let writes = store.write_count();

    assert_eq!(people.set(&Filter::all(), Document::new()).await.unwrap(), 0);
    assert_eq!(
        people
            .apply_bulk(&Filter::all(), UpdateOperator::Increment, Document::new())
            .await
            .unwrap(),
        0
    );

    assert_eq!(store.write_count(), writes);
    assert!(versions(&people).await.iter().all(|(_, version)| *version == 0));
}

#[tokio::test]
async fn test_bulk_update_makes_loaded_handles_stale() {
    let (_store, people) = seed_people().await;
    let mut loaded = people.find(&"p0".into()).await.unwrap();

    people
        .inc(&Filter::all().eq("city", "Paris"), doc(json!({ "score": 1 })))
        .await
        .unwrap();

    loaded.set_attr("city", "Lyon").unwrap();
    assert!(matches!(
        loaded.save().await,
        Err(LockError::Stale { .. })
    ));
    loaded.reload().await.unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.get("score"), Some(&json!(2)));
}

#[tokio::test]
async fn test_bulk_on_unlocked_type_adds_no_version() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let db = Database::new(store.clone(), LockingConfig::new()).unwrap();
    let tags = db.register(EntityType::root("tag")).unwrap();
    for name in ["a", "b"] {
        tags.create(doc(json!({ "_id": name, "uses": 0 })))
            .await
            .unwrap();
    }

    assert_eq!(
        tags.inc(&Filter::all(), doc(json!({ "uses": 1 })))
            .await
            .unwrap(),
        2
    );
    assert_eq!(tags.unset(&Filter::all(), "uses").await.unwrap(), 2);

    for name in ["a", "b"] {
        let stored = store.document("tag", &name.into()).await.unwrap();
        assert!(stored.get("lock_version").is_none());
        assert!(stored.get("uses").is_none());
    }
}

#[tokio::test]
async fn test_bulk_rejects_version_field_updates() {
    let (_store, people) = seed_people().await;
    let err = people
        .set(&Filter::all(), doc(json!({ "lock_version": 0 })))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::InvalidOperation(_)));
    assert!(versions(&people).await.iter().all(|(_, version)| *version == 0));
}
