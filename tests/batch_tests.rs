/// Batch mutation tests
///
/// start_batch / end_batch routing, flush ordering and failure reporting.
/// Run with: cargo test --test batch_tests

mod common;

use common::{address, columns, fixture, fixture_with, user};
use rowmapper::{MapError, MapperConfig, RowWrite, Value};

#[tokio::test]
async fn test_batch_flushes_one_mutator_per_touched_row_group() {
    let fx = fixture();
    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();
    fx.store.clear_events().await;

    fx.manager.start_batch(&managed).await.unwrap();
    assert!(managed.has_open_batch());
    managed.set("name", "alicia").unwrap();
    managed.set_join("home", address(10, "Paris")).unwrap();
    let report = fx.manager.end_batch(&managed).await.unwrap();

    assert_eq!(report.row_groups(), vec!["users", "addresses"]);
    assert_eq!(report.total_writes(), 2);
    assert_eq!(report.flushed[0].property, None);
    assert_eq!(report.flushed[1].property.as_deref(), Some("home"));

    let flushes = fx.store.flushes().await;
    assert_eq!(
        flushes,
        vec![
            (
                "users".to_string(),
                vec![RowWrite::Put {
                    key: Value::from(1),
                    columns: columns(&[
                        ("full_name", Value::from("alicia")),
                        ("home", Value::from(10)),
                    ]),
                }],
            ),
            (
                "addresses".to_string(),
                vec![RowWrite::Put {
                    key: Value::from(10),
                    columns: columns(&[("city", Value::from("Paris")), ("country", Value::Null)]),
                }],
            ),
        ]
    );
    assert!(fx.store.direct_writes().await.is_empty());
    assert!(!managed.has_open_batch());
    assert!(managed.dirty_properties().is_empty());
}

#[tokio::test]
async fn test_merge_inside_batch_is_accumulated() {
    let fx = fixture();
    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();
    fx.store.clear_events().await;

    fx.manager.start_batch(&managed).await.unwrap();
    managed.set("age", 40).unwrap();
    fx.manager.merge(&managed).await.unwrap();

    assert!(fx.store.events().await.is_empty());
    let row = fx.store.row("users", &Value::from(1)).await.unwrap();
    assert!(!row.contains_key("age"));

    let report = fx.manager.end_batch(&managed).await.unwrap();
    assert_eq!(report.total_writes(), 1);
    let row = fx.store.row("users", &Value::from(1)).await.unwrap();
    assert_eq!(row.get("age"), Some(&Value::from(40)));
}

#[tokio::test]
async fn test_remove_inside_batch_is_accumulated() {
    let fx = fixture();
    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();
    fx.store.clear_events().await;

    fx.manager.start_batch(&managed).await.unwrap();
    fx.manager.remove(&managed).await.unwrap();
    assert!(managed.is_removed());
    assert!(fx.store.row("users", &Value::from(1)).await.is_some());

    let report = fx.manager.end_batch(&managed).await.unwrap();
    assert_eq!(report.row_groups(), vec!["users"]);
    assert!(fx.store.row("users", &Value::from(1)).await.is_none());
    assert_eq!(
        fx.store.flushes().await[0].1,
        vec![RowWrite::Delete { key: Value::from(1) }]
    );
}

#[tokio::test]
async fn test_batch_preconditions() {
    let fx = fixture();

    let transient = fx.manager.start_batch(user(1, "alice")).await;
    assert!(matches!(transient, Err(MapError::NotManaged(_))));

    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();
    let not_open = fx.manager.end_batch(&managed).await.unwrap_err();
    assert!(matches!(not_open, MapError::NoActiveBatch { .. }));
    assert!(not_open.is_precondition());

    fx.manager.start_batch(&managed).await.unwrap();
    let twice = fx.manager.start_batch(&managed).await.unwrap_err();
    assert!(matches!(twice, MapError::BatchAlreadyOpen { .. }));
    assert!(twice.is_precondition());
    assert!(managed.has_open_batch());

    fx.manager.end_batch(&managed).await.unwrap();
    fx.manager.remove(&managed).await.unwrap();
    let removed = fx.manager.start_batch(&managed).await;
    assert!(matches!(removed, Err(MapError::NotManaged(_))));
}

#[tokio::test]
async fn test_flush_failures_are_collected() {
    let fx = fixture();
    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();

    fx.manager.start_batch(&managed).await.unwrap();
    managed.set("name", "alicia").unwrap();
    managed.set_join("home", address(10, "Paris")).unwrap();
    fx.store.fail_row_group("addresses").await;

    let err = fx.manager.end_batch(&managed).await.unwrap_err();
    assert!(err.is_store_failure());
    match err {
        MapError::BatchFlush { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].row_group, "addresses");
        }
        other => panic!("unexpected error: {}", other),
    }

    // the base mutator was still flushed, and the batch is closed
    let row = fx.store.row("users", &Value::from(1)).await.unwrap();
    assert_eq!(row.get("full_name"), Some(&Value::from("alicia")));
    assert!(fx.store.row("addresses", &Value::from(10)).await.is_none());
    assert!(!managed.has_open_batch());

    // the lost writes are not replayed by the next batch
    fx.store.recover_row_group("addresses").await;
    fx.manager.start_batch(&managed).await.unwrap();
    let report = fx.manager.end_batch(&managed).await.unwrap();
    assert_eq!(report.total_writes(), 0);
    assert!(fx.store.row("addresses", &Value::from(10)).await.is_none());
}

#[tokio::test]
async fn test_failed_routing_keeps_batch_open() {
    let fx = fixture();
    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();

    fx.manager.start_batch(&managed).await.unwrap();
    managed
        .set_join("home", rowmapper::Entity::new("Address").with("id", 10).with("zip", 1))
        .unwrap();

    let err = fx.manager.end_batch(&managed).await.unwrap_err();
    assert!(matches!(err, MapError::UnknownProperty { .. }));
    assert!(managed.has_open_batch());

    managed.clear_join("home").unwrap();
    fx.manager.end_batch(&managed).await.unwrap();
    assert_eq!(fx.store.direct_writes().await.len(), 1);
}

#[tokio::test]
async fn test_empty_mutators_flush_when_configured() {
    let fx = fixture_with(MapperConfig::new().flush_empty_mutators(true));
    let managed = fx.manager.persist(user(1, "alice")).await.unwrap();

    fx.manager.start_batch(&managed).await.unwrap();
    let report = fx.manager.end_batch(&managed).await.unwrap();

    // users, addresses, and countries reached through home.country
    assert_eq!(report.flushed.len(), 3);
    assert_eq!(report.total_writes(), 0);
    assert_eq!(report.flushed[2].property.as_deref(), Some("home.country"));

    let quiet = fixture();
    let managed = quiet.manager.persist(user(1, "alice")).await.unwrap();
    quiet.manager.start_batch(&managed).await.unwrap();
    let report = quiet.manager.end_batch(&managed).await.unwrap();
    assert!(report.flushed.is_empty());
    assert!(quiet.store.flushes().await.is_empty());
}
