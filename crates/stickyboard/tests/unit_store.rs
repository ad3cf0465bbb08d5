use std::sync::Arc;
use stickyboard::config::StorageConfig;
use stickyboard::{BackendKind, BoardStore, EventHub, SqliteBackend, StoreError};
use tempfile::TempDir;

fn sqlite_config(temp: &TempDir) -> StorageConfig {
    StorageConfig {
        backend: BackendKind::Sqlite,
        db_path: temp.path().join("test.db"),
        sqlite_cache_size: 1000,
        ..StorageConfig::default()
    }
}

fn open_store(config: &StorageConfig) -> BoardStore<SqliteBackend> {
    let backend = SqliteBackend::open(&config.db_path, config).unwrap();
    BoardStore::new(Arc::new(backend))
}

#[tokio::test]
async fn test_sqlite_store_crud() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&sqlite_config(&temp));

    let sticky = store.add_sticky("demo", "hi", 10, 20).await.unwrap();
    assert_eq!(sticky.id, 1);
    assert_eq!(sticky.board_id, "demo");
    assert_eq!(store.get_sticky(sticky.id, "demo").await.unwrap(), sticky);

    let updated = store
        .update_sticky("demo", sticky.id, "bye", 15, 25)
        .await
        .unwrap();
    assert_eq!(updated.id, sticky.id);
    assert_eq!((updated.text.as_str(), updated.x, updated.y), ("bye", 15, 25));
    assert!(updated.updated_at > sticky.updated_at);

    assert_eq!(store.remove_sticky("demo", sticky.id).await.unwrap(), sticky.id);
    assert!(store.get_stickies("demo").await.unwrap().is_empty());
    assert!(
        store
            .get_sticky(sticky.id, "demo")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_sqlite_list_orders_by_last_write() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&sqlite_config(&temp));

    let a = store.add_sticky("demo", "a", 0, 0).await.unwrap();
    let b = store.add_sticky("demo", "b", 0, 0).await.unwrap();
    let c = store.add_sticky("demo", "c", 0, 0).await.unwrap();
    store.update_sticky("demo", a.id, "a2", 1, 1).await.unwrap();

    let ids: Vec<_> = store
        .get_stickies("demo")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![b.id, c.id, a.id]);
}

#[tokio::test]
async fn test_sqlite_cross_board_access_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&sqlite_config(&temp));

    let sticky = store.add_sticky("a", "private", 0, 0).await.unwrap();

    match store.update_sticky("b", sticky.id, "stolen", 0, 0).await {
        Err(StoreError::NotFound { board_id, sticky_id }) => {
            assert_eq!(board_id, "b");
            assert_eq!(sticky_id, sticky.id);
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(store.remove_sticky("b", sticky.id).await.unwrap_err().is_not_found());
    assert!(store.get_stickies("b").await.unwrap().is_empty());

    let untouched = store.get_sticky(sticky.id, "a").await.unwrap();
    assert_eq!(untouched, sticky);
}

#[tokio::test]
async fn test_sqlite_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let config = sqlite_config(&temp);

    let (removed, kept) = {
        let store = open_store(&config);
        let removed = store.add_sticky("demo", "gone", 0, 0).await.unwrap();
        let kept = store.add_sticky("demo", "kept", 3, 4).await.unwrap();
        store.remove_sticky("demo", removed.id).await.unwrap();
        (removed, kept)
    };

    let backend = SqliteBackend::open_async(config.db_path.clone(), config.clone())
        .await
        .unwrap();
    let store = BoardStore::new(Arc::new(backend));

    assert_eq!(store.get_stickies("demo").await.unwrap(), vec![kept.clone()]);

    // Ids of removed notes are never handed out again
    let fresh = store.add_sticky("demo", "fresh", 0, 0).await.unwrap();
    assert!(fresh.id > removed.id && fresh.id > kept.id);
    assert!(fresh.updated_at > kept.updated_at);
}

#[tokio::test]
async fn test_hub_over_sqlite_emits_stored_records() {
    let temp = TempDir::new().unwrap();
    let hub = EventHub::new(open_store(&sqlite_config(&temp)));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    hub.subscribe(
        "demo",
        move |event: &stickyboard::BoardEvent| -> Result<(), stickyboard::SubscriberError> {
            sink.lock().push(event.clone());
            Ok(())
        },
    );

    let sticky = hub.add_sticky("demo", "hi", 1, 2).await.unwrap();
    assert!(hub.update_sticky("demo", 99, "x", 0, 0).await.is_err());

    let events = seen.lock().clone();
    assert_eq!(events, vec![stickyboard::BoardEvent::Add(sticky)]);
}
