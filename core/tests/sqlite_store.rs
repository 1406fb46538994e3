//! `SqliteStore` against a real database file.
//!
//! # Design
//! Each test gets its own temporary directory. Reopening means closing the
//! pool and connecting a brand new store to the same file, so nothing can
//! survive in process memory.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;
use todo_core::{
    CreateTodo, FullUpdateTodo, ListQuery, ManualClock, Priority, SortBy, SqliteStore, TodoError,
    TodoService, UpdateStatus,
};

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("todos.db").display())
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn records_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);
    let clock = clock();

    let store = SqliteStore::connect(&url).await.unwrap();
    let service = TodoService::with_clock(store.clone(), clock.clone());
    let milk = service
        .create(
            CreateTodo::new("Buy milk")
                .description("for breakfast")
                .priority(Priority::High),
        )
        .await
        .unwrap();
    clock.advance(Duration::seconds(1));
    let report = service.create(CreateTodo::new("Write report")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let done = service
        .update_status(milk.id, UpdateStatus { completed: true })
        .await
        .unwrap();
    store.close().await;
    drop(service);

    let reopened = TodoService::new(SqliteStore::connect(&url).await.unwrap());
    let all = reopened.list(&ListQuery::new()).await.unwrap();
    assert_eq!(all, vec![done.clone(), report.clone()]);
    assert_eq!(reopened.get(milk.id).await.unwrap(), done);

    let found = reopened
        .list(&ListQuery::new().search("BREAKFAST").completed(true))
        .await
        .unwrap();
    assert_eq!(found, vec![done]);

    let by_priority = reopened
        .list(&ListQuery::new().sort_by(SortBy::Priority))
        .await
        .unwrap();
    let ids: Vec<_> = by_priority.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![milk.id, report.id]);
}

#[tokio::test]
async fn deleted_id_is_not_reissued_after_reopen() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);

    let store = SqliteStore::connect(&url).await.unwrap();
    let service = TodoService::new(store.clone());
    let first = service.create(CreateTodo::new("first")).await.unwrap();
    service.delete(first.id).await.unwrap();
    store.close().await;

    let service = TodoService::new(SqliteStore::connect(&url).await.unwrap());
    let second = service.create(CreateTodo::new("second")).await.unwrap();
    assert!(second.id > first.id);
    assert!(matches!(
        service.get(first.id).await,
        Err(TodoError::NotFound { id }) if id == first.id
    ));
}

#[tokio::test]
async fn full_update_is_persisted() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);
    let clock = clock();

    let store = SqliteStore::connect(&url).await.unwrap();
    let service = TodoService::with_clock(store.clone(), clock.clone());
    let created = service
        .create(CreateTodo::new("Draft").description("old"))
        .await
        .unwrap();
    clock.advance(Duration::minutes(2));
    let replaced = service
        .full_update(
            created.id,
            FullUpdateTodo {
                title: "Final".to_string(),
                description: None,
                priority: Priority::Low,
            },
        )
        .await
        .unwrap();
    store.close().await;

    let service = TodoService::new(SqliteStore::connect(&url).await.unwrap());
    let stored = service.get(created.id).await.unwrap();
    assert_eq!(stored, replaced);
    assert_eq!(stored.description, None);
    assert_eq!(stored.created_at, created.created_at);
}

#[tokio::test]
async fn concurrent_writers_on_one_file_never_resurrect_a_record() {
    let dir = TempDir::new().unwrap();
    let service = TodoService::new(SqliteStore::connect(&database_url(&dir)).await.unwrap());
    let todo = service.create(CreateTodo::new("contended")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        let id = todo.id;
        handles.push(tokio::spawn(async move {
            if i == 8 {
                service.delete(id).await.map(|_| ())
            } else {
                service
                    .update_status(id, UpdateStatus { completed: i % 2 == 0 })
                    .await
                    .map(|_| ())
            }
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) | Err(TodoError::NotFound { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(service.list(&ListQuery::new()).await.unwrap().is_empty());
}
