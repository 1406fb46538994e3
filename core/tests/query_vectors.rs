//! Run the query resolver against JSON cases stored in `test-vectors/`.
//!
//! Every case shares one fixture of five todos. Each case gives raw list
//! parameters the way an HTTP caller would send them and the ids it expects
//! back, in order. The same cases run against both bundled stores.

use todo_core::query::resolve;
use todo_core::{
    ListQuery, MemoryStore, RecordStore, SortBy, SqliteStore, StoreTransaction, Todo,
};

fn load_vectors() -> serde_json::Value {
    let raw = include_str!("../../test-vectors/query.json");
    serde_json::from_str(raw).unwrap()
}

async fn seed<S: RecordStore>(store: &S, vectors: &serde_json::Value) {
    let todos: Vec<Todo> = serde_json::from_value(vectors["todos"].clone()).unwrap();
    let mut tx = store.begin().await.unwrap();
    for todo in todos {
        tx.save(todo).await.unwrap();
    }
    tx.commit().await.unwrap();
}

/// Build a `ListQuery` from the raw `search` / `completed` / `sortBy` keys.
fn parse_query(raw: &serde_json::Value) -> ListQuery {
    ListQuery {
        search: raw["search"].as_str().map(str::to_string),
        completed: raw["completed"].as_bool(),
        sort_by: SortBy::from_param(raw["sortBy"].as_str()),
    }
}

async fn check_cases<S: RecordStore>(store: &S, vectors: &serde_json::Value, label: &str) {
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let query = parse_query(&case["query"]);
        let expected: Vec<i64> = serde_json::from_value(case["expected_ids"].clone()).unwrap();

        let ids: Vec<i64> = resolve(store, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|todo| todo.id)
            .collect();
        assert_eq!(ids, expected, "{label}: {name}");
    }
}

#[tokio::test]
async fn query_test_vectors_memory() {
    let vectors = load_vectors();
    let store = MemoryStore::new();
    seed(&store, &vectors).await;
    check_cases(&store, &vectors, "memory").await;
}

#[tokio::test]
async fn query_test_vectors_sqlite() {
    let vectors = load_vectors();
    let store = SqliteStore::in_memory().await.unwrap();
    seed(&store, &vectors).await;
    check_cases(&store, &vectors, "sqlite").await;
}

#[tokio::test]
async fn resolving_twice_gives_identical_results() {
    let vectors = load_vectors();
    let store = MemoryStore::new();
    seed(&store, &vectors).await;

    for sort_by in [SortBy::CreatedAt, SortBy::UpdatedAt, SortBy::Priority] {
        let query = ListQuery::new().sort_by(sort_by);
        let first = resolve(&store, &query).await.unwrap();
        let second = resolve(&store, &query).await.unwrap();
        assert_eq!(first, second, "{sort_by:?}");
        assert_eq!(first.len(), 5);
    }
}
