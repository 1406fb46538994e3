//! SQLite-backed record store.
//!
//! # Design
//! Each row keeps a lowercased copy of its title and description next to the
//! originals, written with the same `str::to_lowercase` that `TodoFilter`
//! applies to the search term. Search is then a plain `instr` on those
//! columns, so it folds case exactly like `MemoryStore` does, including
//! non-ASCII text.
//!
//! Timestamps are stored as RFC 3339 text with nine fractional digits and a
//! `Z` suffix. That form has a fixed width, so text order is time order and
//! `ORDER BY` needs no conversion.
//!
//! Writes run in a `SqliteTransaction`. An async mutex held for the life of
//! the transaction keeps writers in this process from interleaving, which
//! would otherwise surface as `SQLITE_BUSY` on lock upgrade.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Executor, QueryBuilder, Row, Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::StoreError;
use crate::query::{SortBy, TodoFilter, PRIORITY_RANKS, UNRANKED};
use crate::store::{RecordStore, StoreTransaction};
use crate::types::{NewTodo, Priority, Todo, TodoId};

const MAX_CONNECTIONS: u32 = 5;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS todos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        title_folded TEXT NOT NULL,
        description TEXT,
        description_folded TEXT,
        completed INTEGER NOT NULL DEFAULT 0,
        priority TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

const SELECT_TODOS: &str =
    "SELECT id, title, description, completed, priority, created_at, updated_at FROM todos";

const SELECT_BY_ID: &str = "SELECT id, title, description, completed, priority, created_at, \
     updated_at FROM todos WHERE id = ?";

const EXISTS_BY_ID: &str = "SELECT EXISTS(SELECT 1 FROM todos WHERE id = ?)";

const INSERT_TODO: &str = r#"
    INSERT INTO todos
        (title, title_folded, description, description_folded, completed, priority,
         created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPSERT_TODO: &str = r#"
    INSERT INTO todos
        (id, title, title_folded, description, description_folded, completed, priority,
         created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        title_folded = excluded.title_folded,
        description = excluded.description,
        description_folded = excluded.description_folded,
        completed = excluded.completed,
        priority = excluded.priority,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at
"#;

const DELETE_BY_ID: &str = "DELETE FROM todos WHERE id = ?";

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Record store over a SQLite database file (or an in-memory database).
/// Clones share the pool and the writer lock.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open the database at `url` (for example `sqlite://todos.db`), creating
    /// the file and the `todos` table when they do not exist yet.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let in_memory = is_in_memory(url);
        let mut options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives exactly as long as its one connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        debug!(url, in_memory, "opened sqlite store");

        Ok(Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// A private database that disappears when the store is dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Close every pooled connection, waiting for checked-out ones.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait]
impl RecordStore for SqliteStore {
    type Tx = SqliteTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(SqliteTransaction {
            tx,
            _writer: writer,
        })
    }

    async fn find_by_id(&self, id: TodoId) -> Result<Option<Todo>, StoreError> {
        fetch_by_id(&self.pool, id).await
    }

    async fn find_all(&self, filter: &TodoFilter, order: SortBy) -> Result<Vec<Todo>, StoreError> {
        let mut query = select_matching(filter, order);
        debug!(sql = query.sql(), "querying todos");
        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(todo_from_row).collect()
    }

    async fn exists_by_id(&self, id: TodoId) -> Result<bool, StoreError> {
        fetch_exists(&self.pool, id).await
    }
}

/// Write transaction over a `SqliteStore`. Rolled back if dropped without
/// `commit`.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    // Declared after `tx` so the rollback is issued before the lock is freed.
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn insert(&mut self, todo: NewTodo) -> Result<Todo, StoreError> {
        let columns = Columns::new(
            &todo.title,
            todo.description.as_deref(),
            todo.completed,
            todo.priority,
            todo.created_at,
            todo.updated_at,
        );
        let result = columns
            .bind(sqlx::query(INSERT_TODO))
            .execute(&mut *self.tx)
            .await?;
        Ok(todo.with_id(result.last_insert_rowid()))
    }

    async fn find_by_id(&mut self, id: TodoId) -> Result<Option<Todo>, StoreError> {
        fetch_by_id(&mut *self.tx, id).await
    }

    async fn exists_by_id(&mut self, id: TodoId) -> Result<bool, StoreError> {
        fetch_exists(&mut *self.tx, id).await
    }

    async fn delete_by_id(&mut self, id: TodoId) -> Result<(), StoreError> {
        sqlx::query(DELETE_BY_ID)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn save(&mut self, todo: Todo) -> Result<Todo, StoreError> {
        let columns = Columns::new(
            &todo.title,
            todo.description.as_deref(),
            todo.completed,
            todo.priority,
            todo.created_at,
            todo.updated_at,
        );
        columns
            .bind(sqlx::query(UPSERT_TODO).bind(todo.id))
            .execute(&mut *self.tx)
            .await?;
        Ok(todo)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Column values of one row, in the order `INSERT_TODO` lists them.
struct Columns {
    title: String,
    title_folded: String,
    description: Option<String>,
    description_folded: Option<String>,
    completed: bool,
    priority: &'static str,
    created_at: String,
    updated_at: String,
}

impl Columns {
    fn new(
        title: &str,
        description: Option<&str>,
        completed: bool,
        priority: Priority,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.to_string(),
            title_folded: title.to_lowercase(),
            description: description.map(str::to_string),
            description_folded: description.map(str::to_lowercase),
            completed,
            priority: priority_column(priority),
            created_at: timestamp_column(created_at),
            updated_at: timestamp_column(updated_at),
        }
    }

    fn bind<'q>(
        self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.title)
            .bind(self.title_folded)
            .bind(self.description)
            .bind(self.description_folded)
            .bind(self.completed)
            .bind(self.priority)
            .bind(self.created_at)
            .bind(self.updated_at)
    }
}

/// `SELECT` for `filter`, ordered by `order` with id as the final tiebreak.
/// Every filter value and rank is a bound parameter.
fn select_matching(filter: &TodoFilter, order: SortBy) -> QueryBuilder<'static, Sqlite> {
    let mut query = QueryBuilder::new(SELECT_TODOS);

    let mut keyword = " WHERE ";
    if let Some(completed) = filter.completed() {
        query.push(keyword).push("completed = ").push_bind(completed);
        keyword = " AND ";
    }
    if let Some(needle) = filter.needle() {
        query
            .push(keyword)
            .push("(instr(title_folded, ")
            .push_bind(needle.to_string())
            .push(") > 0 OR instr(description_folded, ")
            .push_bind(needle.to_string())
            .push(") > 0)");
    }

    query.push(" ORDER BY ");
    match order {
        SortBy::CreatedAt => {
            query.push("created_at DESC");
        }
        SortBy::UpdatedAt => {
            query.push("updated_at DESC");
        }
        SortBy::Priority => {
            query.push("CASE priority");
            for (priority, rank) in PRIORITY_RANKS {
                query
                    .push(" WHEN ")
                    .push_bind(priority_column(priority))
                    .push(" THEN ")
                    .push_bind(i64::from(rank));
            }
            query
                .push(" ELSE ")
                .push_bind(i64::from(UNRANKED))
                .push(" END, updated_at DESC");
        }
    }
    query.push(", id ASC");
    query
}

async fn fetch_by_id<'e, E>(executor: E, id: TodoId) -> Result<Option<Todo>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(SELECT_BY_ID)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(todo_from_row).transpose()
}

async fn fetch_exists<'e, E>(executor: E, id: TodoId) -> Result<bool, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found: i64 = sqlx::query_scalar(EXISTS_BY_ID)
        .bind(id)
        .fetch_one(executor)
        .await?;
    Ok(found != 0)
}

fn todo_from_row(row: &SqliteRow) -> Result<Todo, StoreError> {
    let priority: String = row.try_get("priority")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Todo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        completed: row.try_get("completed")?,
        priority: priority_from_column(&priority)?,
        created_at: timestamp_from_column(&created_at)?,
        updated_at: timestamp_from_column(&updated_at)?,
    })
}

fn priority_column(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "HIGH",
        Priority::Medium => "MEDIUM",
        Priority::Low => "LOW",
    }
}

fn priority_from_column(raw: &str) -> Result<Priority, StoreError> {
    match raw {
        "HIGH" => Ok(Priority::High),
        "MEDIUM" => Ok(Priority::Medium),
        "LOW" => Ok(Priority::Low),
        other => Err(StoreError::Backend(format!(
            "unknown priority '{other}' in todos table"
        ))),
    }
}

fn timestamp_column(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn timestamp_from_column(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| StoreError::Backend(format!("bad timestamp '{raw}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ListQuery;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn new_todo(title: &str, description: Option<&str>, priority: Priority) -> NewTodo {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        NewTodo {
            title: title.to_string(),
            description: description.map(str::to_string),
            completed: false,
            priority,
            created_at: at,
            updated_at: at,
        }
    }

    async fn insert(store: &SqliteStore, todo: NewTodo) -> Todo {
        let mut tx = store.begin().await.unwrap();
        let todo = tx.insert(todo).await.unwrap();
        tx.commit().await.unwrap();
        todo
    }

    async fn save(store: &SqliteStore, todo: Todo) {
        let mut tx = store.begin().await.unwrap();
        tx.save(todo).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn ids(todos: &[Todo]) -> Vec<TodoId> {
        todos.iter().map(|t| t.id).collect()
    }

    // ---------------------------------------------------------------------------
    // SQL shape
    // ---------------------------------------------------------------------------

    #[test]
    fn filter_values_are_bound_not_inlined() {
        let filter = TodoFilter::from_query(&ListQuery::new().search("O'Brien").completed(true));
        let query = select_matching(&filter, SortBy::Priority);
        let sql = query.sql();
        assert!(!sql.to_lowercase().contains("brien"), "{sql}");
        assert!(!sql.contains("HIGH"), "{sql}");
        assert!(sql.contains(" WHERE completed = ? AND (instr(title_folded, ?)"), "{sql}");
        assert!(sql.contains("CASE priority WHEN ? THEN ?"), "{sql}");
        assert!(sql.ends_with("END, updated_at DESC, id ASC"), "{sql}");
    }

    #[rstest]
    #[case(SortBy::CreatedAt, " ORDER BY created_at DESC, id ASC")]
    #[case(SortBy::UpdatedAt, " ORDER BY updated_at DESC, id ASC")]
    fn unfiltered_query_has_no_where_clause(#[case] order: SortBy, #[case] tail: &str) {
        let query = select_matching(&TodoFilter::all(), order);
        assert_eq!(query.sql(), format!("{SELECT_TODOS}{tail}"));
    }

    #[test]
    fn timestamps_keep_nanoseconds_and_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = early + Duration::nanoseconds(1);
        assert!(timestamp_column(early) < timestamp_column(late));
        assert_eq!(timestamp_from_column(&timestamp_column(late)).unwrap(), late);
    }

    #[test]
    fn unknown_priority_column_is_a_store_error() {
        assert!(matches!(
            priority_from_column("URGENT"),
            Err(StoreError::Backend(_))
        ));
    }

    // ---------------------------------------------------------------------------
    // Store behavior
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn insert_then_find_by_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let created = insert(
            &store,
            new_todo("Buy milk", Some("for breakfast"), Priority::High),
        )
        .await;

        assert_eq!(created.id, 1);
        assert_eq!(store.find_by_id(created.id).await.unwrap(), Some(created.clone()));
        assert!(store.exists_by_id(created.id).await.unwrap());
        assert!(!store.exists_by_id(created.id + 1).await.unwrap());
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_deleting_the_newest() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = insert(&store, new_todo("a", None, Priority::Low)).await;

        let mut tx = store.begin().await.unwrap();
        tx.delete_by_id(first.id).await.unwrap();
        tx.commit().await.unwrap();

        let second = insert(&store, new_todo("b", None, Priority::Low)).await;
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let kept = insert(&store, new_todo("kept", None, Priority::Medium)).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(new_todo("lost", None, Priority::Medium))
            .await
            .unwrap();
        tx.delete_by_id(kept.id).await.unwrap();
        assert!(!tx.exists_by_id(kept.id).await.unwrap());
        drop(tx);

        let all = store
            .find_all(&TodoFilter::all(), SortBy::UpdatedAt)
            .await
            .unwrap();
        assert_eq!(all, vec![kept]);
    }

    #[tokio::test]
    async fn save_upserts_by_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut todo = insert(&store, new_todo("draft", Some("old"), Priority::Low)).await;
        todo.title = "final".to_string();
        todo.description = None;
        todo.completed = true;
        save(&store, todo.clone()).await;

        assert_eq!(store.find_by_id(todo.id).await.unwrap(), Some(todo));
        let all = store
            .find_all(&TodoFilter::all(), SortBy::UpdatedAt)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[rstest]
    #[case("MILK", vec![1])]
    #[case("breakfast", vec![1])]
    #[case("BRÛLÉE", vec![2])]
    #[case("100%", vec![3])]
    #[case("_", vec![])]
    #[case("milkshake", vec![])]
    #[tokio::test]
    async fn search_folds_case_over_title_and_description(
        #[case] term: &str,
        #[case] expected: Vec<TodoId>,
    ) {
        let store = SqliteStore::in_memory().await.unwrap();
        insert(&store, new_todo("Buy milk", Some("for breakfast"), Priority::Low)).await;
        insert(&store, new_todo("Crème brûlée", None, Priority::Low)).await;
        insert(&store, new_todo("Charge phone", Some("to 100%"), Priority::Low)).await;

        let filter = TodoFilter::from_query(&ListQuery::new().search(term));
        let found = store.find_all(&filter, SortBy::UpdatedAt).await.unwrap();
        assert_eq!(ids(&found), expected);
    }

    #[tokio::test]
    async fn completed_filter_composes_with_search() {
        let store = SqliteStore::in_memory().await.unwrap();
        let open = insert(&store, new_todo("Team meeting", None, Priority::Low)).await;
        let done = insert(&store, new_todo("Board meeting", None, Priority::Low)).await;
        insert(&store, new_todo("Lunch", None, Priority::Low)).await;
        save(
            &store,
            Todo {
                completed: true,
                ..done.clone()
            },
        )
        .await;

        let filter = TodoFilter::from_query(&ListQuery::new().search("meeting").completed(true));
        let found = store.find_all(&filter, SortBy::UpdatedAt).await.unwrap();
        assert_eq!(ids(&found), vec![done.id]);

        let filter = TodoFilter::from_query(&ListQuery::new().completed(false));
        let found = store.find_all(&filter, SortBy::UpdatedAt).await.unwrap();
        assert_eq!(ids(&found), vec![open.id, 3]);
    }

    #[tokio::test]
    async fn priority_order_ranks_then_recency_then_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for (id, priority, offset) in [
            (1, Priority::Low, 40),
            (2, Priority::High, 10),
            (3, Priority::Medium, 30),
            (4, Priority::High, 20),
            (5, Priority::High, 20),
        ] {
            let at = base + Duration::seconds(offset);
            let todo = NewTodo {
                created_at: at,
                updated_at: at,
                ..new_todo("t", None, priority)
            };
            save(&store, todo.with_id(id)).await;
        }

        let found = store
            .find_all(&TodoFilter::all(), SortBy::Priority)
            .await
            .unwrap();
        assert_eq!(ids(&found), vec![4, 5, 2, 3, 1]);

        let found = store
            .find_all(&TodoFilter::all(), SortBy::UpdatedAt)
            .await
            .unwrap();
        assert_eq!(ids(&found), vec![1, 3, 4, 5, 2]);
    }
}
