//! Record store seam and the in-memory implementation.
//!
//! # Design
//! Reads go straight to the store. Writes go through a `StoreTransaction`
//! opened with `RecordStore::begin`: the service runs a whole mutation
//! (existence check, change, save) inside one transaction and commits it at
//! the end. A transaction dropped without `commit` leaves the store as it
//! was. Backends serialize their transactions, so a record checked inside
//! one cannot be deleted by another before the first commits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::error::StoreError;
use crate::query::{sort_todos, SortBy, TodoFilter};
use crate::types::{NewTodo, Todo, TodoId};

/// Durable keyed storage for todos with predicate lookup.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Open a write transaction. Waits for any other open transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn find_by_id(&self, id: TodoId) -> Result<Option<Todo>, StoreError>;

    /// Every record matching `filter`, ordered by `order`. Records the order
    /// cannot separate come back in ascending id order.
    async fn find_all(&self, filter: &TodoFilter, order: SortBy) -> Result<Vec<Todo>, StoreError>;

    async fn exists_by_id(&self, id: TodoId) -> Result<bool, StoreError>;
}

/// One unit of writes against a `RecordStore`.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Persist a new record, assigning it a fresh id.
    async fn insert(&mut self, todo: NewTodo) -> Result<Todo, StoreError>;

    async fn find_by_id(&mut self, id: TodoId) -> Result<Option<Todo>, StoreError>;

    async fn exists_by_id(&mut self, id: TodoId) -> Result<bool, StoreError>;

    /// Remove a record. Removing an absent id is a no-op at this level.
    async fn delete_by_id(&mut self, id: TodoId) -> Result<(), StoreError>;

    /// Upsert by id.
    async fn save(&mut self, todo: Todo) -> Result<Todo, StoreError>;

    /// Make every write in this transaction visible.
    async fn commit(self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct MemoryState {
    todos: BTreeMap<TodoId, Todo>,
    next_id: TodoId,
}

/// `BTreeMap`-backed store. Ids start at 1 and are never handed out twice,
/// even after the record holding one is deleted. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                todos: BTreeMap::new(),
                next_id: 1,
            })),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.todos.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.todos.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.state).write_owned().await;
        let staged = MemoryState::clone(&guard);
        Ok(MemoryTransaction { guard, staged })
    }

    async fn find_by_id(&self, id: TodoId) -> Result<Option<Todo>, StoreError> {
        Ok(self.state.read().await.todos.get(&id).cloned())
    }

    async fn find_all(&self, filter: &TodoFilter, order: SortBy) -> Result<Vec<Todo>, StoreError> {
        let state = self.state.read().await;
        let mut matched: Vec<Todo> = state
            .todos
            .values()
            .filter(|todo| filter.matches(todo))
            .cloned()
            .collect();
        sort_todos(&mut matched, order);
        Ok(matched)
    }

    async fn exists_by_id(&self, id: TodoId) -> Result<bool, StoreError> {
        Ok(self.state.read().await.todos.contains_key(&id))
    }
}

/// Write transaction over a `MemoryStore`. Holds the store's write lock and
/// applies changes to a staged copy that replaces the live data on commit.
pub struct MemoryTransaction {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert(&mut self, todo: NewTodo) -> Result<Todo, StoreError> {
        let id = self.staged.next_id;
        self.staged.next_id = id
            .checked_add(1)
            .ok_or_else(|| StoreError::Backend("todo id space exhausted".to_string()))?;
        let todo = todo.with_id(id);
        self.staged.todos.insert(id, todo.clone());
        Ok(todo)
    }

    async fn find_by_id(&mut self, id: TodoId) -> Result<Option<Todo>, StoreError> {
        Ok(self.staged.todos.get(&id).cloned())
    }

    async fn exists_by_id(&mut self, id: TodoId) -> Result<bool, StoreError> {
        Ok(self.staged.todos.contains_key(&id))
    }

    async fn delete_by_id(&mut self, id: TodoId) -> Result<(), StoreError> {
        self.staged.todos.remove(&id);
        Ok(())
    }

    async fn save(&mut self, todo: Todo) -> Result<Todo, StoreError> {
        if todo.id >= self.staged.next_id {
            self.staged.next_id = todo.id.saturating_add(1);
        }
        self.staged.todos.insert(todo.id, todo.clone());
        Ok(todo)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }
}
