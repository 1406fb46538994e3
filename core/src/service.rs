//! The todo service: list queries and single-record mutations.
//!
//! # Design
//! `TodoService` holds the store behind an `Arc` and carries no other state,
//! so cloning it per request is cheap. Every mutation opens one store
//! transaction and does its existence check, change, and save inside it,
//! committing only once the whole mutation has succeeded. An early return
//! (not found, store failure) drops the transaction and nothing is written.
//!
//! `updatedAt` is stamped as `max(now, previous)` so a clock that steps
//! backwards can never make a record look older than it was.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::TodoError;
use crate::query::{self, ListQuery};
use crate::store::{RecordStore, StoreTransaction};
use crate::types::{CreateTodo, FullUpdateTodo, NewTodo, Todo, TodoId, UpdateStatus};
use crate::validation::{validate_create, validate_full_update};

pub struct TodoService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for TodoService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: RecordStore> TodoService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(store),
            clock,
        }
    }

    /// Every todo matching `query`, in the query's order.
    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Todo>, TodoError> {
        debug!(
            search = ?query.search,
            completed = ?query.completed,
            sort_by = query.sort_by.as_str(),
            "listing todos"
        );
        let todos = query::resolve(&*self.store, query).await?;
        debug!(count = todos.len(), "listed todos");
        Ok(todos)
    }

    pub async fn get(&self, id: TodoId) -> Result<Todo, TodoError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn create(&self, input: CreateTodo) -> Result<Todo, TodoError> {
        validate_create(&input)?;

        let now = self.clock.now();
        let new_todo = NewTodo {
            title: input.title,
            description: input.description,
            completed: false,
            priority: input.priority.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        let todo = tx.insert(new_todo).await?;
        tx.commit().await?;
        info!(id = todo.id, priority = %todo.priority, "created todo");
        Ok(todo)
    }

    /// Set `completed` and nothing else. Re-stamps `updatedAt` even when the
    /// value does not change.
    pub async fn update_status(&self, id: TodoId, input: UpdateStatus) -> Result<Todo, TodoError> {
        let mut tx = self.store.begin().await?;
        let mut todo = tx.find_by_id(id).await?.ok_or_else(|| not_found(id))?;

        todo.completed = input.completed;
        todo.updated_at = self.restamp(todo.updated_at);

        let todo = tx.save(todo).await?;
        tx.commit().await?;
        info!(id, completed = todo.completed, "updated todo status");
        Ok(todo)
    }

    /// Overwrite title, description, and priority. `completed` and
    /// `createdAt` are left as they are.
    pub async fn full_update(&self, id: TodoId, input: FullUpdateTodo) -> Result<Todo, TodoError> {
        validate_full_update(&input)?;

        let mut tx = self.store.begin().await?;
        let mut todo = tx.find_by_id(id).await?.ok_or_else(|| not_found(id))?;

        todo.title = input.title;
        todo.description = input.description;
        todo.priority = input.priority;
        todo.updated_at = self.restamp(todo.updated_at);

        let todo = tx.save(todo).await?;
        tx.commit().await?;
        info!(id, "updated todo");
        Ok(todo)
    }

    pub async fn delete(&self, id: TodoId) -> Result<(), TodoError> {
        let mut tx = self.store.begin().await?;
        if !tx.exists_by_id(id).await? {
            return Err(not_found(id));
        }
        tx.delete_by_id(id).await?;
        tx.commit().await?;
        info!(id, "deleted todo");
        Ok(())
    }

    fn restamp(&self, previous: DateTime<Utc>) -> DateTime<Utc> {
        self.clock.now().max(previous)
    }
}

fn not_found(id: TodoId) -> TodoError {
    warn!(id, "todo not found");
    TodoError::NotFound { id }
}
