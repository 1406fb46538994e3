//! Query resolution and mutation engine for todo records.
//!
//! # Overview
//! `TodoService` answers list queries (search term, completion filter, sort
//! mode) and applies single-record mutations (create, status update, full
//! update, delete) against any `RecordStore`. Two stores ship with the
//! crate: `MemoryStore` and the durable `SqliteStore`.
//!
//! # Design
//! - Matching rules live in `TodoFilter`, built once per query by
//!   `TodoFilter::from_query`, so they can be tested with no store attached.
//! - Priority order comes from an explicit rank table, not from the order
//!   `Priority` variants happen to be declared in.
//! - Each mutation runs in one store transaction: the existence check and
//!   the write cannot be split by a concurrent delete.
//! - Timestamps come from an injectable `Clock`.

pub mod clock;
pub mod error;
pub mod query;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, TodoError};
pub use query::{priority_rank, ListQuery, SortBy, TodoFilter};
pub use service::TodoService;
pub use sqlite::{SqliteStore, SqliteTransaction};
pub use store::{MemoryStore, MemoryTransaction, RecordStore, StoreTransaction};
pub use types::{CreateTodo, FullUpdateTodo, NewTodo, Priority, Todo, TodoId, UpdateStatus};
pub use validation::{FieldError, ValidationError};
