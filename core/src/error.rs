//! Error types for the todo engine.
//!
//! # Design
//! `NotFound` is the only failure the engine itself decides on, and it
//! carries the requested id so callers can report which record was missing.
//! Validation and store failures come from collaborators and are wrapped
//! unchanged.

use thiserror::Error;

use crate::types::TodoId;
use crate::validation::ValidationError;

/// Errors returned by `TodoService` operations.
#[derive(Debug, Error)]
pub enum TodoError {
    /// No todo with this id exists in the store.
    #[error("todo not found with id {id}")]
    NotFound { id: TodoId },

    /// The input failed field validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by a `RecordStore` backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}
