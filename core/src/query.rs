//! Query resolution: search + completion filter + sort mode.
//!
//! # Design
//! A `ListQuery` is turned into a `TodoFilter` by `TodoFilter::from_query`,
//! which normalizes the raw inputs once (trim, lowercase, drop blank search
//! terms). The filter is a plain value with a `matches` predicate, so the
//! matching rules can be tested without any store at all. Stores that query
//! a database read its parts through `needle` and `completed` instead.
//!
//! Ordering is applied by `sort_todos` with a stable sort. Records the sort
//! key cannot separate keep the order the store produced them in.

use std::cmp::Ordering;

use crate::error::StoreError;
use crate::store::RecordStore;
use crate::types::{Priority, Todo};

/// Sort mode for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Newest first by creation time.
    CreatedAt,
    /// Most recently modified first.
    #[default]
    UpdatedAt,
    /// HIGH, then MEDIUM, then LOW; most recently modified first within a rank.
    Priority,
}

impl SortBy {
    /// Parse the `sortBy` request parameter. Matching ignores ASCII case;
    /// anything unrecognized, including an absent value, means `UpdatedAt`.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("createdAt") => SortBy::CreatedAt,
            Some(v) if v.eq_ignore_ascii_case("priority") => SortBy::Priority,
            _ => SortBy::UpdatedAt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortBy::CreatedAt => "createdAt",
            SortBy::UpdatedAt => "updatedAt",
            SortBy::Priority => "priority",
        }
    }
}

/// Raw list parameters as a caller supplies them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub completed: Option<bool>,
    pub sort_by: SortBy,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }
}

/// Composed filter predicate. Both parts must hold for a record to match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoFilter {
    /// Lowercased, trimmed search needle. `None` matches everything.
    needle: Option<String>,
    completed: Option<bool>,
}

impl TodoFilter {
    /// Build the filter for a query. A blank search term means no search.
    pub fn from_query(query: &ListQuery) -> Self {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase);
        Self {
            needle,
            completed: query.completed,
        }
    }

    /// The filter that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn needle(&self) -> Option<&str> {
        self.needle.as_deref()
    }

    /// Required completion state, if any.
    pub fn completed(&self) -> Option<bool> {
        self.completed
    }

    pub fn matches(&self, todo: &Todo) -> bool {
        self.matches_completed(todo) && self.matches_search(todo)
    }

    fn matches_completed(&self, todo: &Todo) -> bool {
        self.completed.map_or(true, |wanted| todo.completed == wanted)
    }

    fn matches_search(&self, todo: &Todo) -> bool {
        let Some(needle) = self.needle.as_deref() else {
            return true;
        };
        contains_ignore_case(&todo.title, needle)
            || todo
                .description
                .as_deref()
                .is_some_and(|description| contains_ignore_case(description, needle))
    }
}

fn contains_ignore_case(haystack: &str, lowered_needle: &str) -> bool {
    haystack.to_lowercase().contains(lowered_needle)
}

/// Rank used by `SortBy::Priority`. Looked up explicitly so the order does
/// not depend on how `Priority` variants are declared.
pub(crate) const PRIORITY_RANKS: [(Priority, u8); 3] = [
    (Priority::High, 0),
    (Priority::Medium, 1),
    (Priority::Low, 2),
];

/// Rank for any priority missing from `PRIORITY_RANKS`.
pub(crate) const UNRANKED: u8 = 3;

pub fn priority_rank(priority: Priority) -> u8 {
    PRIORITY_RANKS
        .iter()
        .find(|(p, _)| *p == priority)
        .map_or(UNRANKED, |(_, rank)| *rank)
}

fn compare(a: &Todo, b: &Todo, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::CreatedAt => b.created_at.cmp(&a.created_at),
        SortBy::UpdatedAt => b.updated_at.cmp(&a.updated_at),
        SortBy::Priority => priority_rank(a.priority)
            .cmp(&priority_rank(b.priority))
            .then_with(|| b.updated_at.cmp(&a.updated_at)),
    }
}

/// Order records in place according to `sort_by`. The sort is stable.
pub fn sort_todos(todos: &mut [Todo], sort_by: SortBy) {
    todos.sort_by(|a, b| compare(a, b, sort_by));
}

/// Resolve a list query against a store.
pub async fn resolve<S: RecordStore>(
    store: &S,
    query: &ListQuery,
) -> Result<Vec<Todo>, StoreError> {
    let filter = TodoFilter::from_query(query);
    store.find_all(&filter, query.sort_by).await
}
