//! HTTP surface for the todo engine.
//!
//! # Routes
//! | method | path | success |
//! |--------|------|---------|
//! | GET    | `/api/todos?search=&completed=&sortBy=` | 200 list |
//! | POST   | `/api/todos` | 201 created todo |
//! | GET    | `/api/todos/{id}` | 200 todo |
//! | PATCH  | `/api/todos/{id}` | 200 todo, status only |
//! | PUT    | `/api/todos/{id}` | 200 todo, full update |
//! | DELETE | `/api/todos/{id}` | 204 |
//! | GET    | `/health` | 200 |
//!
//! Handlers only translate between HTTP and `TodoService`; all decisions
//! happen in `todo-core`. The router is generic over the record store, so
//! the same routes serve `MemoryStore` and `SqliteStore`.

pub mod config;
pub mod error;

use std::future::Future;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use todo_core::{
    CreateTodo, FullUpdateTodo, ListQuery, MemoryStore, RecordStore, SortBy, SqliteStore,
    StoreError, Todo, TodoId, TodoService, UpdateStatus,
};

pub use config::{Config, ConfigError};
pub use error::{ApiErrorResponse, ErrorBody};

/// Query string accepted by the list endpoint. Values arrive as raw text;
/// an empty value means the parameter was not given.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub search: Option<String>,
    pub completed: Option<String>,
    pub sort_by: Option<String>,
}

impl TryFrom<ListParams> for ListQuery {
    type Error = ApiErrorResponse;

    fn try_from(params: ListParams) -> Result<Self, Self::Error> {
        Ok(ListQuery {
            search: params.search,
            completed: parse_completed(params.completed.as_deref())?,
            sort_by: SortBy::from_param(params.sort_by.as_deref()),
        })
    }
}

/// `true` / `false` in any ASCII case. Blank means no completion filter.
fn parse_completed(raw: Option<&str>) -> Result<Option<bool>, ApiErrorResponse> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if value.eq_ignore_ascii_case("true") {
        Ok(Some(true))
    } else if value.eq_ignore_ascii_case("false") {
        Ok(Some(false))
    } else {
        Err(ApiErrorResponse::invalid_parameter(format!(
            "completed must be true or false, got '{value}'"
        )))
    }
}

/// Router backed by a fresh, empty in-memory store.
pub fn app() -> Router {
    router(TodoService::new(MemoryStore::new()))
}

/// Router over the store `config` selects: SQLite at `DATABASE_URL` when it
/// is set, a fresh in-memory store otherwise.
pub async fn build_app(config: &Config) -> Result<Router, StoreError> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = SqliteStore::connect(url).await?;
            tracing::info!("using sqlite record store");
            Ok(router(TodoService::new(store)))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory record store");
            Ok(app())
        }
    }
}

pub fn router<S: RecordStore>(service: TodoService<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/todos", get(list_todos::<S>).post(create_todo::<S>))
        .route(
            "/api/todos/{id}",
            get(get_todo::<S>)
                .patch(update_status::<S>)
                .put(full_update::<S>)
                .delete(delete_todo::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve a fresh in-memory app until the process exits.
pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, app(), std::future::pending()).await
}

/// Serve `app` until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn list_todos<S: RecordStore>(
    State(service): State<TodoService<S>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Todo>>, ApiErrorResponse> {
    let query = ListQuery::try_from(params)?;
    let todos = service.list(&query).await?;
    Ok(Json(todos))
}

async fn create_todo<S: RecordStore>(
    State(service): State<TodoService<S>>,
    Json(input): Json<CreateTodo>,
) -> Result<(StatusCode, Json<Todo>), ApiErrorResponse> {
    let todo = service.create(input).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

async fn get_todo<S: RecordStore>(
    State(service): State<TodoService<S>>,
    Path(id): Path<TodoId>,
) -> Result<Json<Todo>, ApiErrorResponse> {
    Ok(Json(service.get(id).await?))
}

async fn update_status<S: RecordStore>(
    State(service): State<TodoService<S>>,
    Path(id): Path<TodoId>,
    Json(input): Json<UpdateStatus>,
) -> Result<Json<Todo>, ApiErrorResponse> {
    Ok(Json(service.update_status(id, input).await?))
}

async fn full_update<S: RecordStore>(
    State(service): State<TodoService<S>>,
    Path(id): Path<TodoId>,
    Json(input): Json<FullUpdateTodo>,
) -> Result<Json<Todo>, ApiErrorResponse> {
    Ok(Json(service.full_update(id, input).await?))
}

async fn delete_todo<S: RecordStore>(
    State(service): State<TodoService<S>>,
    Path(id): Path<TodoId>,
) -> Result<StatusCode, ApiErrorResponse> {
    service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
