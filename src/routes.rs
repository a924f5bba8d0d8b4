use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::db::Database;
use crate::error::NewsError;
use crate::feed::{resolve_personalized_feed, search_predicate};
use crate::ingest::Ingestor;
use crate::predicate::{Pagination, ParseSortError, Sort};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/users/:id/feed", get(user_feed))
        .route("/articles/search", get(search))
        .with_state(state)
}

// Custom error type
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<ParseSortError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        match self.0.downcast_ref::<NewsError>() {
            Some(NewsError::NotFound(_)) | Some(NewsError::UserNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, format!("Error: {}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    /// `field[:order]`, e.g. `date:desc`.
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    /// Comma-separated source ids to leave out.
    pub exclude: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshStatus {
    pub refreshing: bool,
}

fn pagination(
    limit: Option<i64>,
    offset: i64,
    sort: Option<&str>,
) -> Result<Pagination, AppError> {
    let sort = match sort {
        Some(sort) => sort.parse::<Sort>()?,
        None => Sort::default(),
    };
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    Ok(Pagination::new(limit, offset.max(0), sort))
}

fn parse_id_list(list: Option<&str>) -> Vec<i64> {
    list.unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

// Route handlers
pub async fn user_feed(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, AppError> {
    let pagination = pagination(query.limit, query.offset, query.sort.as_deref())?;

    let articles = resolve_personalized_feed(&state.db, user_id, &pagination)
        .await
        .ok_or_else(|| NewsError::NotFound(format!("feed for user {}", user_id)))?;

    Ok(Json(articles))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let pagination = pagination(query.limit, query.offset, None)?;
    let excluded = parse_id_list(query.exclude.as_deref());

    let articles = state
        .db
        .find_articles(&search_predicate(query.q.trim(), &excluded), &pagination)
        .await?;

    Ok(Json(articles))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ingestor = state.ingestor.clone();
    tokio::spawn(async move {
        if let Err(e) = ingestor.run_ingestion_cycle().await {
            error!("Requested ingestion cycle failed: {}", e);
        }
    });

    Json(RefreshStatus { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.ingestor.is_refreshing().await;
    Json(RefreshStatus { refreshing })
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
