//! HTTP handlers for accounts and moderation.

pub mod admin;
pub mod auth;
pub mod middleware;
pub mod moderation;

use axum::http::StatusCode;
use tracing::error;

use cerca_db::{Database, DbError};

use crate::auth::AppState;

/// Maps a core error onto a response status, logging anything unexpected.
pub fn status(err: DbError) -> StatusCode {
    match err {
        DbError::NotFound { .. } => StatusCode::NOT_FOUND,
        DbError::Precondition { .. } => StatusCode::CONFLICT,
        err => {
            error!("{}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Runs a database call off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> Result<T, StatusCode> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
}
