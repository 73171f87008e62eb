mod config;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use cerca_api::admin;
use cerca_api::auth::{self, AppState, AppStateInner};
use cerca_api::middleware::require_auth;
use cerca_db::{Database, PwhashMigration};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cerca=debug,tower_http=debug".into()),
        )
        .init();

    if std::env::args().nth(1).as_deref() == Some("migrate") {
        return migrate();
    }

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?.with_proposal_scope(config.proposal_scope);
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/moderation/log", get(admin::moderation_log))
        .route("/admins", get(admin::admins))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/account/delete", post(auth::delete_account))
        .route("/admin/make-admin", post(admin::make_admin))
        .route("/admin/demote-admin", post(admin::demote_admin))
        .route("/admin/remove-user", post(admin::remove_user))
        .route("/admin/reset-password", post(admin::reset_password))
        .route("/admin/add-user", post(admin::add_user))
        .route("/admin/proposals", get(admin::proposals))
        .route("/admin/proposals/{proposal_id}/confirm", post(admin::confirm_proposal))
        .route("/admin/proposals/{proposal_id}/veto", post(admin::veto_proposal))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Cerca server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `cerca migrate`: rewrite legacy password hashes, then exit.
fn migrate() -> anyhow::Result<()> {
    let db_path = Config::db_path_from_env();
    let db = Database::open(&db_path)?;
    match db.migrate_pwhash()? {
        PwhashMigration::AlreadyApplied => info!(
            "{} is already migrated (schema version {:?})",
            db_path.display(),
            db.schema_version()?
        ),
        PwhashMigration::Applied { migrated, skipped } => info!(
            "Migrated {} ({} rewritten, {} already current)",
            db_path.display(),
            migrated,
            skipped
        ),
    }
    Ok(())
}
