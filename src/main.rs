mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod storage;
mod transform;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::FileService;
use crate::storage::StorageManager;
use crate::transform::TransformEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub files: Arc<FileService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filevault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting filevault...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let storage = StorageManager::build(&config.storage, &db);

    let engine = TransformEngine::default();
    tracing::warn!(
        "Encryption uses {}: the key is stored alongside the ciphertext, so encrypted payloads are only obfuscated",
        engine.cipher_name()
    );

    let files = Arc::new(FileService::from_config(
        &config,
        db.clone(),
        storage,
        engine,
    ));

    let state = AppState {
        config: config.clone(),
        files,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    db.close().await;
    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing needs some headroom over the payload itself
    let body_limit = state.config.storage.max_upload_bytes.saturating_add(64 * 1024);

    let protected_routes = Router::new()
        .route("/files", get(handlers::file::list_files))
        .route(
            "/files/upload",
            post(handlers::file::upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/files/:id",
            get(handlers::file::get_file)
                .patch(handlers::file::rename_file)
                .delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        .route("/files/:id/preview", get(handlers::file::preview_file))
        .route("/files/:id/compress", post(handlers::file::compress_file))
        .route("/files/:id/decompress", post(handlers::file::decompress_file))
        .route("/files/:id/encrypt", post(handlers::file::encrypt_file))
        .route("/files/:id/decrypt", post(handlers::file::decrypt_file))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
