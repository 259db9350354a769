use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use super::handlers;
use crate::storage::JobStore;
use crate::tts::TtsService;

pub struct AppState {
    pub tts: TtsService,
    pub store: JobStore,
    pub default_language: String,
    pub max_text_chars: usize,
    pub max_upload_bytes: usize,
}

pub fn create_router(state: Arc<AppState>, static_dir: PathBuf) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route(
            "/tts",
            post(handlers::generate_speech).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/audio/:file_id", get(handlers::get_audio))
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", api_routes)
        .fallback_service(
            ServeDir::new(static_dir).append_index_html_on_directories(true),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
