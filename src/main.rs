use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod error;
mod storage;
mod tts;

use api::routes::{create_router, AppState};
use config::Config;
use storage::JobStore;
use tts::TtsService;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Configuration from environment
    let config = Config::from_env().expect("Invalid configuration");
    let addr = config.addr().expect("Invalid address");

    tracing::info!("Voice Clone Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Starting server on http://{}", addr);

    // Create upload directories if they don't exist
    let store = JobStore::open(&config.upload_dir, &config.output_dir)
        .expect("Failed to create upload/output directories");
    tracing::info!("Uploads directory: {}", store.uploads_dir().display());
    tracing::info!("Outputs directory: {}", store.outputs_dir().display());

    // Load the model; inference session setup is blocking
    let settings = config.models.clone();
    let tts = tokio::task::spawn_blocking(move || TtsService::load(&settings))
        .await
        .expect("Model loading task panicked");

    if !tts.is_loaded() {
        tracing::warn!("No TTS model loaded; /api/tts will return errors");
    }

    // Create app state
    let state = Arc::new(AppState {
        tts,
        store,
        default_language: config.default_language.clone(),
        max_text_chars: config.max_text_chars,
        max_upload_bytes: config.max_upload_bytes,
    });

    // Create router
    let app = create_router(state, config.static_dir.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
