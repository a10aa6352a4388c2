//! HTTP surface: liveness, voice cloning, vocal separation and the
//! generated-audio file tree.

pub mod error;
pub mod handlers;
pub mod loader;
pub mod state;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::server::state::AppState;

pub use loader::{run, spawn_model_loader};

pub fn create_router(state: AppState) -> Router {
    let generated = ServeDir::new(&state.config.layout.generated_dir);
    let upload_limit = state.config.upload_limit_bytes;

    Router::new()
        .route("/", get(handlers::home))
        .route("/clone-voice", post(handlers::clone_voice))
        .route("/separate-vocals", post(handlers::separate_vocals))
        .layer(DefaultBodyLimit::max(upload_limit))
        .nest_service("/generated_audio", generated)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
