mod handlers;
mod pages;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::library::DocumentLibrary;
use crate::rag::lifecycle::IndexController;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<IndexController>,
    pub library: Arc<DocumentLibrary>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(controller: Arc<IndexController>, settings: Arc<Settings>) -> Self {
        let library = Arc::clone(controller.library());
        Self {
            controller,
            library,
            settings,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    let body_limit = state.settings.storage.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index_page))
        .route("/upload-page", get(handlers::upload_page))
        .route("/search", post(handlers::search_page))
        .route("/api/search", post(handlers::api_search))
        .route("/upload", post(handlers::upload_files))
        .route("/api/documents", get(handlers::list_documents))
        .route(
            "/api/documents/:name",
            get(handlers::view_document).delete(handlers::delete_document),
        )
        .route("/api/reindex", post(handlers::reindex))
        .route("/api/search-system/status", get(handlers::system_status))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
