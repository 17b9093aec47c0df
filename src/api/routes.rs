use axum::{Router, extract::DefaultBodyLimit, routing::{get, post, delete}};
use std::sync::Arc;
use tower_http::cors::{CorsLayer, AllowOrigin};
use axum::http::Method;
use crate::AppState;
use crate::api::{handlers, handlers_students};

// Phone cameras routinely produce uploads above axum's 2 MB default.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any()) // camera boards and the registration page post cross-origin
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/", get(handlers::serve_index))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/stats/reset", post(handlers::reset_stats))
        .route("/register", post(handlers_students::register_student))
        .route("/detect", post(handlers_students::detect_student))
        .route("/attendance", post(handlers_students::mark_attendance).get(handlers_students::list_attendance))
        .route("/students", get(handlers_students::list_students))
        .route("/students/:id", delete(handlers_students::delete_student))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
