use std::sync::Arc;
use axum::{extract::State, http::{StatusCode, header}, Json, response::{Html, IntoResponse}};
use crate::AppState;

pub async fn serve_index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let page = state.paths.static_dir.join("register.html");
    match tokio::fs::read_to_string(&page).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&page).first_or_octet_stream();
            (StatusCode::OK, [(header::CONTENT_TYPE, mime.as_ref().to_string())], Html(body)).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let v = env!("CARGO_PKG_VERSION");
    let model_loaded = state.embedder.is_ready();
    let students = state.index.read().len();

    let body = serde_json::json!({
        "status": "ok",
        "version": v,
        "database": "SQLite",
        "model_loaded": model_loaded,
        "students": students,
    });
    (StatusCode::OK, Json(body))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.stats.snapshot();
    let students = state.index.read().len();
    (StatusCode::OK, Json(serde_json::json!({
        "requests": snapshot,
        "students": students,
        "threshold": state.threshold,
    })))
}

pub async fn reset_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.stats.reset();
    (StatusCode::OK, Json(serde_json::json!({
        "status": "reset",
        "message": "Request counters cleared"
    })))
}
