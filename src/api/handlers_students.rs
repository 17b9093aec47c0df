use std::sync::Arc;
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use image::DynamicImage;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::db;
use crate::errors::{status_for, AttendanceError};
use crate::ledger::now_timestamp;
use crate::models::student::{AttendanceRow, Listing, RegistrationRow, Student};
use crate::pipeline::embed::decode_image;
use crate::pipeline::matcher::MatchOutcome;
use crate::utils::path::{is_safe_file_stem, registration_image_path};
use crate::AppState;

const UPLOAD_TOO_LARGE: &str = "Upload too large";

type JsonReply = (StatusCode, Json<serde_json::Value>);

fn reply_error(status: StatusCode, message: &str) -> JsonReply {
    (status, Json(serde_json::json!({ "error": message })))
}

fn reply_from(err: anyhow::Error) -> JsonReply {
    let status = status_for(&err);
    let domain = err.chain().find_map(|c| c.downcast_ref::<AttendanceError>());
    match domain {
        Some(e) => {
            warn!("request failed: {:#}", err);
            reply_error(status, &e.to_string())
        }
        None => {
            error!("request failed: {:#}", err);
            reply_error(status, "Internal server error")
        }
    }
}

#[derive(Debug, Default)]
struct UploadForm {
    image: Option<Bytes>,
    name: Option<String>,
    student_id: Option<String>,
}

fn non_blank(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

/// A request that is not multipart at all reads as an empty form.
async fn read_form(multipart: Result<Multipart, MultipartRejection>) -> Result<UploadForm, MultipartError> {
    let mut form = UploadForm::default();
    let Ok(mut multipart) = multipart else {
        return Ok(form);
    };
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "image" => {
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    form.image = Some(bytes);
                }
            }
            "name" => form.name = non_blank(field.text().await?),
            "student_id" => form.student_id = non_blank(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

/// Uploads over the body limit answer 413; any other malformed body is
/// treated as missing fields.
async fn read_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadForm, JsonReply> {
    match read_form(multipart).await {
        Ok(form) => Ok(form),
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            state.stats.inc_rejected();
            warn!("upload rejected: {}", e.body_text());
            Err(reply_error(StatusCode::PAYLOAD_TOO_LARGE, UPLOAD_TOO_LARGE))
        }
        Err(e) => {
            warn!("malformed multipart body: {}", e.body_text());
            Ok(UploadForm::default())
        }
    }
}

/// Decodes the upload and embeds it off the async runtime.
async fn embed_upload(state: &AppState, bytes: Bytes) -> anyhow::Result<(DynamicImage, Vec<f32>)> {
    let embedder = state.embedder.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<(DynamicImage, Vec<f32>)> {
        let img = decode_image(&bytes)?;
        let embedding = embedder.embed(&img).context("embedding uploaded image")?;
        Ok((img, embedding))
    })
    .await
    .context("embedding task panicked")?
}

async fn match_upload(state: &AppState, bytes: Bytes) -> anyhow::Result<MatchOutcome> {
    let (_img, query) = embed_upload(state, bytes).await?;
    let outcome = state.index.read().find_best(&query, state.threshold)?;
    Ok(outcome)
}

pub async fn register_student(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let form = match read_upload(&state, multipart).await {
        Ok(f) => f,
        Err(reply) => return reply,
    };
    let (Some(image), Some(name), Some(student_id)) = (form.image, form.name, form.student_id) else {
        state.stats.inc_rejected();
        return reply_error(StatusCode::BAD_REQUEST, "Missing image or student info");
    };
    if !is_safe_file_stem(&student_id) {
        state.stats.inc_rejected();
        return reply_error(StatusCode::BAD_REQUEST, "Invalid student_id");
    }

    let (img, embedding) = match embed_upload(&state, image).await {
        Ok(v) => v,
        Err(e) => {
            state.stats.inc_rejected();
            return reply_from(e);
        }
    };

    let timestamp = now_timestamp();
    let img_path = registration_image_path(state.ledger.registered_dir(), &student_id, &timestamp);
    let image_path = img_path.to_string_lossy().to_string();
    let student = Student {
        student_id: student_id.clone(),
        name: name.clone(),
        image_path: image_path.clone(),
        timestamp: timestamp.clone(),
        embedding,
    };

    let persisted = tokio::task::spawn_blocking({
        let state = state.clone();
        move || -> anyhow::Result<()> {
            std::fs::create_dir_all(state.ledger.registered_dir())?;
            img.to_rgb8()
                .save_with_format(&img_path, image::ImageFormat::Jpeg)
                .with_context(|| format!("Failed to save {:?}", img_path))?;
            if let Err(e) = commit_registration(&state, student) {
                if let Err(rm) = std::fs::remove_file(&img_path) {
                    warn!("could not remove {:?} after failed registration: {}", img_path, rm);
                }
                return Err(e);
            }
            Ok(())
        }
    })
    .await
    .context("registration task panicked")
    .and_then(|r| r);

    if let Err(e) = persisted {
        return reply_from(e);
    }

    state.stats.inc_registrations();
    info!("registered student {} ({})", student_id, name);

    (StatusCode::OK, Json(serde_json::json!({
        "status": "registered",
        "student_id": student_id,
        "name": name,
        "image_path": image_path,
    })))
}

/// Writes the store row, the CSV row and the index entry as one unit.
///
/// The index write lock is held throughout, so registrations and deletes of
/// the same ID cannot interleave between the database and the index. The CSV
/// append happens inside the transaction; a failed append rolls the row back.
fn commit_registration(state: &AppState, student: Student) -> anyhow::Result<()> {
    let mut index = state.index.write();
    let mut conn = state.pool.get()?;
    let tx = conn.transaction()?;
    db::writer::upsert_student(&tx, &student)?;
    state.ledger.append_registration(&RegistrationRow {
        student_id: student.student_id.clone(),
        name: student.name.clone(),
        image_path: student.image_path.clone(),
        timestamp: student.timestamp.clone(),
    })?;
    tx.commit()?;
    index.upsert(student);
    Ok(())
}

pub async fn detect_student(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let form = match read_upload(&state, multipart).await {
        Ok(f) => f,
        Err(reply) => return reply,
    };
    let Some(image) = form.image else {
        state.stats.inc_rejected();
        return reply_error(StatusCode::BAD_REQUEST, "Missing image");
    };

    match match_upload(&state, image).await {
        Ok(MatchOutcome::Recognized { student, score }) => {
            state.stats.record_recognized(&student.student_id);
            info!("recognized {} (score {:.3})", student.student_id, score);
            (StatusCode::OK, Json(serde_json::json!({
                "status": "recognized",
                "student_id": student.student_id,
                "name": student.name,
                "score": score,
                "image_path": student.image_path,
                "timestamp": student.timestamp,
            })))
        }
        Ok(MatchOutcome::Unknown { score }) => {
            state.stats.inc_unknown();
            info!("no match (best score {:.3})", score);
            (StatusCode::OK, Json(serde_json::json!({ "status": "unknown", "score": score })))
        }
        Err(e) => {
            state.stats.inc_rejected();
            reply_from(e)
        }
    }
}

pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let form = match read_upload(&state, multipart).await {
        Ok(f) => f,
        Err(reply) => return reply,
    };
    let Some(image) = form.image else {
        state.stats.inc_rejected();
        return reply_error(StatusCode::BAD_REQUEST, "Missing image");
    };

    let outcome = match match_upload(&state, image).await {
        Ok(o) => o,
        Err(e) => {
            state.stats.inc_rejected();
            return reply_from(e);
        }
    };

    match outcome {
        MatchOutcome::Recognized { student, score } => {
            let timestamp = now_timestamp();
            let row = AttendanceRow {
                student_id: student.student_id.clone(),
                name: student.name.clone(),
                timestamp: timestamp.clone(),
            };
            let ledger = state.ledger.clone();
            let written = tokio::task::spawn_blocking(move || ledger.append_attendance(&row))
                .await
                .context("attendance task panicked")
                .and_then(|r| r);
            if let Err(e) = written {
                return reply_from(e);
            }
            state.stats.record_recognized(&student.student_id);
            state.stats.inc_attendance_marked();
            info!("attendance marked for {} (score {:.3})", student.student_id, score);
            (StatusCode::OK, Json(serde_json::json!({
                "status": "attendance_marked",
                "recognized": true,
                "student_id": student.student_id,
                "name": student.name,
                "score": score,
                "timestamp": timestamp,
                "message": format!("Attendance marked for {} ({})", student.name, student.student_id),
            })))
        }
        MatchOutcome::Unknown { score } => {
            state.stats.inc_attendance_failed();
            info!("attendance not marked (best score {:.3})", score);
            (StatusCode::OK, Json(serde_json::json!({
                "status": "attendance_failed",
                "recognized": false,
                "score": score,
                "message": "Face not recognized. Attendance not marked.",
            })))
        }
    }
}

pub async fn list_students(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.pool.clone();
    let res = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Student>> {
        let conn = pool.get()?;
        db::query::list_students(&conn)
    })
    .await;
    match res {
        Ok(Ok(items)) => (StatusCode::OK, Json(serde_json::json!(Listing { total: items.len(), items }))),
        Ok(Err(e)) => reply_from(e),
        Err(e) => reply_from(anyhow::anyhow!("list task panicked: {}", e)),
    }
}

#[derive(Deserialize)]
pub struct AttendanceQ {
    #[serde(default)]
    pub date: Option<String>,
}

pub async fn list_attendance(State(state): State<Arc<AppState>>, Query(q): Query<AttendanceQ>) -> impl IntoResponse {
    if let Some(d) = q.date.as_deref() {
        if d.len() > 8 || !d.chars().all(|c| c.is_ascii_digit()) {
            return reply_error(StatusCode::BAD_REQUEST, "date must be YYYYMMDD");
        }
    }
    let ledger = state.ledger.clone();
    let res = tokio::task::spawn_blocking(move || ledger.read_attendance(q.date.as_deref())).await;
    match res {
        Ok(Ok(items)) => (StatusCode::OK, Json(serde_json::json!(Listing { total: items.len(), items }))),
        Ok(Err(e)) => reply_from(e),
        Err(e) => reply_from(anyhow::anyhow!("attendance task panicked: {}", e)),
    }
}

pub async fn delete_student(State(state): State<Arc<AppState>>, Path(student_id): Path<String>) -> impl IntoResponse {
    let id = student_id.clone();
    let res = tokio::task::spawn_blocking({
        let state = state.clone();
        // Same lock order as `commit_registration`: index, then connection.
        move || -> anyhow::Result<bool> {
            let mut index = state.index.write();
            let conn = state.pool.get()?;
            let deleted = db::writer::delete_student(&conn, &id)?;
            if deleted {
                index.remove(&id);
            }
            Ok(deleted)
        }
    })
    .await;
    match res {
        Ok(Ok(true)) => {
            info!("removed student {}", student_id);
            (StatusCode::OK, Json(serde_json::json!({ "status": "deleted", "student_id": student_id })))
        }
        Ok(Ok(false)) => reply_error(StatusCode::NOT_FOUND, "Student not found"),
        Ok(Err(e)) => reply_from(e),
        Err(e) => reply_from(anyhow::anyhow!("delete task panicked: {}", e)),
    }
}
