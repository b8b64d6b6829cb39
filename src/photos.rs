use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use deadpool_sqlite::Pool;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use rusqlite::params;
use std::sync::Arc;

use crate::crypto;
use crate::error::{AppError, AppResult};
use crate::incidents::photo_from_row;
use crate::storage::blob::BlobStore;
use crate::types::{now_iso, IncidentPhoto};

pub const MIN_PHOTO_BYTES: usize = 1024;
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

pub struct PhotoState {
    pub pool: Pool,
    /// Absent when no blob directory is configured.
    pub blob: Option<BlobStore>,
}

const PHOTO_COLUMNS: &str =
    "id, incident_id, r2_key, file_name, content_type, size_bytes, sha256, created_at";

static FILE_NAME_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Check the leading bytes against the declared content type. WEBP needs both
/// the RIFF prefix (bytes 0–3) and the WEBP tag at bytes 8–11.
fn magic_bytes_match(content_type: &str, body: &[u8]) -> bool {
    match content_type {
        "image/jpeg" => body.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => body.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
        "image/webp" => {
            body.len() >= 12 && &body[0..4] == b"RIFF" && &body[8..12] == b"WEBP"
        }
        _ => false,
    }
}

fn sanitize_file_name(name: Option<&str>, incident_id: i64) -> String {
    let cleaned = name
        .map(|n| FILE_NAME_SANITIZER.replace_all(n.trim(), "_").to_string())
        .unwrap_or_default();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        format!("incident_{incident_id}.jpg")
    } else {
        cleaned
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Blob key: `incidents/<installation>/<incident>/<compact ts>_<rand>.<ext>`.
fn build_r2_key(installation_id: i64, incident_id: i64, ext: &str) -> String {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    format!(
        "incidents/{installation_id}/{incident_id}/{ts}_{}.{ext}",
        random_suffix()
    )
}

/// POST /incidents/{id}/photos — raw image body, validated strictly in order:
/// id, declared type, size bounds, magic bytes, incident existence, bucket.
/// The blob write lands before the metadata row so a row never points at a
/// missing object.
pub async fn upload_photo(
    State(state): State<Arc<PhotoState>>,
    Path(incident_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let incident_id: i64 = match incident_id.parse() {
        Ok(id) if id > 0 => id,
        _ => {
            return Err(AppError::Validation(
                "identificador de incidente invalido".to_string(),
            ))
        }
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_lowercase())
        .unwrap_or_default();
    let Some(ext) = extension_for(&content_type) else {
        return Err(AppError::Validation(format!(
            "tipo de contenido no permitido: {content_type}"
        )));
    };

    if body.is_empty() {
        return Err(AppError::Validation("imagen vacia".to_string()));
    }
    if body.len() < MIN_PHOTO_BYTES {
        return Err(AppError::Validation(
            "imagen demasiado pequena o corrupta".to_string(),
        ));
    }
    if body.len() > MAX_PHOTO_BYTES {
        return Err(AppError::PayloadTooLarge(
            "imagen demasiado grande (maximo 5 MB)".to_string(),
        ));
    }

    if !magic_bytes_match(&content_type, &body) {
        return Err(AppError::Validation(
            "el archivo no es una imagen valida".to_string(),
        ));
    }

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let installation_id = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT installation_id FROM incidents WHERE id = ?1",
                params![incident_id],
                |row| row.get::<_, i64>(0),
            )
            .ok()
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?;
    let Some(installation_id) = installation_id else {
        return Err(AppError::NotFound("incidente no encontrado".to_string()));
    };

    let Some(blob) = &state.blob else {
        return Err(AppError::Config(
            "INCIDENTS_BUCKET no configurado".to_string(),
        ));
    };

    let sha256 = crypto::sha256_hex(&body);
    let r2_key = build_r2_key(installation_id, incident_id, ext);
    let file_name = sanitize_file_name(
        headers.get("x-file-name").and_then(|v| v.to_str().ok()),
        incident_id,
    );
    let size_bytes = body.len() as i64;
    let created_at = now_iso();

    blob.put(&r2_key, &body)
        .await
        .map_err(|e| AppError::Internal(format!("blob write failed: {e}")))?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let (key, name, ct) = (r2_key.clone(), file_name, content_type);
    let photo = conn
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO incident_photos
                     (incident_id, r2_key, file_name, content_type, size_bytes, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![incident_id, key, name, ct, size_bytes, sha256, created_at],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM incident_photos WHERE id = ?1"),
                params![id],
                photo_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    tracing::info!(
        incident_id,
        photo_id = photo.id,
        size_bytes,
        "incident photo stored"
    );
    Ok((StatusCode::CREATED, Json(photo)))
}

/// GET /photos/{id} — stream the stored object with its recorded content
/// type. 404 when the row or the object is gone.
pub async fn fetch_photo(
    State(state): State<Arc<PhotoState>>,
    Path(photo_id): Path<i64>,
) -> AppResult<Response> {
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let row: Option<IncidentPhoto> = conn
        .interact(move |conn| {
            conn.query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM incident_photos WHERE id = ?1"),
                params![photo_id],
                photo_from_row,
            )
            .ok()
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?;
    let Some(row) = row else {
        return Err(AppError::NotFound("foto no encontrada".to_string()));
    };

    let Some(blob) = &state.blob else {
        return Err(AppError::Config(
            "INCIDENTS_BUCKET no configurado".to_string(),
        ));
    };
    let bytes = blob
        .get(&row.r2_key)
        .await
        .map_err(|e| AppError::Internal(format!("blob read failed: {e}")))?
        .ok_or_else(|| AppError::NotFound("foto no encontrada".to_string()))?;

    let content_type = if row.content_type.is_empty() {
        "image/jpeg".to_string()
    } else {
        row.content_type
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
