use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::error::{ApiJson, AppError, AppResult};
use crate::types::{now_iso, Incident, IncidentPhoto, IncidentSource, Severity};

pub const MAX_NOTE_CHARS: usize = 5000;
pub const MAX_TIME_ADJUSTMENT_SECS: i64 = 86400;

#[derive(Debug, Deserialize)]
pub struct NewIncident {
    pub reporter_username: Option<String>,
    pub note: Option<String>,
    pub time_adjustment_seconds: Option<i64>,
    pub severity: Option<String>,
    pub source: Option<String>,
    pub apply_to_installation: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct IncidentWithPhotos {
    #[serde(flatten)]
    pub incident: Incident,
    pub photos: Vec<IncidentPhoto>,
}

fn incident_from_row(row: &rusqlite::Row) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get(0)?,
        installation_id: row.get(1)?,
        reporter_username: row.get(2)?,
        note: row.get(3)?,
        time_adjustment_seconds: row.get(4)?,
        severity: row.get(5)?,
        source: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn photo_from_row(row: &rusqlite::Row) -> rusqlite::Result<IncidentPhoto> {
    Ok(IncidentPhoto {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        r2_key: row.get(2)?,
        file_name: row.get(3)?,
        content_type: row.get(4)?,
        size_bytes: row.get(5)?,
        sha256: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const INCIDENT_COLUMNS: &str = "id, installation_id, reporter_username, note, \
     time_adjustment_seconds, severity, source, created_at";

/// POST /installations/{id}/incidents — create an incident, optionally
/// patching the parent installation's notes and timer.
pub async fn create_incident(
    State(pool): State<Arc<Pool>>,
    Path(installation_id): Path<i64>,
    ctx: Option<Extension<AuthContext>>,
    ApiJson(input): ApiJson<NewIncident>,
) -> AppResult<impl axum::response::IntoResponse> {
    let note = input.note.unwrap_or_default();
    if note.is_empty() {
        return Err(AppError::Validation("nota requerida".to_string()));
    }
    if note.chars().count() > MAX_NOTE_CHARS {
        return Err(AppError::Validation(format!(
            "nota demasiado larga (maximo {MAX_NOTE_CHARS} caracteres)"
        )));
    }

    let adjustment = input.time_adjustment_seconds.unwrap_or(0);
    if adjustment.abs() > MAX_TIME_ADJUSTMENT_SECS {
        return Err(AppError::Validation(
            "ajuste de tiempo fuera de rango".to_string(),
        ));
    }

    let severity = input
        .severity
        .as_deref()
        .and_then(Severity::parse)
        .ok_or_else(|| {
            AppError::Validation(format!(
                "severidad invalida: {}",
                input.severity.as_deref().unwrap_or("")
            ))
        })?;

    // Web sessions report as themselves; machine clients fall back to the
    // mobile defaults.
    let web_session = match ctx.as_deref() {
        Some(AuthContext::WebSession { username, .. }) => Some(username.clone()),
        _ => None,
    };
    let reporter = match input.reporter_username {
        Some(r) if !r.trim().is_empty() => r.trim().to_string(),
        _ => web_session
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    };
    let source = match input.source.as_deref() {
        Some(s) => IncidentSource::parse(s)
            .ok_or_else(|| AppError::Validation(format!("origen invalido: {s}")))?,
        None if web_session.is_some() => IncidentSource::Web,
        None => IncidentSource::Mobile,
    };

    let apply = input.apply_to_installation.unwrap_or(false);
    let created_at = now_iso();

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let (sev, src, note_copy) = (severity.as_str(), source.as_str(), note.clone());
    let incident = conn
        .interact(move |conn| {
            let tx = conn.transaction()?;

            let parent: Option<(Option<String>, Option<i64>)> = tx
                .query_row(
                    "SELECT notes, installation_time_seconds FROM installations WHERE id = ?1",
                    params![installation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .ok();
            let Some((prev_notes, prev_time)) = parent else {
                return Ok(None);
            };

            tx.execute(
                "INSERT INTO incidents
                     (installation_id, reporter_username, note, time_adjustment_seconds,
                      severity, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![installation_id, reporter, note_copy, adjustment, sev, src, created_at],
            )?;
            let incident_id = tx.last_insert_rowid();

            if apply {
                let prev_notes = prev_notes.unwrap_or_default();
                let new_notes = if prev_notes.is_empty() {
                    note_copy.clone()
                } else {
                    format!("{prev_notes}\n[INCIDENT] {note_copy}")
                };
                let new_time = (prev_time.unwrap_or(0) + adjustment).max(0);
                tx.execute(
                    "UPDATE installations
                     SET notes = ?1, installation_time_seconds = ?2
                     WHERE id = ?3",
                    params![new_notes, new_time, installation_id],
                )?;
            }

            let incident = tx.query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
                params![incident_id],
                incident_from_row,
            )?;
            tx.commit()?;
            Ok::<_, rusqlite::Error>(Some(incident))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let Some(incident) = incident else {
        return Err(AppError::NotFound("registro no encontrado".to_string()));
    };

    tracing::info!(
        installation_id,
        incident_id = incident.id,
        severity = %incident.severity,
        "incident created"
    );
    Ok((StatusCode::CREATED, Json(incident)))
}

/// GET /installations/{id}/incidents — newest first, photos nested in
/// chronological order. One query per table, grouped server-side.
pub async fn list_incidents(
    State(pool): State<Arc<Pool>>,
    Path(installation_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let (incidents, photos) = conn
        .interact(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents
                 WHERE installation_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let incidents = stmt
                .query_map(params![installation_id], incident_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT p.id, p.incident_id, p.r2_key, p.file_name, p.content_type,
                        p.size_bytes, p.sha256, p.created_at
                 FROM incident_photos p
                 JOIN incidents i ON p.incident_id = i.id
                 WHERE i.installation_id = ?1
                 ORDER BY p.created_at ASC, p.id ASC",
            )?;
            let photos = stmt
                .query_map(params![installation_id], photo_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok::<_, rusqlite::Error>((incidents, photos))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let mut by_incident: HashMap<i64, Vec<IncidentPhoto>> = HashMap::new();
    for photo in photos {
        by_incident.entry(photo.incident_id).or_default().push(photo);
    }

    let nested: Vec<IncidentWithPhotos> = incidents
        .into_iter()
        .map(|incident| {
            let photos = by_incident.remove(&incident.id).unwrap_or_default();
            IncidentWithPhotos { incident, photos }
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "installation_id": installation_id,
        "incidents": nested,
    })))
}
