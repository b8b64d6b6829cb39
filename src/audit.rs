use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{ApiJson, AppError, AppResult};
use crate::types::{now_iso, AuditLog};

#[derive(Debug, Deserialize)]
pub struct NewAuditEvent {
    pub timestamp: Option<String>,
    pub action: String,
    pub username: Option<String>,
    pub success: Option<bool>,
    pub details: Option<serde_json::Value>,
    pub computer_name: Option<String>,
    pub ip_address: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub limit: Option<i64>,
}

fn log_from_row(row: &rusqlite::Row) -> rusqlite::Result<AuditLog> {
    Ok(AuditLog {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        action: row.get(2)?,
        username: row.get(3)?,
        success: row.get::<_, i64>(4)? != 0,
        details: row.get(5)?,
        computer_name: row.get(6)?,
        ip_address: row.get(7)?,
        platform: row.get(8)?,
    })
}

/// POST /audit-logs — append one event; `details` is stored as the JSON
/// stringification of whatever object the client sent.
pub async fn append_audit_log(
    State(pool): State<Arc<Pool>>,
    ApiJson(input): ApiJson<NewAuditEvent>,
) -> AppResult<impl axum::response::IntoResponse> {
    let timestamp = input.timestamp.unwrap_or_else(now_iso);
    let username = input.username.unwrap_or_default();
    let success = input.success.unwrap_or(true);
    let details = input
        .details
        .map(|d| d.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO audit_logs
                 (timestamp, action, username, success, details, computer_name, ip_address, platform)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                timestamp,
                input.action,
                username,
                success as i64,
                details,
                input.computer_name,
                input.ip_address,
                input.platform,
            ],
        )
    })
    .await
    .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}

/// GET /audit-logs?limit=N — newest first; limit defaults to 100.
pub async fn list_audit_logs(
    State(pool): State<Arc<Pool>>,
    Query(params): Query<AuditQueryParams>,
) -> AppResult<Json<Vec<AuditLog>>> {
    let limit = params.limit.unwrap_or(100).max(1);

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let logs = conn
        .interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, action, username, success, details,
                        computer_name, ip_address, platform
                 FROM audit_logs
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], log_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(logs))
}

/// Write an audit row for an event the core itself observed (logins,
/// bootstrap, user management). Fire-and-forget.
pub fn spawn_record(
    pool: Pool,
    action: &str,
    username: &str,
    success: bool,
    details: serde_json::Value,
    ip_address: Option<String>,
) {
    let action = action.to_string();
    let username = username.to_string();
    tokio::spawn(async move {
        let timestamp = now_iso();
        let Ok(conn) = pool.get().await else {
            return;
        };
        let res = conn
            .interact(move |conn| {
                conn.execute(
                    "INSERT INTO audit_logs
                         (timestamp, action, username, success, details, ip_address)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        timestamp,
                        action,
                        username,
                        success as i64,
                        details.to_string(),
                        ip_address,
                    ],
                )
            })
            .await;
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to record audit event");
        }
    });
}
