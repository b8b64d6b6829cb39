use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{ApiJson, AppError, AppResult};
use crate::types::{now_iso, Installation};

// ── Filters ──

#[derive(Debug, Default, Deserialize)]
pub struct InstallationQueryParams {
    pub brand: Option<String>,
    pub status: Option<String>,
    pub client_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<String>,
}

/// Router-side filters applied after the rows come back ordered by timestamp.
#[derive(Debug)]
pub struct InstallationFilters {
    brand: Option<String>,
    status: Option<String>,
    client_substring: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

/// Accepts RFC 3339 instants and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

impl InstallationFilters {
    pub fn parse(params: InstallationQueryParams) -> AppResult<Self> {
        let start = match params.start_date.as_deref() {
            None => None,
            Some(s) => Some(
                parse_instant(s)
                    .ok_or_else(|| AppError::Validation(format!("fecha invalida: {s}")))?,
            ),
        };
        let end = match params.end_date.as_deref() {
            None => None,
            Some(s) => Some(
                parse_instant(s)
                    .ok_or_else(|| AppError::Validation(format!("fecha invalida: {s}")))?,
            ),
        };
        let limit = match params.limit.as_deref() {
            None => None,
            Some(s) => match s.parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => return Err(AppError::Validation(format!("limit invalido: {s}"))),
            },
        };

        Ok(Self {
            brand: params.brand.map(|s| s.to_lowercase()),
            status: params.status.map(|s| s.to_lowercase()),
            client_substring: params.client_name.map(|s| s.to_lowercase()),
            start,
            end,
            limit,
        })
    }

    fn matches(&self, row: &Installation) -> bool {
        if let Some(ref brand) = self.brand {
            if row.driver_brand.to_lowercase() != *brand {
                return false;
            }
        }
        if let Some(ref status) = self.status {
            if row.status.to_lowercase() != *status {
                return false;
            }
        }
        if let Some(ref needle) = self.client_substring {
            if !row.client_name.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        if self.start.is_some() || self.end.is_some() {
            // Semi-closed window [start, end); rows without a parseable
            // timestamp never match a date filter.
            let Some(ts) = parse_instant(&row.timestamp) else {
                return false;
            };
            if let Some(start) = self.start {
                if ts < start {
                    return false;
                }
            }
            if let Some(end) = self.end {
                if ts >= end {
                    return false;
                }
            }
        }
        true
    }

    /// Filter rows, then truncate to the limit.
    pub fn apply(&self, rows: Vec<Installation>) -> Vec<Installation> {
        let mut out: Vec<Installation> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

// ── Row access ──

const INSTALLATION_COLUMNS: &str = "id, timestamp, driver_brand, driver_version, status, \
     client_name, driver_description, installation_time_seconds, os_info, notes";

pub(crate) fn installation_from_row(row: &rusqlite::Row) -> rusqlite::Result<Installation> {
    Ok(Installation {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        driver_brand: row.get(2)?,
        driver_version: row.get(3)?,
        status: row.get(4)?,
        client_name: row.get(5)?,
        driver_description: row.get(6)?,
        installation_time_seconds: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        os_info: row.get(8)?,
        notes: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

/// All rows, newest first. Filters run in the router, not in SQL.
pub async fn fetch_all(pool: &Pool) -> AppResult<Vec<Installation>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let rows = conn
        .interact(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTALLATION_COLUMNS} FROM installations ORDER BY timestamp DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([], installation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(rows)
}

// ── Payloads ──

#[derive(Debug, Deserialize)]
pub struct NewInstallation {
    pub timestamp: Option<String>,
    pub driver_brand: Option<String>,
    pub driver_version: Option<String>,
    pub status: Option<String>,
    pub client_name: Option<String>,
    pub driver_description: Option<String>,
    pub installation_time_seconds: Option<i64>,
    pub os_info: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInstallation {
    pub notes: Option<String>,
    pub installation_time_seconds: Option<i64>,
}

struct NormalizedInstallation {
    timestamp: String,
    driver_brand: String,
    driver_version: String,
    status: String,
    client_name: String,
    driver_description: String,
    installation_time_seconds: i64,
    os_info: String,
    notes: String,
}

fn normalize(input: NewInstallation) -> AppResult<NormalizedInstallation> {
    let time = input.installation_time_seconds.unwrap_or(0);
    if time < 0 {
        return Err(AppError::Validation(
            "installation_time_seconds debe ser no negativo".to_string(),
        ));
    }
    Ok(NormalizedInstallation {
        timestamp: input.timestamp.unwrap_or_else(now_iso),
        driver_brand: input.driver_brand.unwrap_or_default(),
        driver_version: input.driver_version.unwrap_or_default(),
        status: input.status.unwrap_or_else(|| "unknown".to_string()),
        client_name: input.client_name.unwrap_or_default(),
        driver_description: input.driver_description.unwrap_or_default(),
        installation_time_seconds: time,
        os_info: input.os_info.unwrap_or_default(),
        notes: input.notes.unwrap_or_default(),
    })
}

async fn insert(pool: &Pool, record: NormalizedInstallation) -> AppResult<Installation> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let row = conn
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO installations
                     (timestamp, driver_brand, driver_version, status, client_name,
                      driver_description, installation_time_seconds, os_info, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.timestamp,
                    record.driver_brand,
                    record.driver_version,
                    record.status,
                    record.client_name,
                    record.driver_description,
                    record.installation_time_seconds,
                    record.os_info,
                    record.notes,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {INSTALLATION_COLUMNS} FROM installations WHERE id = ?1"),
                params![id],
                installation_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(row)
}

// ── Handlers ──

/// POST /installations — agent-reported install, blank defaults.
pub async fn create_installation(
    State(pool): State<Arc<Pool>>,
    ApiJson(input): ApiJson<NewInstallation>,
) -> AppResult<impl axum::response::IntoResponse> {
    let record = normalize(input)?;
    insert(&pool, record).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}

/// POST /records — manual entry from the console; placeholder defaults make
/// the hand-entered rows recognizable in listings.
pub async fn create_record(
    State(pool): State<Arc<Pool>>,
    ApiJson(input): ApiJson<NewInstallation>,
) -> AppResult<impl axum::response::IntoResponse> {
    let record = normalize(NewInstallation {
        timestamp: input.timestamp,
        driver_brand: input.driver_brand.or_else(|| Some("N/A".to_string())),
        driver_version: input.driver_version.or_else(|| Some("N/A".to_string())),
        status: input.status.or_else(|| Some("manual".to_string())),
        client_name: input.client_name.or_else(|| Some("Sin cliente".to_string())),
        driver_description: input.driver_description,
        installation_time_seconds: input.installation_time_seconds,
        os_info: input.os_info.or_else(|| Some("manual".to_string())),
        notes: input.notes,
    })?;
    let row = insert(&pool, record).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "record": row })),
    ))
}

/// GET /installations — full listing with router-side filters.
pub async fn list_installations(
    State(pool): State<Arc<Pool>>,
    Query(params): Query<InstallationQueryParams>,
) -> AppResult<Json<Vec<Installation>>> {
    let filters = InstallationFilters::parse(params)?;
    let rows = fetch_all(&pool).await?;
    Ok(Json(filters.apply(rows)))
}

/// GET /installations/{id}
pub async fn get_installation(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Installation>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let row = conn
        .interact(move |conn| {
            conn.query_row(
                &format!("SELECT {INSTALLATION_COLUMNS} FROM installations WHERE id = ?1"),
                params![id],
                installation_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("registro no encontrado".to_string())
            }
            _ => AppError::Database(e),
        })?;
    Ok(Json(row))
}

/// PUT /installations/{id} — only notes and the timer are updatable; fields
/// missing from the payload bind NULL.
pub async fn update_installation(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<UpdateInstallation>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let updated = conn
        .interact(move |conn| {
            conn.execute(
                "UPDATE installations SET notes = ?1, installation_time_seconds = ?2 WHERE id = ?3",
                params![input.notes, input.installation_time_seconds, id],
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if updated == 0 {
        return Err(AppError::NotFound("registro no encontrado".to_string()));
    }
    Ok(Json(json!({ "success": true })))
}

/// DELETE /installations/{id} — incidents and photo rows go with it via
/// FK cascade; blobs are left behind.
pub async fn delete_installation(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let deleted = conn
        .interact(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM incident_photos WHERE incident_id IN
                     (SELECT id FROM incidents WHERE installation_id = ?1)",
                params![id],
            )?;
            tx.execute(
                "DELETE FROM incidents WHERE installation_id = ?1",
                params![id],
            )?;
            let deleted = tx.execute("DELETE FROM installations WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok::<_, rusqlite::Error>(deleted)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if deleted == 0 {
        return Err(AppError::NotFound("registro no encontrado".to_string()));
    }
    Ok(Json(json!({ "message": format!("Registro {id} eliminado.") })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, ts: &str, brand: &str, status: &str, client: &str) -> Installation {
        Installation {
            id,
            timestamp: ts.to_string(),
            driver_brand: brand.to_string(),
            driver_version: "1.0".to_string(),
            status: status.to_string(),
            client_name: client.to_string(),
            driver_description: String::new(),
            installation_time_seconds: 0,
            os_info: String::new(),
            notes: String::new(),
        }
    }

    fn filters(params: InstallationQueryParams) -> InstallationFilters {
        InstallationFilters::parse(params).unwrap()
    }

    #[test]
    fn brand_filter_is_case_insensitive() {
        let f = filters(InstallationQueryParams {
            brand: Some("zebra".to_string()),
            ..Default::default()
        });
        let rows = vec![
            row(1, "2026-07-10T00:00:00Z", "Zebra", "success", "Acme"),
            row(2, "2026-07-12T00:00:00Z", "Magicard", "success", "Acme"),
        ];
        let out = f.apply(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn client_filter_is_substring_match() {
        let f = filters(InstallationQueryParams {
            client_name: Some("acme".to_string()),
            ..Default::default()
        });
        let rows = vec![
            row(1, "2026-07-10T00:00:00Z", "Zebra", "success", "Acme Corp Norte"),
            row(2, "2026-07-12T00:00:00Z", "Zebra", "success", "Otra"),
        ];
        assert_eq!(f.apply(rows).len(), 1);
    }

    #[test]
    fn date_window_is_semi_closed() {
        let f = filters(InstallationQueryParams {
            start_date: Some("2026-07-01T00:00:00Z".to_string()),
            end_date: Some("2026-08-01T00:00:00Z".to_string()),
            ..Default::default()
        });
        let rows = vec![
            row(1, "2026-07-10T08:00:00Z", "Zebra", "success", "Acme"),
            row(2, "2026-08-01T00:00:00Z", "Zebra", "success", "Acme"),
            row(3, "2026-06-30T23:59:59Z", "Zebra", "success", "Acme"),
        ];
        let out = f.apply(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn limit_truncates_after_filtering() {
        let f = filters(InstallationQueryParams {
            status: Some("success".to_string()),
            limit: Some("2".to_string()),
            ..Default::default()
        });
        let rows = vec![
            row(1, "2026-07-10T00:00:00Z", "Zebra", "failed", "Acme"),
            row(2, "2026-07-11T00:00:00Z", "Zebra", "success", "Acme"),
            row(3, "2026-07-12T00:00:00Z", "Zebra", "success", "Acme"),
            row(4, "2026-07-13T00:00:00Z", "Zebra", "success", "Acme"),
        ];
        let out = f.apply(rows);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, 2);
    }

    #[test]
    fn invalid_date_is_rejected() {
        let err = InstallationFilters::parse(InstallationQueryParams {
            start_date: Some("not-a-date".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("fecha invalida"));
    }

    #[test]
    fn invalid_limit_is_rejected() {
        assert!(InstallationFilters::parse(InstallationQueryParams {
            limit: Some("0".to_string()),
            ..Default::default()
        })
        .is_err());
        assert!(InstallationFilters::parse(InstallationQueryParams {
            limit: Some("-3".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn bare_dates_parse_as_midnight_utc() {
        let dt = parse_instant("2026-07-10").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-07-10T00:00:00+00:00");
    }
}
