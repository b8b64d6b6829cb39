use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use super::rate_limit::LoginRateLimiter;
use super::{client_ip, session, AuthContext};
use crate::audit;
use crate::crypto;
use crate::error::{ApiJson, AppError, AppResult};
use crate::types::{now_iso, Role, WebUser};

pub struct AuthState {
    pub pool: Pool,
    pub session_secret: String,
    pub session_ttl_secs: u64,
    /// Bootstrap secret; empty means first-user creation is unavailable.
    pub bootstrap_secret: String,
    /// Absent when the rate-limit store is not configured.
    pub limiter: Option<LoginRateLimiter>,
}

// ── Types ──

#[derive(Deserialize)]
pub struct BootstrapRequest {
    pub bootstrap_secret: Option<String>,
    pub username: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ForcePasswordRequest {
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ImportUserEntry {
    pub username: String,
    pub password_hash: String,
    pub password_hash_type: String,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

struct CredentialRow {
    id: i64,
    username: String,
    password_hash: String,
    password_hash_type: String,
    role: String,
    is_active: bool,
}

// ── Helpers ──

fn require_admin(ctx: &AuthContext) -> AppResult<String> {
    match ctx {
        AuthContext::WebSession { username, role } if role.is_admin() => Ok(username.clone()),
        AuthContext::WebSession { .. } => {
            Err(AppError::Auth("permisos insuficientes".to_string()))
        }
        AuthContext::HmacClient => Err(AppError::Auth("sesion requerida".to_string())),
    }
}

/// Each missing class is named so clients can localize per class.
fn check_password_policy(password: &str) -> AppResult<()> {
    let mut missing: Vec<&str> = Vec::new();
    if password.chars().count() < 10 {
        missing.push("al menos 10 caracteres");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        missing.push("una minuscula");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        missing.push("una mayuscula");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push("un numero");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        missing.push("un caracter especial");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "la contrasena requiere: {}",
            missing.join(", ")
        )))
    }
}

fn parse_role(role: Option<&str>, default: Role) -> AppResult<Role> {
    match role {
        None => Ok(default),
        Some(s) => {
            Role::parse(s).ok_or_else(|| AppError::Validation(format!("rol desconocido: {s}")))
        }
    }
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<WebUser> {
    Ok(WebUser {
        id: row.get(0)?,
        username: row.get(1)?,
        role: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        last_login_at: row.get(6)?,
    })
}

const USER_COLUMNS: &str = "id, username, role, is_active, created_at, updated_at, last_login_at";

async fn fetch_user_by_username(pool: &Pool, username: &str) -> AppResult<Option<WebUser>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let name = username.to_string();
    let user = conn
        .interact(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM web_users WHERE username = ?1"),
                params![name],
                user_from_row,
            )
            .ok()
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?;
    Ok(user)
}

async fn user_count(pool: &Pool) -> AppResult<i64> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let count = conn
        .interact(|conn| {
            conn.query_row("SELECT COUNT(*) FROM web_users", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(count)
}

fn verify_credentials(password: &str, row: &CredentialRow) -> bool {
    match row.password_hash_type.as_str() {
        "pbkdf2_sha256" => crypto::pbkdf2_verify(password, &row.password_hash),
        "bcrypt" => crypto::bcrypt_verify(password, &row.password_hash),
        other => {
            tracing::warn!(hash_type = other, "unknown password hash type");
            false
        }
    }
}

// ── Handlers ──

/// POST /web/auth/bootstrap — one-shot first-user creation, gated by the
/// configured secret and an empty users table.
pub async fn bootstrap(
    State(state): State<Arc<AuthState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ApiJson(input): ApiJson<BootstrapRequest>,
) -> AppResult<impl axum::response::IntoResponse> {
    if state.bootstrap_secret.is_empty() {
        return Err(AppError::Unavailable(
            "WEB_LOGIN_PASSWORD no configurado".to_string(),
        ));
    }

    let ip = client_ip(&headers, peer);
    let username = input.username.trim().to_lowercase();
    let provided = input.bootstrap_secret.unwrap_or_default();

    let count = user_count(&state.pool).await?;
    let secret_ok =
        crypto::constant_time_eq(provided.as_bytes(), state.bootstrap_secret.as_bytes());
    if count > 0 || !secret_ok {
        audit::spawn_record(
            state.pool.clone(),
            "bootstrap",
            &username,
            false,
            json!({ "reason": if count > 0 { "users_exist" } else { "bad_secret" } }),
            Some(ip),
        );
        return Err(AppError::Auth("bootstrap no disponible".to_string()));
    }

    if username.is_empty() {
        return Err(AppError::Validation("usuario requerido".to_string()));
    }
    check_password_policy(&input.password)?;
    let role = parse_role(input.role.as_deref(), Role::Admin)?;

    let hash = crypto::pbkdf2_hash(&input.password);
    let now = now_iso();

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let (name, role_str, created) = (username.clone(), role.as_str(), now.clone());
    let user = conn
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO web_users
                     (username, password_hash, password_hash_type, role, is_active, created_at, updated_at)
                 VALUES (?1, ?2, 'pbkdf2_sha256', ?3, 1, ?4, ?4)",
                params![name, hash, role_str, created],
            )?;
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM web_users WHERE username = ?1"),
                params![name],
                user_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let token = session::mint_token(&state.session_secret, &username, role, state.session_ttl_secs);
    audit::spawn_record(
        state.pool.clone(),
        "bootstrap",
        &username,
        true,
        json!({ "role": role.as_str() }),
        Some(ip),
    );
    tracing::info!(username = %username, "bootstrap user created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "token": token, "user": user })),
    ))
}

/// POST /web/auth/login — exchange credentials for a session token.
pub async fn login(
    State(state): State<Arc<AuthState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ApiJson(input): ApiJson<LoginRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let username = input.username.trim().to_lowercase();
    let ip = client_ip(&headers, peer);

    // Counter check comes before any hash work.
    if let Some(limiter) = &state.limiter {
        if limiter.is_blocked(&ip, &username) {
            return Err(AppError::RateLimited(
                "demasiados intentos, intente mas tarde".to_string(),
            ));
        }
    }

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let name = username.clone();
    let row = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT id, username, password_hash, password_hash_type, role, is_active
                 FROM web_users WHERE username = ?1",
                params![name],
                |row| {
                    Ok(CredentialRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        password_hash_type: row.get(3)?,
                        role: row.get(4)?,
                        is_active: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .ok()
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?;

    let verified = match row {
        Some(r) if r.is_active && verify_credentials(&input.password, &r) => Some(r),
        _ => None,
    };

    let Some(row) = verified else {
        if let Some(limiter) = &state.limiter {
            limiter.record_failure(&ip, &username);
        }
        audit::spawn_record(
            state.pool.clone(),
            "web_login",
            &username,
            false,
            json!({}),
            Some(ip),
        );
        // Same message for unknown user, inactive user and bad password.
        return Err(AppError::Auth("credenciales invalidas".to_string()));
    };
    let role = Role::parse(&row.role)
        .ok_or_else(|| AppError::Internal(format!("rol desconocido: {}", row.role)))?;

    // Legacy bcrypt hashes are upgraded in place before the token is issued.
    let now = now_iso();
    let rehash = if row.password_hash_type == "bcrypt" {
        Some(crypto::pbkdf2_hash(&input.password))
    } else {
        None
    };
    let (user_id, ts) = (row.id, now.clone());
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    conn.interact(move |conn| {
        if let Some(hash) = rehash {
            conn.execute(
                "UPDATE web_users
                 SET password_hash = ?1, password_hash_type = 'pbkdf2_sha256', updated_at = ?2
                 WHERE id = ?3",
                params![hash, ts, user_id],
            )?;
        }
        conn.execute(
            "UPDATE web_users SET last_login_at = ?1 WHERE id = ?2",
            params![ts, user_id],
        )
    })
    .await
    .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if let Some(limiter) = &state.limiter {
        limiter.reset(&ip, &username);
    }

    let token =
        session::mint_token(&state.session_secret, &row.username, role, state.session_ttl_secs);
    audit::spawn_record(
        state.pool.clone(),
        "web_login",
        &username,
        true,
        json!({}),
        Some(ip),
    );
    tracing::info!(username = %username, "web login");

    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": { "id": row.id, "username": row.username, "role": role.as_str() },
    })))
}

/// GET /web/auth/me — identity behind the current session.
pub async fn me(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<AuthContext>,
) -> AppResult<Json<serde_json::Value>> {
    let AuthContext::WebSession { username, .. } = &ctx else {
        return Err(AppError::Auth("sesion requerida".to_string()));
    };
    let user = fetch_user_by_username(&state.pool, username)
        .await?
        .ok_or_else(|| AppError::Auth("sesion expirada".to_string()))?;
    Ok(Json(json!({ "success": true, "user": user })))
}

/// GET /web/auth/users — admin only, ordered by username.
pub async fn list_users(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<AuthContext>,
) -> AppResult<Json<Vec<WebUser>>> {
    require_admin(&ctx)?;

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let users = conn
        .interact(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM web_users ORDER BY username ASC"
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(users))
}

/// POST /web/auth/users — admin only.
pub async fn create_user(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(input): ApiJson<CreateUserRequest>,
) -> AppResult<impl axum::response::IntoResponse> {
    let caller = require_admin(&ctx)?;

    let username = input.username.trim().to_lowercase();
    if username.is_empty() {
        return Err(AppError::Validation("usuario requerido".to_string()));
    }
    check_password_policy(&input.password)?;
    let role = parse_role(input.role.as_deref(), Role::Viewer)?;

    let hash = crypto::pbkdf2_hash(&input.password);
    let now = now_iso();
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let (name, role_str, created) = (username.clone(), role.as_str(), now);
    let user = conn
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO web_users
                     (username, password_hash, password_hash_type, role, is_active, created_at, updated_at)
                 VALUES (?1, ?2, 'pbkdf2_sha256', ?3, 1, ?4, ?4)",
                params![name, hash, role_str, created],
            )?;
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM web_users WHERE username = ?1"),
                params![name],
                user_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                AppError::Validation("el usuario ya existe".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    audit::spawn_record(
        state.pool.clone(),
        "create_user",
        &caller,
        true,
        json!({ "target": username, "role": role.as_str() }),
        None,
    );

    Ok((StatusCode::CREATED, Json(user)))
}

/// PATCH /web/auth/users/{id} — role/active changes; super_admin rows cannot
/// be demoted or deactivated.
pub async fn update_user(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<UpdateUserRequest>,
) -> AppResult<Json<WebUser>> {
    let caller = require_admin(&ctx)?;

    let new_role = match input.role.as_deref() {
        None => None,
        Some(s) => Some(
            Role::parse(s).ok_or_else(|| AppError::Validation(format!("rol desconocido: {s}")))?,
        ),
    };

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let current = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT role FROM web_users WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .ok()
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?;

    let Some(current_role) = current else {
        return Err(AppError::NotFound("usuario no encontrado".to_string()));
    };

    if current_role == Role::SuperAdmin.as_str() {
        let demotes = new_role.is_some_and(|r| r != Role::SuperAdmin);
        let deactivates = input.is_active == Some(false);
        if demotes || deactivates {
            return Err(AppError::Validation(
                "no se puede degradar ni desactivar un super_admin".to_string(),
            ));
        }
    }

    let now = now_iso();
    let role_str = new_role.map(|r| r.as_str().to_string());
    let is_active = input.is_active;
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let user = conn
        .interact(move |conn| {
            if let Some(ref role) = role_str {
                conn.execute(
                    "UPDATE web_users SET role = ?1, updated_at = ?2 WHERE id = ?3",
                    params![role, now, id],
                )?;
            }
            if let Some(active) = is_active {
                conn.execute(
                    "UPDATE web_users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                    params![active as i64, now, id],
                )?;
            }
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM web_users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    audit::spawn_record(
        state.pool.clone(),
        "update_user",
        &caller,
        true,
        json!({ "target_id": id }),
        None,
    );

    Ok(Json(user))
}

/// POST /web/auth/users/{id}/force-password — admin reset. Existing sessions
/// die through the per-request active-user check, not a revocation list.
pub async fn force_password(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<ForcePasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let caller = require_admin(&ctx)?;
    check_password_policy(&input.new_password)?;

    let hash = crypto::pbkdf2_hash(&input.new_password);
    let now = now_iso();
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let updated = conn
        .interact(move |conn| {
            conn.execute(
                "UPDATE web_users
                 SET password_hash = ?1, password_hash_type = 'pbkdf2_sha256', updated_at = ?2
                 WHERE id = ?3",
                params![hash, now, id],
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if updated == 0 {
        return Err(AppError::NotFound("usuario no encontrado".to_string()));
    }

    audit::spawn_record(
        state.pool.clone(),
        "force_password",
        &caller,
        true,
        json!({ "target_id": id }),
        None,
    );

    Ok(Json(json!({ "success": true })))
}

/// POST /web/auth/import-users — bulk import preserving foreign hashes.
/// Imported bcrypt hashes upgrade to PBKDF2 on first successful login.
pub async fn import_users(
    State(state): State<Arc<AuthState>>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(entries): ApiJson<Vec<ImportUserEntry>>,
) -> AppResult<Json<serde_json::Value>> {
    let caller = require_admin(&ctx)?;

    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let username = entry.username.trim().to_lowercase();
        if username.is_empty() {
            return Err(AppError::Validation("usuario requerido".to_string()));
        }
        if !matches!(entry.password_hash_type.as_str(), "pbkdf2_sha256" | "bcrypt") {
            return Err(AppError::Validation(format!(
                "tipo de hash desconocido: {}",
                entry.password_hash_type
            )));
        }
        let role = parse_role(entry.role.as_deref(), Role::Viewer)?;
        rows.push((
            username,
            entry.password_hash,
            entry.password_hash_type,
            role.as_str().to_string(),
            entry.is_active.unwrap_or(true),
        ));
    }

    let now = now_iso();
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let imported = conn
        .interact(move |conn| {
            let tx = conn.transaction()?;
            let mut imported = 0usize;
            for (username, hash, hash_type, role, is_active) in rows {
                imported += tx.execute(
                    "INSERT OR IGNORE INTO web_users
                         (username, password_hash, password_hash_type, role, is_active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![username, hash, hash_type, role, is_active as i64, now],
                )?;
            }
            tx.commit()?;
            Ok::<_, rusqlite::Error>(imported)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    audit::spawn_record(
        state.pool.clone(),
        "import_users",
        &caller,
        true,
        json!({ "imported": imported }),
        None,
    );

    Ok(Json(json!({ "success": true, "imported": imported })))
}
