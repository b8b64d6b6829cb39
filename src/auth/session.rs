use axum::{extract::Request, http::header, http::Method, middleware::Next, response::Response};
use deadpool_sqlite::Pool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AuthContext;
use crate::crypto;
use crate::error::{AppError, AppResult};
use crate::types::Role;

/// Signing secret for console session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    pub secret: String,
}

/// Claims carried by a console session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub scope: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Sign claims into the wire form `base64url(payload).hex(hmac)`.
pub fn sign_claims(secret: &str, claims: &SessionClaims) -> String {
    let json = serde_json::to_vec(claims).expect("session claims serialize");
    let payload = crypto::base64url_encode(&json);
    let sig = crypto::hmac_sha256_hex(secret.as_bytes(), payload.as_bytes());
    format!("{payload}.{sig}")
}

/// Mint a fresh token for a user.
pub fn mint_token(secret: &str, username: &str, role: Role, ttl_secs: u64) -> String {
    let now = chrono::Utc::now().timestamp();
    sign_claims(
        secret,
        &SessionClaims {
            scope: "web".to_string(),
            username: username.to_string(),
            role,
            iat: now,
            exp: now + ttl_secs as i64,
        },
    )
}

/// Verify signature, then payload: scope and expiry. The per-request
/// active-user check happens in the middleware, not here.
pub fn verify_token(secret: &str, token: &str) -> AppResult<SessionClaims> {
    let Some((payload, sig)) = token.split_once('.') else {
        return Err(AppError::Auth("token invalido".to_string()));
    };

    let expected = crypto::hmac_sha256_hex(secret.as_bytes(), payload.as_bytes());
    if !crypto::constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
        return Err(AppError::Auth("token invalido".to_string()));
    }

    let bytes = crypto::base64url_decode(payload)
        .ok_or_else(|| AppError::Auth("token invalido".to_string()))?;
    let claims: SessionClaims = serde_json::from_slice(&bytes)
        .map_err(|_| AppError::Auth("token invalido".to_string()))?;

    if claims.scope != "web" {
        return Err(AppError::Auth("token invalido".to_string()));
    }
    if claims.exp <= chrono::Utc::now().timestamp() {
        return Err(AppError::Auth("sesion expirada".to_string()));
    }

    Ok(claims)
}

/// Session middleware for `/web/*` routes. Tokens are only honored while the
/// referenced user is still active and holds the role named in the claim.
pub async fn require_session(request: Request, next: Next) -> Result<Response, AppError> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let keys = request
        .extensions()
        .get::<Arc<SessionKeys>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("session keys not configured".to_string()))?;
    if keys.secret.is_empty() {
        return Err(AppError::Unavailable(
            "WEB_SESSION_SECRET no configurado".to_string(),
        ));
    }

    let pool = request
        .extensions()
        .get::<Arc<Pool>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("session pool not configured".to_string()))?;

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| AppError::Auth("token bearer requerido".to_string()))?;

    let claims = verify_token(&keys.secret, &token)?;

    let username = claims.username.clone();
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let row = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT role, is_active FROM web_users WHERE username = ?1",
                rusqlite::params![username],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .ok()
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?;

    let Some((role, active)) = row else {
        return Err(AppError::Auth("sesion expirada".to_string()));
    };
    if active == 0 || role != claims.role.as_str() {
        return Err(AppError::Auth("sesion expirada".to_string()));
    }

    let mut request = request;
    request.extensions_mut().insert(AuthContext::WebSession {
        username: claims.username,
        role: claims.role,
    });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-session-secret";

    #[test]
    fn mint_then_verify_round_trips() {
        let token = mint_token(SECRET, "ops_lead", Role::Admin, 3600);
        let claims = verify_token(SECRET, &token).unwrap();
        assert_eq!(claims.scope, "web");
        assert_eq!(claims.username, "ops_lead");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = mint_token(SECRET, "ops_lead", Role::Viewer, 3600);
        let mut forged = token.clone();
        forged.pop();
        forged.push(if token.ends_with('0') { '1' } else { '0' });
        assert!(verify_token(SECRET, &forged).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint_token(SECRET, "ops_lead", Role::Viewer, 3600);
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let token = sign_claims(
            SECRET,
            &SessionClaims {
                scope: "web".to_string(),
                username: "ops_lead".to_string(),
                role: Role::Viewer,
                iat: now - 7200,
                exp: now - 3600,
            },
        );
        let err = verify_token(SECRET, &token).unwrap_err();
        assert!(err.to_string().contains("expirada"));
    }

    #[test]
    fn foreign_scope_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let token = sign_claims(
            SECRET,
            &SessionClaims {
                scope: "mobile".to_string(),
                username: "ops_lead".to_string(),
                role: Role::Viewer,
                iat: now,
                exp: now + 3600,
            },
        );
        assert!(verify_token(SECRET, &token).is_err());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(verify_token(SECRET, "").is_err());
        assert!(verify_token(SECRET, "no-dot-here").is_err());
        assert!(verify_token(SECRET, "notbase64!.deadbeef").is_err());
    }
}
