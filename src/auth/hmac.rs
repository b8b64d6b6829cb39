use axum::{
    body::Body,
    extract::Request,
    http::Method,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::AuthContext;
use crate::crypto;
use crate::error::AppError;

/// Shared-secret material for the machine-to-machine path. Both fields empty
/// disables verification entirely (development mode).
#[derive(Clone)]
pub struct HmacKeys {
    pub token: String,
    pub secret: String,
}

/// Signed timestamps are accepted within this many seconds of server time.
const TIMESTAMP_WINDOW_SECS: i64 = 300;

/// Must cover the largest signed payload (photo uploads top out at 5 MiB).
const MAX_SIGNED_BODY_BYTES: usize = 6 * 1024 * 1024;

fn header_str(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// HMAC request verification middleware.
///
/// Canonical string: `METHOD|PATH|TIMESTAMP|sha256hex(body)`, signed with
/// `API_SECRET` and carried hex-encoded in `X-Request-Signature`. The token,
/// timestamp window and signature are each checked in order; comparisons are
/// constant time.
pub async fn require_hmac(request: Request, next: Next) -> Result<Response, AppError> {
    // CORS preflight is exempt from auth.
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let keys = request
        .extensions()
        .get::<Arc<HmacKeys>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("hmac keys not configured".to_string()))?;

    if keys.token.is_empty() && keys.secret.is_empty() {
        // Dev mode: signature checks disabled.
        let mut request = request;
        request.extensions_mut().insert(AuthContext::HmacClient);
        return Ok(next.run(request).await);
    }
    if keys.token.is_empty() {
        return Err(AppError::Unavailable("API_TOKEN no configurado".to_string()));
    }
    if keys.secret.is_empty() {
        return Err(AppError::Unavailable("API_SECRET no configurado".to_string()));
    }

    let token = header_str(&request, "x-api-token");
    let timestamp = header_str(&request, "x-request-timestamp");
    let signature = header_str(&request, "x-request-signature");
    let (Some(token), Some(timestamp), Some(signature)) = (token, timestamp, signature) else {
        return Err(AppError::Auth(
            "cabeceras de autenticacion requeridas".to_string(),
        ));
    };

    if !crypto::constant_time_eq(token.as_bytes(), keys.token.as_bytes()) {
        return Err(AppError::Auth("Token inválido".to_string()));
    }

    let Ok(ts) = timestamp.parse::<i64>() else {
        return Err(AppError::Auth("timestamp invalido".to_string()));
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > TIMESTAMP_WINDOW_SECS {
        return Err(AppError::Auth("timestamp fuera de ventana".to_string()));
    }

    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| AppError::Validation("no se pudo leer el cuerpo".to_string()))?;

    let canonical = format!(
        "{}|{}|{}|{}",
        method,
        path,
        ts,
        crypto::sha256_hex(&body_bytes)
    );
    let expected = crypto::hmac_sha256_hex(keys.secret.as_bytes(), canonical.as_bytes());

    if !crypto::constant_time_eq(expected.as_bytes(), signature.to_lowercase().as_bytes()) {
        return Err(AppError::Auth("firma invalida".to_string()));
    }

    let mut request = Request::from_parts(parts, Body::from(body_bytes));
    request.extensions_mut().insert(AuthContext::HmacClient);
    Ok(next.run(request).await)
}

/// Compute the signature a client must send for the given request parts.
/// Shared with the integration tests.
pub fn sign_request(secret: &str, method: &str, path: &str, timestamp: i64, body: &[u8]) -> String {
    let canonical = format!(
        "{}|{}|{}|{}",
        method,
        path,
        timestamp,
        crypto::sha256_hex(body)
    );
    crypto::hmac_sha256_hex(secret.as_bytes(), canonical.as_bytes())
}
