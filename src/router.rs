use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{middleware, Extension, Json, Router};
use deadpool_sqlite::Pool;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::audit;
use crate::auth::hmac::HmacKeys;
use crate::auth::rate_limit::LoginRateLimiter;
use crate::auth::session::SessionKeys;
use crate::auth::users::{self, AuthState};
use crate::auth::{hmac, session};
use crate::config::AppConfig;
use crate::incidents;
use crate::installs;
use crate::photos::{self, PhotoState, MAX_PHOTO_BYTES};
use crate::stats;
use crate::storage::blob::BlobStore;
use crate::types::now_iso;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// The business surface shared by the HMAC path and its `/web` twin. Auth is
/// layered on by the caller; handlers never check credentials themselves.
fn business_routes(pool: Arc<Pool>, photo_state: Arc<PhotoState>) -> Router {
    let record_routes = Router::new()
        .route(
            "/installations",
            get(installs::list_installations).post(installs::create_installation),
        )
        .route(
            "/installations/{id}",
            get(installs::get_installation)
                .put(installs::update_installation)
                .delete(installs::delete_installation),
        )
        .route("/records", post(installs::create_record))
        .route(
            "/installations/{id}/incidents",
            get(incidents::list_incidents).post(incidents::create_incident),
        )
        .route("/statistics", get(stats::get_statistics))
        .route(
            "/audit-logs",
            get(audit::list_audit_logs).post(audit::append_audit_log),
        )
        .with_state(pool);

    let photo_routes = Router::new()
        .route("/incidents/{id}/photos", post(photos::upload_photo))
        .route("/photos/{id}", get(photos::fetch_photo))
        // Leave headroom above the hard photo cap so the handler produces the
        // enveloped 413 instead of the extractor.
        .layer(DefaultBodyLimit::max(MAX_PHOTO_BYTES + 64 * 1024))
        .with_state(photo_state);

    record_routes.merge(photo_routes)
}

async fn service_info() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "now": now_iso() }))
}

/// Unknown path or method. Bare OPTIONS preflights are answered here with 200
/// so the CORS layer can attach its headers.
async fn not_found(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Ruta no encontrada.").into_response()
    }
}

pub fn build_router(config: &AppConfig, pool: Pool, blob: Option<BlobStore>) -> Router {
    let hmac_keys = Arc::new(HmacKeys {
        token: config.auth.api_token.clone(),
        secret: config.auth.api_secret.clone(),
    });
    let session_keys = Arc::new(SessionKeys {
        secret: config.auth.web_session_secret.clone(),
    });
    let session_pool = Arc::new(pool.clone());
    let business_pool = Arc::new(pool.clone());
    let photo_state = Arc::new(PhotoState {
        pool: pool.clone(),
        blob,
    });
    let auth_state = Arc::new(AuthState {
        pool: pool.clone(),
        session_secret: config.auth.web_session_secret.clone(),
        session_ttl_secs: config.auth.session_ttl_secs,
        bootstrap_secret: config.auth.web_login_password.clone(),
        limiter: config
            .rate_limit
            .login_counter_enabled
            .then(LoginRateLimiter::new),
    });

    // ── Public routes ──
    let public_routes = Router::new()
        .route("/", get(service_info))
        .route("/health", get(health));

    // ── Machine-to-machine surface (HMAC-signed) ──
    let hmac_api = business_routes(business_pool.clone(), photo_state.clone())
        .layer(middleware::from_fn(hmac::require_hmac))
        .layer(Extension(hmac_keys));

    // ── Console twin of the business surface (session auth) ──
    let web_business = business_routes(business_pool, photo_state)
        .layer(middleware::from_fn(session::require_session))
        .layer(Extension(session_keys.clone()))
        .layer(Extension(session_pool.clone()));

    // ── Console auth routes (login/bootstrap public, rate-limited) ──
    let auth_governor_conf = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.auth_per_second)
        .burst_size(config.rate_limit.auth_burst_size)
        .finish()
        .expect("failed to build auth rate limiter config");

    let web_auth_public = Router::new()
        .route("/auth/bootstrap", post(users::bootstrap))
        .route("/auth/login", post(users::login))
        .layer(GovernorLayer::new(auth_governor_conf))
        .with_state(auth_state.clone());

    let web_auth_protected = Router::new()
        .route("/auth/me", get(users::me))
        .route(
            "/auth/users",
            get(users::list_users).post(users::create_user),
        )
        .route("/auth/users/{id}", patch(users::update_user))
        .route(
            "/auth/users/{id}/force-password",
            post(users::force_password),
        )
        .route("/auth/import-users", post(users::import_users))
        .layer(middleware::from_fn(session::require_session))
        .layer(Extension(session_keys))
        .layer(Extension(session_pool))
        .with_state(auth_state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-token"),
            HeaderName::from_static("x-request-timestamp"),
            HeaderName::from_static("x-request-signature"),
            HeaderName::from_static("x-file-name"),
        ]);

    Router::new()
        .merge(public_routes)
        .merge(hmac_api)
        .nest(
            "/web",
            web_auth_public
                .merge(web_auth_protected)
                .merge(web_business),
        )
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(cors)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}
