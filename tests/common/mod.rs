#![allow(dead_code)]

use instalog::config::{
    AppConfig, AuthConfig, BlobConfig, DatabaseConfig, RateLimitConfig, ServerConfig,
};
use instalog::storage::blob::BlobStore;
use instalog::{router, storage};
use std::net::SocketAddr;

pub const API_TOKEN: &str = "test-api-token";
pub const API_SECRET: &str = "test-api-secret-0123456789abcdef";
pub const BOOTSTRAP_SECRET: &str = "bootstrap-secret";
pub const SESSION_SECRET: &str = "test-session-secret-0123456789ab";

pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub pool: deadpool_sqlite::Pool,
    // Held so the scratch database and blob directory outlive the server.
    _dir: tempfile::TempDir,
}

fn test_config(dir: &tempfile::TempDir) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        database: DatabaseConfig {
            path: dir.path().join("test.db"),
        },
        blob: BlobConfig {
            path: Some(dir.path().join("blobs")),
        },
        auth: AuthConfig {
            api_token: API_TOKEN.to_string(),
            api_secret: API_SECRET.to_string(),
            web_login_password: BOOTSTRAP_SECRET.to_string(),
            web_session_secret: SESSION_SECRET.to_string(),
            session_ttl_secs: 28800,
        },
        // Generous IP throttle so only the login counter shapes test outcomes.
        rate_limit: RateLimitConfig {
            login_counter_enabled: true,
            auth_per_second: 1000,
            auth_burst_size: 1000,
        },
    }
}

pub async fn spawn_server() -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);

    let pool = storage::sqlite::open_pool(&config.database)
        .await
        .expect("open pool");

    let blob = BlobStore::new(config.blob.path.clone().expect("blob path"))
        .await
        .expect("blob store");

    let app = router::build_router(&config, pool.clone(), Some(blob));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });

    TestServer {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        pool,
        _dir: dir,
    }
}

/// Build a signed request for the machine-to-machine path.
pub fn signed(
    server: &TestServer,
    method: reqwest::Method,
    path: &str,
    body: Vec<u8>,
) -> reqwest::RequestBuilder {
    let ts = chrono::Utc::now().timestamp();
    let signature =
        instalog::auth::hmac::sign_request(API_SECRET, method.as_str(), path, ts, &body);
    server
        .client
        .request(method, format!("{}{}", server.base, path))
        .header("X-API-Token", API_TOKEN)
        .header("X-Request-Timestamp", ts.to_string())
        .header("X-Request-Signature", signature)
        .body(body)
}

/// Signed JSON request.
pub fn signed_json(
    server: &TestServer,
    method: reqwest::Method,
    path: &str,
    body: &serde_json::Value,
) -> reqwest::RequestBuilder {
    let bytes = serde_json::to_vec(body).expect("serialize body");
    signed(server, method, path, bytes).header("Content-Type", "application/json")
}

/// A plausible JPEG body of the requested size (starts with FF D8 FF).
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0xAB; len];
    if len >= 3 {
        bytes[0] = 0xFF;
        bytes[1] = 0xD8;
        bytes[2] = 0xFF;
    }
    bytes
}
