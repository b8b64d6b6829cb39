use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("instalog.db")
}

/// Blob storage for incident photos. No configured directory means the
/// bucket binding is absent and photo uploads fail with a configuration error.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BlobConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared token for the machine-to-machine path. Empty together with
    /// `api_secret` disables HMAC verification (dev mode).
    #[serde(default)]
    pub api_token: String,
    /// HMAC signing secret for the machine-to-machine path.
    #[serde(default)]
    pub api_secret: String,
    /// Bootstrap secret gating first-user creation.
    #[serde(default)]
    pub web_login_password: String,
    /// Session token signing secret for the console path.
    #[serde(default)]
    pub web_session_secret: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

fn default_session_ttl() -> u64 {
    28800 // 8 hours
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_secret: String::new(),
            web_login_password: String::new(),
            web_session_secret: String::new(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Failed-login counter per (ip, username). Off models a missing
    /// rate-limit store binding.
    #[serde(default = "default_true")]
    pub login_counter_enabled: bool,
    #[serde(default = "default_auth_per_second")]
    pub auth_per_second: u64,
    #[serde(default = "default_auth_burst_size")]
    pub auth_burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_counter_enabled: true,
            auth_per_second: default_auth_per_second(),
            auth_burst_size: default_auth_burst_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_auth_per_second() -> u64 {
    5
}
fn default_auth_burst_size() -> u32 {
    20
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (INSTALOG__SERVER__PORT=8788, etc.)
        builder = builder.add_source(
            Environment::with_prefix("INSTALOG")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder.build()?.try_deserialize()?;

        // Deployments set the auth material through flat variable names; those
        // take precedence over the file and the prefixed overlay.
        if let Ok(v) = std::env::var("API_TOKEN") {
            cfg.auth.api_token = v;
        }
        if let Ok(v) = std::env::var("API_SECRET") {
            cfg.auth.api_secret = v;
        }
        if let Ok(v) = std::env::var("WEB_LOGIN_PASSWORD") {
            cfg.auth.web_login_password = v;
        }
        if let Ok(v) = std::env::var("WEB_SESSION_SECRET") {
            cfg.auth.web_session_secret = v;
        }

        Ok(cfg)
    }

    /// Validate configuration for security requirements.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth.web_session_secret.is_empty() {
            return Err("auth.web_session_secret must be set to a strong, unique value. \
                 Set it in config.toml or via the WEB_SESSION_SECRET env var."
                .to_string());
        }
        if self.auth.api_token.is_empty() != self.auth.api_secret.is_empty() {
            return Err(
                "auth.api_token and auth.api_secret must be set together (or both left \
                 empty to disable HMAC verification in development)."
                    .to_string(),
            );
        }
        Ok(())
    }

    /// True when the machine-to-machine path runs without signature checks.
    pub fn hmac_disabled(&self) -> bool {
        self.auth.api_token.is_empty() && self.auth.api_secret.is_empty()
    }
}
