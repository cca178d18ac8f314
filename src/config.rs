//! Application configuration loaded from environment variables.
//!
//! A `.env` file is honoured for local development.

use std::env;
use std::time::Duration;

/// Which identity service implementation backs each browser context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// GoTrue/PostgREST over HTTP
    GoTrue,
    /// In-process identity service (local development only)
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Identity service ---
    /// Base URL of the identity/data service (e.g. https://xyz.example.co)
    pub identity_url: String,
    /// Public API key sent as `apikey` on every request
    pub identity_anon_key: String,
    pub backend: BackendKind,
    /// Request timeout for identity service calls
    pub http_timeout: Duration,

    // --- Site ---
    /// Public URL of this site, used for redirect targets
    pub site_url: String,
    /// Server port
    pub port: u16,

    // --- Sessions ---
    /// Key for signing the OAuth state parameter (raw bytes)
    pub oauth_state_key: Vec<u8>,
    /// Minimum gap between verification code resends
    pub resend_cooldown: Duration,
    /// Browser contexts idle longer than this are dropped
    pub context_idle: Duration,
}

impl Config {
    /// Config for tests: memory backend, short cooldown.
    pub fn test_default() -> Self {
        Self {
            identity_url: "http://localhost:54321".to_string(),
            identity_anon_key: "test_anon_key".to_string(),
            backend: BackendKind::Memory,
            http_timeout: Duration::from_secs(5),
            site_url: "http://localhost:3000".to_string(),
            port: 8080,
            oauth_state_key: b"test_oauth_state_key_32_bytes!!!".to_vec(),
            resend_cooldown: Duration::from_secs(60),
            context_idle: Duration::from_secs(30 * 60),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let backend = match env::var("IDENTITY_BACKEND")
            .unwrap_or_else(|_| "gotrue".to_string())
            .as_str()
        {
            "gotrue" => BackendKind::GoTrue,
            "memory" => BackendKind::Memory,
            _ => return Err(ConfigError::Invalid("IDENTITY_BACKEND")),
        };

        let (identity_url, identity_anon_key) = match backend {
            BackendKind::GoTrue => (
                env::var("IDENTITY_URL")
                    .map(|v| v.trim().trim_end_matches('/').to_string())
                    .map_err(|_| ConfigError::Missing("IDENTITY_URL"))?,
                env::var("IDENTITY_ANON_KEY")
                    .map(|v| v.trim().to_string())
                    .map_err(|_| ConfigError::Missing("IDENTITY_ANON_KEY"))?,
            ),
            BackendKind::Memory => (String::new(), String::new()),
        };

        let oauth_state_key = env::var("OAUTH_STATE_KEY")
            .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
            .into_bytes();
        if oauth_state_key.len() < 32 {
            return Err(ConfigError::Invalid("OAUTH_STATE_KEY"));
        }

        Ok(Self {
            identity_url,
            identity_anon_key,
            backend,
            http_timeout: Duration::from_secs(secs_var("HTTP_TIMEOUT_SECS", 10)?),
            site_url: env::var("SITE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            oauth_state_key,
            resend_cooldown: Duration::from_secs(secs_var("RESEND_COOLDOWN_SECS", 60)?),
            context_idle: Duration::from_secs(secs_var("CONTEXT_IDLE_SECS", 30 * 60)?),
        })
    }

    /// Whether cookies may be sent over plain HTTP.
    pub fn is_local(&self) -> bool {
        self.site_url.starts_with("http://localhost") || self.site_url.starts_with("http://127.0.0.1")
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
