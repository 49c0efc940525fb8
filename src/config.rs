use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./snaplink.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when reporting short links, e.g. "https://go.example.com"
    /// Must NOT have a trailing slash.
    pub base_url: String,

    /// Length of generated short codes
    pub code_length: usize,

    /// Maximum number of click jobs queued behind the recorder worker.
    /// When full, new jobs are rejected (and logged), never buffered
    /// unboundedly.
    pub recorder_queue_depth: usize,

    /// Upper bound on a single store lookup from the redirect path, in
    /// milliseconds. Lookups past this resolve to a transient failure
    /// instead of hanging the client.
    pub store_timeout_ms: u64,

    /// Whether the recorder worker performs IP geolocation lookups.
    pub geo_lookup_enabled: bool,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let code_length = std::env::var("CODE_LENGTH")
            .unwrap_or_else(|_| "7".into())
            .parse::<usize>()
            .context("CODE_LENGTH must be a positive integer")?;

        let recorder_queue_depth = std::env::var("RECORDER_QUEUE_DEPTH")
            .unwrap_or_else(|_| "1024".into())
            .parse::<usize>()
            .context("RECORDER_QUEUE_DEPTH must be a positive integer")?;

        let store_timeout_ms = std::env::var("STORE_TIMEOUT_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse::<u64>()
            .context("STORE_TIMEOUT_MS must be a positive integer")?;

        let geo_lookup_enabled = std::env::var("GEO_LOOKUP_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./snaplink.db".into()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            base_url,
            code_length,
            recorder_queue_depth,
            store_timeout_ms,
            geo_lookup_enabled,
        })
    }
}

impl Default for AppConfig {
    /// Defaults used by tests; mirrors `from_env` with no variables set.
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            base_url: "http://localhost:3000".into(),
            code_length: 7,
            recorder_queue_depth: 1024,
            store_timeout_ms: 2000,
            geo_lookup_enabled: false,
        }
    }
}
