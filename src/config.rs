//! Configuration for the depictio backend
//!
//! Settings are read from `DEPICTIO_*` environment variables with sensible
//! defaults, and can be overridden through the builder methods.

use std::time::Duration;

/// S3-compatible object-store credentials.
///
/// Passed verbatim to delta-rs (and polars' cloud reader) as storage options.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Allow plain-http endpoints (MinIO in dev setups)
    pub allow_http: bool,
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// MongoDB connection string
    pub mongo_url: String,

    /// MongoDB database name
    pub mongo_database: String,

    /// Redis connection string (lock manager)
    pub redis_url: String,

    /// Base URI under which per-DC Delta tables live
    /// (`s3://bucket/prefix` or an absolute local directory)
    pub delta_base_uri: String,

    /// S3 credentials; `None` for local-filesystem Delta tables
    pub s3: Option<S3Config>,

    /// Per-call timeout for outbound I/O (metadata store, Redis, probes)
    pub request_timeout: Duration,

    /// Per-subscriber event queue depth before messages are dropped
    pub event_queue_depth: usize,

    /// Lock TTL in seconds (deadlock bound on worker crash)
    pub lock_ttl_seconds: u64,
}

impl Settings {
    /// Create settings from the process environment with defaults
    pub fn from_env() -> Self {
        let s3 = match (
            std::env::var("DEPICTIO_S3_ENDPOINT"),
            std::env::var("DEPICTIO_S3_ACCESS_KEY"),
            std::env::var("DEPICTIO_S3_SECRET_KEY"),
        ) {
            (Ok(endpoint), Ok(access_key), Ok(secret_key)) => Some(S3Config {
                endpoint,
                region: std::env::var("DEPICTIO_S3_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
                access_key,
                secret_key,
                allow_http: std::env::var("DEPICTIO_S3_ALLOW_HTTP")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            }),
            _ => None,
        };

        Self {
            mongo_url: std::env::var("DEPICTIO_MONGO_URL")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            mongo_database: std::env::var("DEPICTIO_MONGO_DATABASE")
                .unwrap_or_else(|_| "depictio".to_string()),
            redis_url: std::env::var("DEPICTIO_REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            delta_base_uri: std::env::var("DEPICTIO_DELTA_BASE_URI")
                .unwrap_or_else(|_| "/data/depictio/deltalake".to_string()),
            s3,
            request_timeout: Duration::from_secs(
                std::env::var("DEPICTIO_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            event_queue_depth: 64,
            lock_ttl_seconds: 30,
        }
    }

    /// Override the Delta base URI
    pub fn with_delta_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.delta_base_uri = uri.into();
        self
    }

    /// Override the MongoDB target
    pub fn with_mongo(mut self, url: impl Into<String>, database: impl Into<String>) -> Self {
        self.mongo_url = url.into();
        self.mongo_database = database.into();
        self
    }

    /// Override the Redis URL
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Override the per-call timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Delta table URI for a data collection id.
    ///
    /// The URI is recorded once in the metadata store at assignment time and
    /// never rewritten; this derives the canonical form.
    pub fn delta_table_uri(&self, dc_id: &str) -> String {
        let base = self.delta_base_uri.trim_end_matches('/');
        format!("{base}/{dc_id}")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}
