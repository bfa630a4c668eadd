use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3040)
    pub port: u16,
    /// Session database file path (default: ./platewise_sessions.db)
    pub database_path: PathBuf,
    /// Address of the internal replication server (required, ws:// or wss://)
    pub internal_sync_url: Url,
    /// Session settings
    pub session: SessionConfig,
    /// Authorization rate limit
    pub rate_limit: RateLimitConfig,
    /// Relay settings
    pub proxy: ProxyConfig,
    /// Bearer secret for /admin routes (admin routes disabled when unset)
    pub admin_secret: Option<String>,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

/// Session cookie and lifetime
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie carrying the session credential (default: platewise_session)
    pub cookie_name: String,
    /// Lifetime of new sessions (default: 30 days)
    pub ttl: Duration,
}

/// Fixed-window limit on authorization attempts per origin
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window length (default: 60s)
    pub window: Duration,
    /// Attempts allowed per window (default: 30)
    pub max_attempts: u32,
    /// Use the first X-Forwarded-For hop as the origin (default: false)
    pub trust_forwarded_for: bool,
}

/// Sync Transport Proxy settings
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Buffered bytes allowed per direction (default: 4 MiB)
    pub buffer_bytes: usize,
    /// Buffered frames allowed per direction (default: 256)
    pub buffer_frames: usize,
    /// How often open connections re-check their session (default: 15s)
    pub session_recheck_interval: Duration,
    /// Upstream dial timeout (default: 10s)
    pub upstream_connect_timeout: Duration,
    /// Time allowed to flush a closing hop (default: 5s)
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "platewise_session".to_string(),
            ttl: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_attempts: 30,
            trust_forwarded_for: false,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 4 * 1024 * 1024,
            buffer_frames: 256,
            session_recheck_interval: Duration::from_secs(15),
            upstream_connect_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3040".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let database_path = PathBuf::from(
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./platewise_sessions.db".to_string()),
        );

        let internal_sync_url = parse_sync_url(
            &env::var("INTERNAL_SYNC_URL").map_err(|_| ConfigError::Missing("INTERNAL_SYNC_URL"))?,
        )?;

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            cookie_name: env::var("SESSION_COOKIE_NAME")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(session_defaults.cookie_name),
            ttl: secs_var("SESSION_TTL")?.unwrap_or(session_defaults.ttl),
        };

        let limit_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window: secs_var("AUTH_RATE_LIMIT_WINDOW_SECS")?.unwrap_or(limit_defaults.window),
            max_attempts: parse_var("AUTH_RATE_LIMIT_MAX_ATTEMPTS")?
                .unwrap_or(limit_defaults.max_attempts),
            trust_forwarded_for: env::var("TRUST_FORWARDED_FOR")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        let proxy_defaults = ProxyConfig::default();
        let proxy = ProxyConfig {
            buffer_bytes: parse_var("PROXY_BUFFER_BYTES")?.unwrap_or(proxy_defaults.buffer_bytes),
            buffer_frames: parse_var("PROXY_BUFFER_FRAMES")?
                .unwrap_or(proxy_defaults.buffer_frames),
            session_recheck_interval: secs_var("SESSION_RECHECK_INTERVAL_SECS")?
                .unwrap_or(proxy_defaults.session_recheck_interval),
            upstream_connect_timeout: secs_var("UPSTREAM_CONNECT_TIMEOUT_SECS")?
                .unwrap_or(proxy_defaults.upstream_connect_timeout),
            drain_timeout: secs_var("PROXY_DRAIN_TIMEOUT_SECS")?
                .unwrap_or(proxy_defaults.drain_timeout),
        };
        if proxy.buffer_bytes == 0 || proxy.buffer_frames == 0 {
            return Err(ConfigError::Invalid("PROXY_BUFFER_BYTES/PROXY_BUFFER_FRAMES"));
        }
        if proxy.session_recheck_interval.is_zero() {
            return Err(ConfigError::Invalid("SESSION_RECHECK_INTERVAL_SECS"));
        }

        let admin_secret = env::var("ADMIN_SECRET")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            internal_sync_url,
            session,
            rate_limit,
            proxy,
            admin_secret,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Validate the internal replication server address.
pub fn parse_sync_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|_| ConfigError::Invalid("INTERNAL_SYNC_URL"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        _ => Err(ConfigError::Invalid("INTERNAL_SYNC_URL")),
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(None),
    }
}

fn secs_var(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_var::<u64>(key)?.map(Duration::from_secs))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid {0} environment variable")]
    Invalid(&'static str),
}
