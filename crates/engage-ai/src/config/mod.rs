use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            pipeline: PipelineConfig::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Tunables for the candidate processing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of per-model scoring tasks running at once.
    pub scoring_concurrency: usize,
    /// Budget for a single model invocation before it is treated as failed.
    pub model_timeout: Duration,
    /// Default TTL applied to cached scores without a model override.
    pub score_cache_ttl: Duration,
    /// Consecutive failures that trip a model's circuit breaker open.
    pub breaker_failure_threshold: u32,
    /// Successes required in half-open state to close the breaker again.
    pub breaker_success_threshold: u32,
    /// How long an open breaker rejects calls before probing the model.
    pub breaker_reset_timeout: Duration,
    /// Retry attempts for unprocessed batch-write items.
    pub batch_retry_attempts: u32,
    /// Base delay for exponential batch-write backoff.
    pub batch_retry_base_delay: Duration,
    /// Candidates per chunk during batch scoring.
    pub batch_chunk_size: usize,
    /// Days until a stored candidate expires out of the store.
    pub candidate_ttl_days: i64,
    /// Static fallback score when the cascade bottoms out.
    pub default_score: f64,
    /// Confidence attached to the static fallback score.
    pub default_confidence: f64,
}

impl PipelineConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("PIPELINE_SCORING_CONCURRENCY") {
            config.scoring_concurrency = parse_env("PIPELINE_SCORING_CONCURRENCY", &raw)?;
        }
        if let Ok(raw) = env::var("PIPELINE_MODEL_TIMEOUT_MS") {
            config.model_timeout =
                Duration::from_millis(parse_env("PIPELINE_MODEL_TIMEOUT_MS", &raw)?);
        }
        if let Ok(raw) = env::var("PIPELINE_SCORE_CACHE_TTL_SECS") {
            config.score_cache_ttl =
                Duration::from_secs(parse_env("PIPELINE_SCORE_CACHE_TTL_SECS", &raw)?);
        }
        if let Ok(raw) = env::var("PIPELINE_BREAKER_FAILURE_THRESHOLD") {
            config.breaker_failure_threshold =
                parse_env("PIPELINE_BREAKER_FAILURE_THRESHOLD", &raw)?;
        }
        if let Ok(raw) = env::var("PIPELINE_BREAKER_SUCCESS_THRESHOLD") {
            config.breaker_success_threshold =
                parse_env("PIPELINE_BREAKER_SUCCESS_THRESHOLD", &raw)?;
        }
        if let Ok(raw) = env::var("PIPELINE_BREAKER_RESET_TIMEOUT_MS") {
            config.breaker_reset_timeout =
                Duration::from_millis(parse_env("PIPELINE_BREAKER_RESET_TIMEOUT_MS", &raw)?);
        }
        if let Ok(raw) = env::var("PIPELINE_BATCH_RETRY_ATTEMPTS") {
            config.batch_retry_attempts = parse_env("PIPELINE_BATCH_RETRY_ATTEMPTS", &raw)?;
        }
        if let Ok(raw) = env::var("PIPELINE_BATCH_CHUNK_SIZE") {
            config.batch_chunk_size = parse_env("PIPELINE_BATCH_CHUNK_SIZE", &raw)?;
        }
        if let Ok(raw) = env::var("PIPELINE_CANDIDATE_TTL_DAYS") {
            config.candidate_ttl_days = parse_env("PIPELINE_CANDIDATE_TTL_DAYS", &raw)?;
        }

        if config.scoring_concurrency == 0 || config.batch_chunk_size == 0 {
            return Err(ConfigError::ZeroBound);
        }

        Ok(config)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scoring_concurrency: 4,
            model_timeout: Duration::from_millis(2_000),
            score_cache_ttl: Duration::from_secs(6 * 60 * 60),
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_reset_timeout: Duration::from_secs(30),
            batch_retry_attempts: 3,
            batch_retry_base_delay: Duration::from_millis(100),
            batch_chunk_size: 25,
            candidate_ttl_days: 30,
            default_score: 0.1,
            default_confidence: 0.0,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        })
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    ZeroBound,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative number, found '{value}'")
            }
            ConfigError::ZeroBound => {
                write!(f, "pipeline concurrency and chunk bounds must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("PIPELINE_SCORING_CONCURRENCY");
        env::remove_var("PIPELINE_MODEL_TIMEOUT_MS");
        env::remove_var("PIPELINE_BATCH_CHUNK_SIZE");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pipeline.scoring_concurrency, 4);
        assert_eq!(config.pipeline.batch_chunk_size, 25);
    }

    #[test]
    fn pipeline_overrides_are_read_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PIPELINE_SCORING_CONCURRENCY", "8");
        env::set_var("PIPELINE_MODEL_TIMEOUT_MS", "750");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.pipeline.scoring_concurrency, 8);
        assert_eq!(config.pipeline.model_timeout, Duration::from_millis(750));
        reset_env();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PIPELINE_SCORING_CONCURRENCY", "0");
        assert!(matches!(AppConfig::load(), Err(ConfigError::ZeroBound)));
        reset_env();
    }
}
