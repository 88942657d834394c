use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::Backoff;
use crate::resilience::{BreakerConfig, RateLimitConfig, ResilienceConfig};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub classifier: ClassifierConfig,
    pub whatsapp: WhatsAppConfig,
    pub delivery: DeliveryConfig,
    pub calendar: CalendarConfig,
    pub idempotency: IdempotencyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    /// Without a base URL every message degrades to the fallback classification.
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub instance: String,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
    pub rate_capacity: u32,
    pub rate_refill_per_sec: f64,
    pub cache_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    pub retention_hours: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub cache_enabled: Option<bool>,
    pub classifier_base_url: Option<String>,
    pub whatsapp_base_url: Option<String>,
    pub whatsapp_api_key: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tutorbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            cache: CacheConfig { enabled: true, ttl_secs: 300, max_entries: 10_000 },
            classifier: ClassifierConfig {
                base_url: None,
                api_key: None,
                timeout_ms: 150,
                retries: 1,
                backoff_base_ms: 50,
            },
            whatsapp: WhatsAppConfig {
                base_url: None,
                api_key: None,
                instance: "tutorbot".to_string(),
            },
            delivery: DeliveryConfig { max_retries: 3, backoff_base_ms: 100 },
            calendar: CalendarConfig {
                failure_threshold: 5,
                recovery_timeout_secs: 60,
                success_threshold: 2,
                half_open_max_calls: 1,
                rate_capacity: 10,
                rate_refill_per_sec: 1.0,
                cache_ttl_secs: 300,
            },
            idempotency: IdempotencyConfig { retention_hours: 168 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.backoff_base_ms)
    }
}

impl DeliveryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.backoff_base_ms)
    }
}

impl CalendarConfig {
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            breaker: BreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
                success_threshold: self.success_threshold,
                half_open_max_calls: self.half_open_max_calls,
            },
            rate_limit: RateLimitConfig {
                capacity: self.rate_capacity,
                refill_per_sec: self.rate_refill_per_sec,
            },
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_max_entries: 1_000,
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tutorbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(enabled) = cache.enabled {
                self.cache.enabled = enabled;
            }
            if let Some(ttl_secs) = cache.ttl_secs {
                self.cache.ttl_secs = ttl_secs;
            }
            if let Some(max_entries) = cache.max_entries {
                self.cache.max_entries = max_entries;
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(base_url) = classifier.base_url {
                self.classifier.base_url = Some(base_url);
            }
            if let Some(classifier_api_key) = classifier.api_key {
                self.classifier.api_key = Some(secret_value(classifier_api_key));
            }
            if let Some(timeout_ms) = classifier.timeout_ms {
                self.classifier.timeout_ms = timeout_ms;
            }
            if let Some(retries) = classifier.retries {
                self.classifier.retries = retries;
            }
            if let Some(backoff_base_ms) = classifier.backoff_base_ms {
                self.classifier.backoff_base_ms = backoff_base_ms;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(base_url) = whatsapp.base_url {
                self.whatsapp.base_url = Some(base_url);
            }
            if let Some(whatsapp_api_key) = whatsapp.api_key {
                self.whatsapp.api_key = Some(secret_value(whatsapp_api_key));
            }
            if let Some(instance) = whatsapp.instance {
                self.whatsapp.instance = instance;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(max_retries) = delivery.max_retries {
                self.delivery.max_retries = max_retries;
            }
            if let Some(backoff_base_ms) = delivery.backoff_base_ms {
                self.delivery.backoff_base_ms = backoff_base_ms;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(failure_threshold) = calendar.failure_threshold {
                self.calendar.failure_threshold = failure_threshold;
            }
            if let Some(recovery_timeout_secs) = calendar.recovery_timeout_secs {
                self.calendar.recovery_timeout_secs = recovery_timeout_secs;
            }
            if let Some(success_threshold) = calendar.success_threshold {
                self.calendar.success_threshold = success_threshold;
            }
            if let Some(half_open_max_calls) = calendar.half_open_max_calls {
                self.calendar.half_open_max_calls = half_open_max_calls;
            }
            if let Some(rate_capacity) = calendar.rate_capacity {
                self.calendar.rate_capacity = rate_capacity;
            }
            if let Some(rate_refill_per_sec) = calendar.rate_refill_per_sec {
                self.calendar.rate_refill_per_sec = rate_refill_per_sec;
            }
            if let Some(cache_ttl_secs) = calendar.cache_ttl_secs {
                self.calendar.cache_ttl_secs = cache_ttl_secs;
            }
        }

        if let Some(idempotency) = patch.idempotency {
            if let Some(retention_hours) = idempotency.retention_hours {
                self.idempotency.retention_hours = retention_hours;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TUTORBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TUTORBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TUTORBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TUTORBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("TUTORBOT_CACHE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_u64("TUTORBOT_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_CLASSIFIER_BASE_URL") {
            self.classifier.base_url = Some(value);
        }
        if let Some(value) = read_env("TUTORBOT_CLASSIFIER_API_KEY") {
            self.classifier.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TUTORBOT_CLASSIFIER_TIMEOUT_MS") {
            self.classifier.timeout_ms = parse_u64("TUTORBOT_CLASSIFIER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_CLASSIFIER_RETRIES") {
            self.classifier.retries = parse_u32("TUTORBOT_CLASSIFIER_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_WHATSAPP_BASE_URL") {
            self.whatsapp.base_url = Some(value);
        }
        if let Some(value) = read_env("TUTORBOT_WHATSAPP_API_KEY") {
            self.whatsapp.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TUTORBOT_WHATSAPP_INSTANCE") {
            self.whatsapp.instance = value;
        }

        if let Some(value) = read_env("TUTORBOT_DELIVERY_MAX_RETRIES") {
            self.delivery.max_retries = parse_u32("TUTORBOT_DELIVERY_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_IDEMPOTENCY_RETENTION_HOURS") {
            self.idempotency.retention_hours =
                parse_u64("TUTORBOT_IDEMPOTENCY_RETENTION_HOURS", &value)?;
        }

        if let Some(value) = read_env("TUTORBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TUTORBOT_SERVER_PORT") {
            self.server.port = parse_u16("TUTORBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TUTORBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TUTORBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TUTORBOT_LOGGING_LEVEL").or_else(|| read_env("TUTORBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TUTORBOT_LOGGING_FORMAT").or_else(|| read_env("TUTORBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(cache_enabled) = overrides.cache_enabled {
            self.cache.enabled = cache_enabled;
        }
        if let Some(classifier_base_url) = overrides.classifier_base_url {
            self.classifier.base_url = Some(classifier_base_url);
        }
        if let Some(whatsapp_base_url) = overrides.whatsapp_base_url {
            self.whatsapp.base_url = Some(whatsapp_base_url);
        }
        if let Some(whatsapp_api_key) = overrides.whatsapp_api_key {
            self.whatsapp.api_key = Some(secret_value(whatsapp_api_key));
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_cache(&self.cache)?;
        validate_classifier(&self.classifier)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_calendar(&self.calendar)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tutorbot.toml"), PathBuf::from("config/tutorbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.enabled && (cache.ttl_secs == 0 || cache.max_entries == 0) {
        return Err(ConfigError::Validation(
            "cache.ttl_secs and cache.max_entries must be positive when the cache is enabled"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    if classifier.timeout_ms == 0 || classifier.timeout_ms > 10_000 {
        return Err(ConfigError::Validation(
            "classifier.timeout_ms must be in range 1..=10000".to_string(),
        ));
    }
    if classifier.retries > 5 {
        return Err(ConfigError::Validation("classifier.retries must be at most 5".to_string()));
    }
    validate_http_url("classifier.base_url", classifier.base_url.as_deref())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    validate_http_url("whatsapp.base_url", whatsapp.base_url.as_deref())?;

    if whatsapp.base_url.is_some() {
        let missing = whatsapp
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "whatsapp.api_key is required when whatsapp.base_url is set".to_string(),
            ));
        }
    }

    if whatsapp.instance.trim().is_empty() {
        return Err(ConfigError::Validation("whatsapp.instance must not be empty".to_string()));
    }

    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    if calendar.failure_threshold == 0
        || calendar.success_threshold == 0
        || calendar.half_open_max_calls == 0
    {
        return Err(ConfigError::Validation(
            "calendar breaker thresholds must be greater than zero".to_string(),
        ));
    }
    if calendar.rate_capacity == 0 || calendar.rate_refill_per_sec <= 0.0 {
        return Err(ConfigError::Validation(
            "calendar.rate_capacity and calendar.rate_refill_per_sec must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => Err(
            ConfigError::Validation(format!("{field} must start with http:// or https://")),
        ),
        _ => Ok(()),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    cache: Option<CachePatch>,
    classifier: Option<ClassifierPatch>,
    whatsapp: Option<WhatsAppPatch>,
    delivery: Option<DeliveryPatch>,
    calendar: Option<CalendarPatch>,
    idempotency: Option<IdempotencyPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    enabled: Option<bool>,
    ttl_secs: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    backoff_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    instance: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    failure_threshold: Option<u32>,
    recovery_timeout_secs: Option<u64>,
    success_threshold: Option<u32>,
    half_open_max_calls: Option<u32>,
    rate_capacity: Option<u32>,
    rate_refill_per_sec: Option<f64>,
    cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IdempotencyPatch {
    retention_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
