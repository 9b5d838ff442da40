//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true`.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    /// Apply `migrations/` on startup.
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Some(Environment::Development),
            "staging" => Some(Environment::Staging),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Payment engine settings
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub environment: Environment,
    pub currency: String,
    /// Public base URL of this service, used to build callback URLs.
    pub public_base_url: String,
    /// Customer-facing site, used to build return URLs.
    pub frontend_url: String,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub side_effect_queue_capacity: usize,
    /// Read the callback source address from `X-Forwarded-For`.
    pub trust_forwarded_for: bool,
    pub sweeper_enabled: bool,
    pub sweeper_interval_secs: u64,
    pub sweeper_stale_after_secs: u64,
    pub sweeper_batch_size: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_bool("SKIP_EXTERNALS", false)?;
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;

        if self.skip_externals && self.payments.environment.is_production() {
            return Err(ConfigError::ValidationFailed(
                "SKIP_EXTERNALS cannot be used in production".to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env_parse("DB_MAX_CONNECTIONS", 10)?,
            min_connections: env_parse("DB_MIN_CONNECTIONS", 2)?,
            connection_timeout: env_parse("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env_bool("DB_RUN_MIGRATIONS", true)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment_raw =
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::parse(&environment_raw)
            .ok_or_else(|| ConfigError::InvalidValue("ENVIRONMENT".to_string()))?;

        Ok(PaymentsConfig {
            environment,
            currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "AED".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            retry_max_attempts: env_parse("PAYMENT_RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: env_parse("PAYMENT_RETRY_BASE_DELAY_MS", 200)?,
            retry_max_delay_ms: env_parse("PAYMENT_RETRY_MAX_DELAY_MS", 2_000)?,
            side_effect_queue_capacity: env_parse("SIDE_EFFECT_QUEUE_CAPACITY", 1_024)?,
            trust_forwarded_for: env_bool("TRUST_FORWARDED_FOR", false)?,
            sweeper_enabled: env_bool("SWEEPER_ENABLED", true)?,
            sweeper_interval_secs: env_parse("SWEEPER_INTERVAL_SECS", 60)?,
            sweeper_stale_after_secs: env_parse("SWEEPER_STALE_AFTER_SECS", 900)?,
            sweeper_batch_size: env_parse("SWEEPER_BATCH_SIZE", 50)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_CURRENCY must be a 3-letter code".to_string(),
            ));
        }

        for (name, url) in [
            ("PUBLIC_BASE_URL", &self.public_base_url),
            ("FRONTEND_URL", &self.frontend_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be a valid URL",
                    name
                )));
            }
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_RETRY_MAX_ATTEMPTS".to_string(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_RETRY_BASE_DELAY_MS must be <= PAYMENT_RETRY_MAX_DELAY_MS".to_string(),
            ));
        }

        if self.side_effect_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "SIDE_EFFECT_QUEUE_CAPACITY".to_string(),
            ));
        }

        if self.sweeper_enabled && (self.sweeper_interval_secs == 0 || self.sweeper_batch_size <= 0)
        {
            return Err(ConfigError::InvalidValue(
                "SWEEPER_INTERVAL_SECS and SWEEPER_BATCH_SIZE must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Callback source addresses are enforced only in production.
    pub fn enforce_callback_ips(&self) -> bool {
        self.environment.is_production()
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn callback_url(&self, provider: &str) -> String {
        format!(
            "{}/api/payments/{}/callback",
            self.public_base_url.trim_end_matches('/'),
            provider
        )
    }

    pub fn return_url(&self, order_number: &str) -> String {
        format!(
            "{}/payment/result?order={}",
            self.frontend_url.trim_end_matches('/'),
            order_number
        )
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            currency: "AED".to_string(),
            public_base_url: "http://localhost:8000".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 2_000,
            side_effect_queue_capacity: 1_024,
            trust_forwarded_for: false,
            sweeper_enabled: true,
            sweeper_interval_secs: 60,
            sweeper_stale_after_secs: 900,
            sweeper_batch_size: 50,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(name.to_string())),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
