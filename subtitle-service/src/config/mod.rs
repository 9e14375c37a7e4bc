use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

const DEV_JWT_SECRET: &str = "dev-only-jwt-secret-change-me";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    pub workers: WorkerConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL, or `memory` for the in-process store.
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.expose_secret() == "memory"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub access_token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub webhook_tolerance_seconds: i64,
    pub frontend_url: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_count: usize,
    pub queue_size: usize,
    pub transcription_endpoint: String,
    pub transcription_api_key: Secret<String>,
    pub callback_secret: Secret<String>,
    pub max_retry_seconds: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
    pub admin_password: Option<Secret<String>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AppConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("subtitle-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", Some("memory"), is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            jwt: JwtConfig {
                secret: Secret::new(get_env("JWT_SECRET", Some(DEV_JWT_SECRET), is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "1440",
                    is_prod,
                )?,
            },
            stripe: StripeConfig {
                api_key: Secret::new(get_env("STRIPE_API_KEY", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env(
                    "STRIPE_WEBHOOK_SECRET",
                    Some("whsec_dev"),
                    is_prod,
                )?),
                api_base_url: get_env(
                    "STRIPE_API_BASE_URL",
                    Some("https://api.stripe.com/v1"),
                    is_prod,
                )?,
                webhook_tolerance_seconds: parse_env(
                    "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
                    "600",
                    is_prod,
                )?,
                frontend_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), is_prod)?,
                currency: get_env("CURRENCY", Some("usd"), is_prod)?,
            },
            workers: WorkerConfig {
                enabled: parse_env("WORKER_ENABLED", "true", is_prod)?,
                worker_count: parse_env("WORKER_COUNT", "2", is_prod)?,
                queue_size: parse_env("WORKER_QUEUE_SIZE", "100", is_prod)?,
                transcription_endpoint: get_env(
                    "TRANSCRIPTION_ENDPOINT",
                    Some("http://localhost:9000"),
                    is_prod,
                )?,
                transcription_api_key: Secret::new(get_env(
                    "TRANSCRIPTION_API_KEY",
                    Some(""),
                    is_prod,
                )?),
                callback_secret: Secret::new(get_env(
                    "WORKER_CALLBACK_SECRET",
                    Some("dev-worker-secret"),
                    is_prod,
                )?),
                max_retry_seconds: parse_env("TRANSCRIPTION_MAX_RETRY_SECONDS", "120", is_prod)?,
                request_timeout_seconds: parse_env(
                    "TRANSCRIPTION_REQUEST_TIMEOUT_SECONDS",
                    "30",
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "3", is_prod)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
            },
            bootstrap: BootstrapConfig {
                admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL")
                    .ok()
                    .filter(|s| !s.is_empty()),
                admin_password: env::var("BOOTSTRAP_ADMIN_PASSWORD")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(Secret::new),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str| -> Result<(), AppError> {
            Err(AppError::ConfigError(anyhow::anyhow!(msg.to_string())))
        };

        if self.common.port == 0 {
            return invalid("PORT must be non-zero");
        }
        if self.jwt.access_token_expiry_minutes <= 0 {
            return invalid("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive");
        }
        if self.jwt.secret.expose_secret().len() < 16 {
            return invalid("JWT_SECRET must be at least 16 characters");
        }
        if self.workers.worker_count == 0 || self.workers.queue_size == 0 {
            return invalid("WORKER_COUNT and WORKER_QUEUE_SIZE must be positive");
        }
        if self.stripe.webhook_tolerance_seconds <= 0 {
            return invalid("STRIPE_WEBHOOK_TOLERANCE_SECONDS must be positive");
        }
        if self.bootstrap.admin_email.is_some() != self.bootstrap.admin_password.is_some() {
            return invalid("BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together");
        }

        if self.environment == Environment::Prod {
            if self.jwt.secret.expose_secret() == DEV_JWT_SECRET {
                return invalid("JWT_SECRET must be set in production");
            }
            if self.database.is_memory() {
                return invalid("DATABASE_URL must point at Postgres in production");
            }
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return invalid("Wildcard CORS origin is not allowed in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production",
                    key
                )))
            } else {
                default.map(|s| s.to_string()).ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("{} is required", key))
                })
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

/// Dev configuration over the in-memory store with fixed secrets, for tests.
#[doc(hidden)]
pub fn test_config() -> AppConfig {
    AppConfig {
        common: core_config::Config::default(),
        environment: Environment::Dev,
        service_name: "subtitle-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("memory".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: Secret::new("test-secret-at-least-16".to_string()),
            access_token_expiry_minutes: 60,
        },
        stripe: StripeConfig {
            api_key: Secret::new("sk_test".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: "http://localhost:12111/v1".to_string(),
            webhook_tolerance_seconds: 600,
            frontend_url: "http://localhost:3000".to_string(),
            currency: "usd".to_string(),
        },
        workers: WorkerConfig {
            enabled: true,
            worker_count: 1,
            queue_size: 8,
            transcription_endpoint: "http://localhost:9000".to_string(),
            transcription_api_key: Secret::new(String::new()),
            callback_secret: Secret::new("worker-secret".to_string()),
            max_retry_seconds: 1,
            request_timeout_seconds: 5,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            register_attempts: 3,
            register_window_seconds: 3600,
        },
        bootstrap: BootstrapConfig {
            admin_email: None,
            admin_password: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("local".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_prod_rejects_dev_defaults() {
        let mut config = test_config();
        config.environment = Environment::Prod;
        config.database.url = Secret::new("postgres://db/subtitles".to_string());
        config.jwt.secret = Secret::new(DEV_JWT_SECRET.to_string());
        assert!(config.validate().is_err());

        config.jwt.secret = Secret::new("a-real-production-secret".to_string());
        assert!(config.validate().is_ok());

        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_requires_both_fields() {
        let mut config = test_config();
        config.bootstrap.admin_email = Some("root@example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = test_config();
        config.workers.worker_count = 0;
        assert!(config.validate().is_err());
    }
}
