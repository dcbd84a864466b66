use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::middleware::rate_limit::RateLimitRule;
use std::env;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub two_factor: TwoFactorConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub maintenance_interval_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        *self == Environment::Prod
    }
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// When unset the in-memory repositories are used.
    pub uri: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// When unset the process-local store is used.
    pub url: Option<String>,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: Secret<String>,
    pub refresh_secret: Secret<String>,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub sso_token_ttl_seconds: i64,
    pub csrf_token_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_seconds: i64,
    /// `touch` skips the write when the last recorded activity is newer than this.
    pub activity_threshold_seconds: i64,
    pub cleanup_batch_size: usize,
    pub cleanup_max_batches: usize,
}

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    /// Issuer label shown in authenticator apps.
    pub issuer: String,
    /// HMAC key for hashing backup codes at rest.
    pub backup_code_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Reverse proxies whose `x-forwarded-for` entries are trusted.
    pub trusted_proxy_hops: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: RateLimitRule,
    pub sso: RateLimitRule,
    pub refresh: RateLimitRule,
    pub two_factor: RateLimitRule,
    pub general: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimitRule::new(5, 900).forgiving(),
            sso: RateLimitRule::new(30, 60),
            refresh: RateLimitRule::new(20, 60),
            two_factor: RateLimitRule::new(5, 300),
            general: RateLimitRule::new(100, 60),
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment.is_production();

        let config = IdentityConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            mongodb: MongoConfig {
                uri: env::var("MONGODB_URI").ok().filter(|s| !s.is_empty()),
                database: get_env("MONGODB_DATABASE", Some("identity"), is_prod)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
                key_prefix: get_env("REDIS_KEY_PREFIX", Some("identity"), is_prod)?,
            },
            jwt: JwtConfig {
                // Signing material is mandatory in every environment
                access_secret: Secret::new(get_env("JWT_ACCESS_SECRET", None, true)?),
                refresh_secret: Secret::new(get_env("JWT_REFRESH_SECRET", None, true)?),
                issuer: get_env("JWT_ISSUER", None, true)?,
                audience: get_env("JWT_AUDIENCE", None, true)?,
                access_token_ttl_seconds: parse_env("ACCESS_TOKEN_TTL_SECONDS", "3600", is_prod)?,
                refresh_token_ttl_seconds: parse_env(
                    "REFRESH_TOKEN_TTL_SECONDS",
                    "604800",
                    is_prod,
                )?,
                sso_token_ttl_seconds: parse_env("SSO_TOKEN_TTL_SECONDS", "300", is_prod)?,
                csrf_token_ttl_seconds: parse_env("CSRF_TOKEN_TTL_SECONDS", "3600", is_prod)?,
            },
            session: SessionConfig {
                ttl_seconds: parse_env("SESSION_TTL_SECONDS", "604800", is_prod)?,
                activity_threshold_seconds: parse_env(
                    "SESSION_ACTIVITY_THRESHOLD_SECONDS",
                    "300",
                    is_prod,
                )?,
                cleanup_batch_size: parse_env("SESSION_CLEANUP_BATCH_SIZE", "500", is_prod)?,
                cleanup_max_batches: parse_env("SESSION_CLEANUP_MAX_BATCHES", "100", is_prod)?,
            },
            two_factor: TwoFactorConfig {
                issuer: get_env("TOTP_ISSUER", Some("CyberEco"), is_prod)?,
                backup_code_key: Secret::new(get_env(
                    "BACKUP_CODE_KEY",
                    Some("dev-backup-code-key"),
                    is_prod,
                )?),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:40000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                trusted_proxy_hops: parse_env("TRUSTED_PROXY_HOPS", "0", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login: rule_from_env("LOGIN", 5, 900, is_prod)?.forgiving(),
                sso: rule_from_env("SSO", 30, 60, is_prod)?,
                refresh: rule_from_env("REFRESH", 20, 60, is_prod)?,
                two_factor: rule_from_env("TWO_FACTOR", 5, 300, is_prod)?,
                general: rule_from_env("GENERAL", 100, 60, is_prod)?,
            },
            maintenance_interval_seconds: parse_env(
                "MAINTENANCE_INTERVAL_SECONDS",
                "300",
                is_prod,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_secret.expose_secret().is_empty()
            || self.jwt.refresh_secret.expose_secret().is_empty()
        {
            return Err(config_error("JWT signing secrets must not be empty"));
        }

        if self.jwt.issuer.is_empty() || self.jwt.audience.is_empty() {
            return Err(config_error("JWT_ISSUER and JWT_AUDIENCE must not be empty"));
        }

        let ttls = [
            ("ACCESS_TOKEN_TTL_SECONDS", self.jwt.access_token_ttl_seconds),
            ("REFRESH_TOKEN_TTL_SECONDS", self.jwt.refresh_token_ttl_seconds),
            ("SSO_TOKEN_TTL_SECONDS", self.jwt.sso_token_ttl_seconds),
            ("CSRF_TOKEN_TTL_SECONDS", self.jwt.csrf_token_ttl_seconds),
            ("SESSION_TTL_SECONDS", self.session.ttl_seconds),
        ];
        for (name, ttl) in ttls {
            if ttl <= 0 {
                return Err(config_error(&format!("{} must be positive", name)));
            }
        }

        if self.session.cleanup_batch_size == 0 {
            return Err(config_error("SESSION_CLEANUP_BATCH_SIZE must be positive"));
        }

        if self.environment.is_production() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.mongodb.uri.is_none() {
                return Err(config_error("MONGODB_URI is required in production"));
            }

            if self.redis.url.is_none() {
                tracing::warn!(
                    "REDIS_URL not set in production; rate limits and revocation markers are per-process"
                );
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn rule_from_env(
    class: &str,
    limit: u32,
    window_seconds: u64,
    is_prod: bool,
) -> Result<RateLimitRule, AppError> {
    let limit: u32 = parse_env(
        &format!("RATE_LIMIT_{}_LIMIT", class),
        &limit.to_string(),
        is_prod,
    )?;
    let window: u64 = parse_env(
        &format!("RATE_LIMIT_{}_WINDOW_SECONDS", class),
        &window_seconds.to_string(),
        is_prod,
    )?;
    if limit == 0 || window == 0 {
        return Err(config_error(&format!(
            "RATE_LIMIT_{} limit and window must be positive",
            class
        )));
    }
    Ok(RateLimitRule::new(limit, window))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
