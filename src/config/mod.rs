use chrono::Duration;
use std::{env, fmt};
use thiserror::Error;

mod duration;

use duration::parse_duration;
pub use duration::DurationError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field}: {value:?}: {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: DurationError,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Kept as the raw string; the listener rejects anything unbindable.
    pub port: String,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
}

impl DatabaseConfig {
    /// Connection string handed to the driver as-is.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Token settings reserved for the authentication layer. Resolved at startup
/// but not consumed by anything in this service yet.
#[derive(Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtConfig {
    pub fn has_secrets(&self) -> bool {
        !self.access_secret.is_empty() && !self.refresh_secret.is_empty()
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves every setting through `lookup`, falling back to the defaults
    /// for keys it does not know. Only the two TTLs can fail.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, fallback: &str| lookup(key).unwrap_or_else(|| fallback.into());

        let access_ttl = duration_var(&get, "JWT_ACCESS_TTL", "15m")?;
        let refresh_ttl = duration_var(&get, "JWT_REFRESH_TTL", "720h")?;

        Ok(Self {
            server: ServerConfig {
                port: get("SERVER_PORT", "8080"),
            },
            database: DatabaseConfig {
                host: get("DB_HOST", "localhost"),
                port: get("DB_PORT", "5432"),
                user: get("DB_USER", "progressivity"),
                password: get("DB_PASSWORD", "progressivity"),
                name: get("DB_NAME", "progressivity"),
                ssl_mode: get("DB_SSLMODE", "disable"),
            },
            jwt: JwtConfig {
                access_secret: get("JWT_ACCESS_SECRET", ""),
                refresh_secret: get("JWT_REFRESH_SECRET", ""),
                access_ttl,
                refresh_ttl,
            },
            log: LogConfig {
                level: get("LOG_LEVEL", "info"),
            },
        })
    }
}

fn duration_var(
    get: &impl Fn(&str, &str) -> String,
    field: &'static str,
    fallback: &str,
) -> Result<Duration, ConfigError> {
    let value = get(field, fallback);
    parse_duration(&value).map_err(|source| ConfigError::InvalidDuration {
        field,
        value,
        source,
    })
}
