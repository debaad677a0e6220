//! Service configuration, read once from the environment (and `.env` if present).

use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub notifications: NotificationConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound on the lifetime of a single workflow transaction.
    pub transaction_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Base URL of the mail service. `None` keeps notifications in the log.
    pub service_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// How long after a reservation starts an unconfirmed order is kept.
    pub pending_grace: chrono::Duration,
    pub batch_size: i64,
}

pub fn load() -> Result<Config> {
    Ok(Config {
        server: ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("SERVER_PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            transaction_timeout: Duration::from_millis(parse_or("TX_TIMEOUT_MS", 3000)?),
        },
        auth: AuthConfig {
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
        },
        notifications: NotificationConfig {
            service_url: env::var("NOTIFICATION_SERVICE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        },
        sweep: SweepConfig {
            interval: Duration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 300)?),
            pending_grace: chrono::Duration::minutes(parse_or("PENDING_GRACE_MINUTES", 15)?),
            batch_size: parse_or("SWEEP_BATCH_SIZE", 100)?,
        },
    })
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_falls_back_to_default() {
        let port: u16 = parse_or("RESTAURANT_TEST_UNSET_PORT", 8080).unwrap();
        assert_eq!(port, 8080);
    }
}
