use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Secret {0} is not set")]
    MissingSecret(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Frontend origin, used for CORS and checkout return pages.
    pub public_url: String,
    /// Where this API is reachable from browsers, used for OAuth callbacks.
    pub api_url: String,
    pub currency: String,
    pub pending_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub auth_jwt_secret: String,
    pub stripe: StripeConfig,
    pub strava: StravaConfig,
    pub polar: PolarConfig,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Clone, Debug)]
pub struct StravaConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug)]
pub struct PolarConfig {
    pub auth_base: String,
    pub token_base: String,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            database_path: try_load("DATABASE_PATH", "huddle.sqlite")?,
            public_url: try_load("PUBLIC_URL", "http://localhost:5173")?,
            api_url: try_load("API_URL", "http://localhost:1111")?,
            currency: try_load("CURRENCY", "usd")?,
            pending_ttl_minutes: try_load("PENDING_TTL_MINUTES", "30")?,
            sweep_interval_secs: try_load("SWEEP_INTERVAL_SECS", "60")?,
            auth_jwt_secret: read_secret("AUTH_JWT_SECRET")?,
            stripe: StripeConfig {
                api_base: try_load("STRIPE_API_BASE", "https://api.stripe.com")?,
                secret_key: read_secret("STRIPE_SECRET_KEY")?,
                webhook_secret: read_secret("STRIPE_WEBHOOK_SECRET")?,
            },
            strava: StravaConfig {
                base_url: try_load("STRAVA_API_BASE", "https://www.strava.com")?,
                client_id: read_secret("STRAVA_CLIENT_ID")?,
                client_secret: read_secret("STRAVA_CLIENT_SECRET")?,
            },
            polar: PolarConfig {
                auth_base: try_load("POLAR_AUTH_BASE", "https://flow.polar.com")?,
                token_base: try_load("POLAR_TOKEN_BASE", "https://polarremote.com")?,
                api_base: try_load("POLAR_API_BASE", "https://www.polaraccesslink.com")?,
                client_id: read_secret("POLAR_CLIENT_ID")?,
                client_secret: read_secret("POLAR_CLIENT_SECRET")?,
            },
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse_value(key, &raw)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Docker secrets first, then the environment.
pub fn read_secret(secret_name: &str) -> Result<String, ConfigError> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Ok(secret.trim().to_string()),
        Err(e) => {
            warn!("Failed to read {secret_name} from file: {e}, trying environment");

            var(secret_name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ConfigError::MissingSecret(secret_name.to_string()))
        }
    }
}
