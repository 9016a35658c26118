use crate::config::{Config, PolarConfig, StravaConfig, StripeConfig};

pub const JWT_SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// A config pointing every upstream at the given mock servers.
pub fn config(payments_base: &str, providers_base: &str) -> Config {
    Config {
        port: 0,
        database_path: ":memory:".into(),
        public_url: "http://localhost:5173".into(),
        api_url: "http://localhost:1111".into(),
        currency: "usd".into(),
        pending_ttl_minutes: 30,
        sweep_interval_secs: 60,
        auth_jwt_secret: JWT_SECRET.into(),
        stripe: StripeConfig {
            api_base: payments_base.into(),
            secret_key: "sk_test_key".into(),
            webhook_secret: WEBHOOK_SECRET.into(),
        },
        strava: StravaConfig {
            base_url: providers_base.into(),
            client_id: "strava-client".into(),
            client_secret: "strava-secret".into(),
        },
        polar: PolarConfig {
            auth_base: providers_base.into(),
            token_base: providers_base.into(),
            api_base: providers_base.into(),
            client_id: "polar-client".into(),
            client_secret: "polar-secret".into(),
        },
    }
}
