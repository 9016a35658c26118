use std::sync::Arc;

use super::{
    config::Config,
    database::Database,
    error::AppError,
    integrations::Providers,
    payments::PaymentClient,
};

pub struct State {
    pub config: Config,
    pub database: Database,
    pub payments: PaymentClient,
    pub providers: Providers,
}

impl State {
    pub fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let database = Database::open(&config.database_path)?;

        Self::with_database(config, database)
    }

    pub fn with_database(config: Config, database: Database) -> Result<Arc<Self>, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("huddle/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        let payments = PaymentClient::new(http.clone(), &config.stripe);
        let providers = Providers::new(http, &config);

        Ok(Arc::new(Self {
            config,
            database,
            payments,
            providers,
        }))
    }
}
