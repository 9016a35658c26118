//! # Activity Sync
//!
//! Batch import for every stored provider connection, meant for a nightly
//! cron. Same code path as `POST /integrations/{provider}/sync`, so tokens
//! are refreshed and cursors moved exactly like a manual sync.
//!
//! ## Notes
//! - One failing connection (revoked token, provider outage) is logged and
//!   skipped, the rest still run
//! - `--days` rewinds the cursor for this run, useful after an outage.
//!   Re-imports update rows in place, nothing is duplicated
use chrono::{DateTime, Duration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use models::{Provider, ProviderConnection};
use server::{
    config::Config,
    database::Database,
    integrations::{store, sync_connection},
    state::State,
};
use tracing::warn;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub connections: usize,
    pub imported: u32,
    pub failed: usize,
}

pub async fn sync_all(
    database_path: Option<String>,
    provider: Option<Provider>,
    days: Option<u32>,
) -> anyhow::Result<Totals> {
    let mut config = Config::load()?;
    if let Some(path) = database_path {
        config.database_path = path;
    }

    let database = Database::open(&config.database_path)?;
    let state = State::with_database(config, database)?;

    let connections = state
        .database
        .call(|conn| store::all_connections(conn, provider))?;

    println!("Loaded Connections: {}\n", connections.len());

    let now = Utc::now();
    let pb = ProgressBar::new(connections.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    let mut totals = Totals {
        connections: connections.len(),
        ..Totals::default()
    };

    for connection in connections {
        pb.set_message(format!("{} {}", connection.provider, connection.user_id));

        let user_id = connection.user_id.clone();
        let provider = state.providers.get(connection.provider);
        let connection = rewind(connection, days, now);

        match sync_connection(&state.database, provider, connection, now).await {
            Ok(imported) => totals.imported += imported,
            Err(e) => {
                warn!("Sync for {user_id} failed: {e}");
                totals.failed += 1;
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(totals)
}

/// Moves the import cursor back `days` from `now` when asked to.
pub fn rewind(
    connection: ProviderConnection,
    days: Option<u32>,
    now: DateTime<Utc>,
) -> ProviderConnection {
    match days {
        Some(days) => ProviderConnection {
            last_synced_at: Some(now - Duration::days(i64::from(days))),
            ..connection
        },
        None => connection,
    }
}
