//! Background release of pending registrations whose checkout never finished.
//! The expired-session webhook normally gets there first, this covers missed
//! deliveries and checkouts that were never created.
use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{registrations::expire_stale_pending, state::State};

pub fn sweep(state: &State) {
    let ttl = state.config.pending_ttl_minutes;

    match state
        .database
        .transaction(|tx| expire_stale_pending(tx, Utc::now(), ttl))
    {
        Ok(0) => {}
        Ok(released) => info!("Released {released} stale pending registrations"),
        Err(e) => error!("Sweep failed: {e}"),
    }
}

pub fn spawn_sweeper(state: Arc<State>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            sweep(&state);
        }
    })
}
