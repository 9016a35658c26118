//! Documentation of a sports club platform: clubs, groups, events with paid
//! registration, and a feed of activities imported from fitness trackers.
//!
//!
//!
//! # General Infrastructure
//! - Frontend is served separately and talks to this API with a bearer token
//! - Tokens come from the hosted auth provider, we only verify them
//! - SQLite file on a mounted volume, one process owns it
//! - Payment processor and fitness providers are plain HTTPS APIs
//!
//!
//!
//! # Registration Lifecycle
//!
//! **Goal**: Never sell more seats than an event has, even with a crowd hitting
//! the button at the same moment.
//!
//! - Seat check and insert share one `BEGIN IMMEDIATE` transaction
//! - Paid seats are held as `pending` while the attendee is on the checkout page
//! - Checkout success arrives by webhook and by the return page polling us,
//!   whichever is first confirms, the other is a no-op
//! - Expired checkouts release the seat, a sweeper catches whatever the
//!   webhook missed
//! - Free events promote the waitlist automatically, paid ones do not since
//!   promotion would need a payment nobody started
//!
//!
//!
//! # Notes
//!
//! ## SQLite
//! A club has hundreds of members, not millions. SQLite with a single writer
//! gives us real transactions for capacity without running a database server.
//! If that ever stops being true, the queries are plain SQL and move over.
//!
//! ## Activities
//! Imports are pull based. Strava and Polar both offer push webhooks, but a
//! manual sync plus the nightly `sync` run keeps us free of another public
//! endpoint per provider.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run locally.
//! ```sh
//! AUTH_JWT_SECRET=... STRIPE_SECRET_KEY=... cargo run -p huddle
//! ```
//!
//! Forward webhooks during development.
//! ```sh
//! stripe listen --forward-to localhost:1111/webhooks/payments
//! ```
//!
//! Or sign a fake one.
//! ```sh
//! cargo run -p tester -- <registration_id> --event-type completed
//! ```
//!
//! Import activities for every connection.
//! ```sh
//! cargo run -p sync -- --database huddle.sqlite --days 7
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod clubs;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod feed;
pub mod groups;
pub mod integrations;
pub mod payments;
pub mod profiles;
pub mod registrations;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod webhooks;

#[cfg(test)]
mod test_support;

use config::Config;
use error::StartupError;
use state::State;

pub async fn start_server() -> Result<(), StartupError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config)?;

    sweeper::spawn_sweeper(state.clone());

    info!("Starting server...");
    let app = build_app(state.clone())?;

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

/// The full application with CORS and request tracing, as served.
pub fn build_app(state: Arc<State>) -> Result<Router, StartupError> {
    let origin = state
        .config
        .public_url
        .trim_end_matches('/')
        .parse::<HeaderValue>()
        .map_err(|_| StartupError::Origin(state.config.public_url.clone()))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Ok(routes::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
