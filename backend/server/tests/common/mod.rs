#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use server::{
    auth::{Claims, issue_token},
    build_app,
    config::{Config, PolarConfig, StravaConfig, StripeConfig},
    database::Database,
    state::State,
};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";
pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";

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

pub fn token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.into(),
        exp: (Utc::now() + Duration::hours(1)).timestamp(),
        email: Some(format!("{user_id}@example.com")),
    };

    issue_token(JWT_SECRET, &claims)
}

pub struct TestApp {
    pub app: Router,
    pub state: Arc<State>,
}

impl TestApp {
    pub fn new(payments_base: &str, providers_base: &str) -> Self {
        let database = Database::in_memory().unwrap();
        let state = State::with_database(config(payments_base, providers_base), database).unwrap();
        let app = build_app(state.clone()).unwrap();

        Self { app, state }
    }

    pub fn offline() -> Self {
        Self::new("http://127.0.0.1:9", "http://127.0.0.1:9")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value, header::HeaderMap) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        (status, body, headers)
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, body, _) = self.send(request).await;
        (status, body)
    }

    /// Creates a club owned by `admin` and joins every member.
    pub async fn club(&self, admin: &str, name: &str, members: &[&str]) -> String {
        let (status, club) = self
            .call(Method::POST, "/clubs", Some(admin), Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{club}");

        let slug = club["slug"].as_str().unwrap().to_string();
        for member in members {
            let (status, _) = self
                .call(Method::POST, &format!("/clubs/{slug}/membership"), Some(member), None)
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        slug
    }

    pub async fn event(&self, admin: &str, slug: &str, body: Value) -> String {
        let (status, event) = self
            .call(Method::POST, &format!("/clubs/{slug}/events"), Some(admin), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{event}");

        event["id"].as_str().unwrap().to_string()
    }
}

pub fn event_body(title: &str, capacity: Option<u32>, waitlist: bool, price_cents: u32) -> Value {
    json!({
        "title": title,
        "starts_at": (Utc::now() + Duration::days(5)).to_rfc3339(),
        "capacity": capacity,
        "waitlist_enabled": waitlist,
        "price_cents": price_cents,
    })
}
