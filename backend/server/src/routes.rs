use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::{
    clubs, events, feed, groups,
    integrations::handlers as integrations,
    profiles, registrations,
    state::State,
    webhooks,
};

pub async fn health_handler() -> &'static str {
    "ok"
}

/// Every route, without middleware. Layers are added in [`crate::build_app`].
pub fn router() -> Router<Arc<State>> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/me", get(profiles::me_handler).put(profiles::update_handler))
        .route("/me/activities", get(integrations::activities_handler))
        // Clubs
        .route("/clubs", get(clubs::list_handler).post(clubs::create_handler))
        .route("/clubs/{slug}", get(clubs::get_handler))
        .route("/clubs/{slug}/membership", post(clubs::membership_handler))
        .route("/clubs/{slug}/members/{user_id}/role", put(clubs::role_handler))
        // Groups
        .route(
            "/clubs/{slug}/groups",
            get(groups::list_handler).post(groups::create_handler),
        )
        .route("/groups/{group_id}", delete(groups::delete_handler))
        .route("/groups/{group_id}/membership", post(groups::membership_handler))
        // Events
        .route(
            "/clubs/{slug}/events",
            get(events::list_handler).post(events::create_handler),
        )
        .route(
            "/events/{event_id}",
            get(events::get_handler)
                .patch(events::update_handler)
                .delete(events::cancel_handler),
        )
        // Registrations
        .route(
            "/events/{event_id}/registrations",
            get(events::roster_handler).post(registrations::register_handler),
        )
        .route("/events/{event_id}/registration", get(registrations::mine_handler))
        .route(
            "/registrations/{registration_id}",
            get(registrations::get_handler).delete(registrations::cancel_handler),
        )
        .route(
            "/checkout/sessions/{session_id}",
            get(registrations::checkout_status_handler),
        )
        .route("/webhooks/payments", post(webhooks::payments_handler))
        // Integrations
        .route("/integrations", get(integrations::list_handler))
        .route("/integrations/{provider}", delete(integrations::disconnect_handler))
        .route(
            "/integrations/{provider}/authorize",
            get(integrations::authorize_handler),
        )
        .route(
            "/integrations/{provider}/callback",
            get(integrations::callback_handler),
        )
        .route("/integrations/{provider}/sync", post(integrations::sync_handler))
        // Feed
        .route("/clubs/{slug}/feed", get(feed::feed_handler))
        .route("/clubs/{slug}/posts", post(feed::create_handler))
        .route("/posts/{post_id}", delete(feed::delete_handler))
        .route("/posts/{post_id}/like", post(feed::like_handler))
        .route(
            "/posts/{post_id}/comments",
            get(feed::comments_handler).post(feed::comment_handler),
        )
}
