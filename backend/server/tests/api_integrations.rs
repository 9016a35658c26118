mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use common::TestApp;
use serde_json::json;
use url::{Url, form_urlencoded};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header as header_matcher, method, path},
};

async fn mock_strava(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("code=granted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "strava-access",
            "refresh_token": "strava-refresh",
            "expires_at": 4_102_444_800_i64,
            "athlete": { "id": 9001 },
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/athlete/activities"))
        .and(header_matcher("authorization", "Bearer strava-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 111,
                "name": "Morning Run",
                "sport_type": "Run",
                "distance": 10000.0,
                "moving_time": 3000,
                "total_elevation_gain": 85.0,
                "start_date": "2026-10-01T06:30:00Z",
            },
            {
                "id": 112,
                "name": "Commute",
                "type": "Ride",
                "distance": 7200.0,
                "moving_time": 1500,
                "start_date": "2026-10-02T08:00:00Z",
            },
        ])))
        .mount(server)
        .await;
}

/// Walks the browser half of the OAuth dance and returns where we got sent.
async fn connect(app: &TestApp, user: &str, code: &str) -> String {
    let (status, authorize) = app
        .call(Method::GET, "/integrations/strava/authorize", Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let url = Url::parse(authorize["url"].as_str().unwrap()).unwrap();
    assert_eq!(url.path(), "/oauth/authorize");
    let state = url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap();

    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("code", code)
        .append_pair("state", &state)
        .finish();
    let request = Request::builder()
        .uri(format!("/integrations/strava/callback?{query}"))
        .body(Body::empty())
        .unwrap();

    let (status, _, headers) = app.send(request).await;
    assert!(status.is_redirection(), "{status}");

    headers[header::LOCATION].to_str().unwrap().to_string()
}

#[tokio::test]
async fn connect_sync_and_share_an_activity() {
    let strava = MockServer::start().await;
    mock_strava(&strava).await;
    let app = TestApp::new("http://127.0.0.1:9", &strava.uri());

    let location = connect(&app, "ana", "granted").await;
    assert_eq!(
        location,
        "http://localhost:5173/settings/integrations?connected=strava"
    );

    let (_, connections) = app.call(Method::GET, "/integrations", Some("ana"), None).await;
    assert_eq!(connections[0]["provider"], "strava");
    assert_eq!(connections[0]["external_user_id"], "9001");
    assert!(connections[0].get("access_token").is_none());

    let (status, synced) = app
        .call(Method::POST, "/integrations/strava/sync", Some("ana"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{synced}");
    assert_eq!(synced["imported"], 2);

    // the same activities again are updated in place
    let (_, synced) = app
        .call(Method::POST, "/integrations/strava/sync", Some("ana"), None)
        .await;
    assert_eq!(synced["imported"], 2);

    let (_, activities) = app
        .call(Method::GET, "/me/activities?limit=10", Some("ana"), None)
        .await;
    let activities = activities.as_array().unwrap();
    assert_eq!(activities.len(), 2);
    assert_eq!(activities[0]["external_id"], "112");
    assert_eq!(activities[0]["sport"], "ride");
    assert_eq!(activities[1]["sport"], "run");

    let slug = app.club("ana", "Trail Runners", &["ben"]).await;
    let run_id = activities[1]["id"].as_str().unwrap();

    // ben cannot share ana's run
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/clubs/{slug}/posts"),
            Some("ben"),
            Some(json!({ "body": "look what ana did", "activity_id": run_id })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, post) = app
        .call(
            Method::POST,
            &format!("/clubs/{slug}/posts"),
            Some("ana"),
            Some(json!({ "body": "Easy 10k", "activity_id": run_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{post}");
    assert_eq!(post["activity"]["name"], "Morning Run");
    let post_id = post["id"].as_str().unwrap();

    let (_, like) = app
        .call(Method::POST, &format!("/posts/{post_id}/like"), Some("ben"), None)
        .await;
    assert_eq!(like, json!({ "liked": true, "like_count": 1 }));

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/posts/{post_id}/comments"),
            Some("ben"),
            Some(json!({ "body": "Nice pace" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, feed) = app
        .call(Method::GET, &format!("/clubs/{slug}/feed"), Some("ben"), None)
        .await;
    assert_eq!(feed[0]["like_count"], 1);
    assert_eq!(feed[0]["comment_count"], 1);
    assert_eq!(feed[0]["liked_by_me"], true);

    let (status, _) = app
        .call(Method::GET, &format!("/clubs/{slug}/feed"), Some("cal"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::DELETE, "/integrations/strava", Some("ana"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call(Method::POST, "/integrations/strava/sync", Some("ana"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn callback_failures_redirect_with_error() {
    let strava = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Bad Request",
            "errors": [{ "field": "code", "code": "invalid" }],
        })))
        .mount(&strava)
        .await;
    let app = TestApp::new("http://127.0.0.1:9", &strava.uri());

    let location = connect(&app, "ana", "revoked").await;
    assert_eq!(
        location,
        "http://localhost:5173/settings/integrations?error=strava"
    );

    let forged = Request::builder()
        .uri("/integrations/strava/callback?code=granted&state=forged")
        .body(Body::empty())
        .unwrap();
    let (_, _, headers) = app.send(forged).await;
    assert!(
        headers[header::LOCATION]
            .to_str()
            .unwrap()
            .ends_with("?error=strava")
    );

    let (_, connections) = app.call(Method::GET, "/integrations", Some("ana"), None).await;
    assert_eq!(connections, json!([]));
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let app = TestApp::offline();

    let (status, _) = app
        .call(Method::GET, "/integrations/garmin/authorize", Some("ana"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
