//! Integration tests for the request gateway against a mock backend.


use std::sync::{Arc, Mutex};
use std::time::Duration;

use convonest_core::ApiError;
use convonest_core::api::ForumApi;
use convonest_core::gateway::{Gateway, ReqwestTransport, TimeoutStage};
use convonest_core::notice::{Notice, NoticeLevel, NoticeLog};
use convonest_core::session::cache::CredentialStore;
use convonest_core::session::{RestIdentityProvider, SessionState, SessionStore};
use convonest_types::UserProfile;
use fixtures::{ID_TOKEN, harness, post_json, signed_in};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test: authenticated requests carry the bearer token.
#[tokio::test]
async fn test_bearer_token_attached_when_signed_in() {
    let h = signed_in("a@x.com").await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "100"))
        .and(header("authorization", format!("Bearer {ID_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "posts": [post_json("p1", &[], &[])]
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    assert_eq!(h.forum.refresh_posts().await.unwrap(), 1);
}

/// Test: anonymous requests go out without a header.
#[tokio::test]
async fn test_anonymous_request_has_no_authorization() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "_id": "t1", "name": "rust" }
        ])))
        .mount(&h.server)
        .await;

    let tags = h.forum.tags().await.unwrap();
    assert_eq!(tags[0].name, "rust");

    let requests = h.server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

/// Test: two concurrent 403s log the user out exactly once; both calls fail.
#[tokio::test]
async fn test_forbidden_invalidates_session_once() {
    let h = signed_in("a@x.com").await;
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transitions);
    h.session
        .subscribe(move |t| seen.lock().unwrap().push(t.to.clone()));

    Mock::given(method("GET"))
        .and(path("/announcements"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "message": "forbidden" })),
        )
        .mount(&h.server)
        .await;

    let (first, second) = tokio::join!(h.forum.announcements(), h.forum.announcements());

    assert_eq!(first.unwrap_err(), ApiError::SessionExpired { status: 403 });
    assert_eq!(second.unwrap_err(), ApiError::SessionExpired { status: 403 });
    assert_eq!(h.session.snapshot(), SessionState::Anonymous);
    assert_eq!(*transitions.lock().unwrap(), vec![SessionState::Anonymous]);
    assert!(
        h.notices
            .snapshot()
            .iter()
            .all(|notice| notice.level == NoticeLevel::Blocking)
    );
}

/// Test: a 500 with a message surfaces that message in a transient notice.
#[tokio::test]
async fn test_server_error_message_in_notice() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/tags"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "message": "Database is down" })),
        )
        .mount(&h.server)
        .await;

    let err = h.forum.tags().await.unwrap_err();
    assert_eq!(
        err,
        ApiError::ServerRejected {
            status: 500,
            message: Some("Database is down".to_string()),
        }
    );
    assert_eq!(
        h.notices.snapshot(),
        vec![Notice::server_rejected(Some("Database is down"))]
    );
}

/// Test: an error status without a message falls back to the generic text.
#[tokio::test]
async fn test_server_error_without_message_is_generic() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/tags"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream"))
        .mount(&h.server)
        .await;

    h.forum.tags().await.unwrap_err();
    assert_eq!(h.notices.snapshot()[0].text, "Something went wrong");
}

/// Test: unreachable backend raises the network notice.
#[tokio::test]
async fn test_unreachable_backend_is_network_unavailable() {
    let server = MockServer::start().await;
    let config = fixtures::config_for(&server);
    let notices = NoticeLog::new();
    let identity = RestIdentityProvider::new(&config.identity, CredentialStore::in_memory());
    let session = Arc::new(SessionStore::new(Arc::new(identity)));
    let gateway = Gateway::standard(
        &config,
        session,
        Arc::new(notices.clone()),
        Arc::new(ReqwestTransport::new("http://127.0.0.1:1").unwrap()),
    );
    let api = ForumApi::new(Arc::new(gateway));

    let err = api.tags().await.unwrap_err();
    assert!(matches!(err, ApiError::NetworkUnavailable { .. }));
    assert_eq!(notices.snapshot(), vec![Notice::network_error()]);
}

/// Test: a slow backend times out as a network failure.
#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let gateway = Gateway::builder(Arc::new(ReqwestTransport::new(&server.uri()).unwrap()))
        .stage(TimeoutStage::new(Duration::from_millis(200)))
        .build();
    let api = ForumApi::new(Arc::new(gateway));

    let err = api.tags().await.unwrap_err();
    assert_eq!(err, ApiError::network("request timed out after 200ms"));
}

/// Test: a 409 on user upsert counts as success and raises no notice.
#[tokio::test]
async fn test_user_upsert_conflict_is_success() {
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "User already exists" })),
        )
        .mount(&h.server)
        .await;

    let created = h
        .forum
        .api()
        .upsert_user(&UserProfile::new_member("Ann", "a@x.com", None))
        .await
        .unwrap();
    assert!(!created);
    assert!(h.notices.snapshot().is_empty());
}

/// Test: the standard chain is ordered outermost first.
#[tokio::test]
async fn test_standard_stage_order() {
    let h = harness().await;
    assert_eq!(
        h.forum.api().gateway().stage_names(),
        vec!["trace", "failures", "bearer", "timeout"]
    );
}
