//! End-to-end forum flows against a mock backend and identity provider.


use std::time::Duration;

use convonest_core::ApiError;
use convonest_core::listing::SortKey;
use convonest_core::validation::{AnnouncementDraft, PostDraft, RegistrationForm};
use convonest_types::VoteKind;
use fixtures::{
    API_KEY, Harness, account_json, harness, mount_posts, mount_profile, post_json,
    profile_json, signed_in,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

/// Test: voting while anonymous is refused before any request.
#[tokio::test]
async fn test_vote_requires_login() {
    let h = harness().await;

    let err = h.forum.vote("p1", VoteKind::Upvote).await.unwrap_err();
    assert_eq!(err, ApiError::UnauthenticatedAction { action: "vote" });
    assert_eq!(
        err.to_string(),
        "Login required: you must be logged in to vote"
    );
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

/// Test: a confirmed vote adopts the server's vote sets.
#[tokio::test]
async fn test_vote_confirmed_with_server_state() {
    let h = signed_in("a@x.com").await;
    mount_posts(&h.server, vec![post_json("p1", &["b@x.com"], &[])]).await;
    h.forum.refresh_posts().await.unwrap();

    Mock::given(method("PATCH"))
        .and(path("/posts/p1/vote"))
        .and(body_json(json!({ "type": "upvote" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upvoteBy": ["b@x.com", "a@x.com", "c@x.com"],
            "downvoteBy": []
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let post = h.forum.vote("p1", VoteKind::Upvote).await.unwrap();
    assert_eq!(post.upvoters, vec!["b@x.com", "a@x.com", "c@x.com"]);
    assert_eq!(post.comment_count, 2);
    assert_eq!(h.forum.visible_posts()[0].upvoters.len(), 3);
}

/// Test: a failed vote is rolled back in the listing and the error returned.
#[tokio::test]
async fn test_failed_vote_rolls_back() {
    let h = signed_in("a@x.com").await;
    mount_posts(&h.server, vec![post_json("p1", &[], &["a@x.com"])]).await;
    h.forum.refresh_posts().await.unwrap();

    Mock::given(method("PATCH"))
        .and(path("/posts/p1/vote"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "nope" })))
        .mount(&h.server)
        .await;

    let err = h.forum.vote("p1", VoteKind::Upvote).await.unwrap_err();
    assert!(matches!(err, ApiError::ServerRejected { status: 500, .. }));

    let post = h.forum.with_listing(|listing| listing.get("p1").cloned()).unwrap();
    assert!(post.upvoters.is_empty());
    assert_eq!(post.downvoters, vec!["a@x.com"]);
}

/// Test: voting on a post that is not loaded fetches it first.
#[tokio::test]
async fn test_vote_on_unlisted_post_fetches_it() {
    let h = signed_in("a@x.com").await;

    Mock::given(method("GET"))
        .and(path("/posts/p9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "post": post_json("p9", &[], &[]),
            "comments": []
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/posts/p9/vote"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "modifiedCount": 1 })))
        .mount(&h.server)
        .await;

    let post = h.forum.vote("p9", VoteKind::Downvote).await.unwrap();
    assert_eq!(post.downvoters, vec!["a@x.com"]);
}

/// Test: comments are prepended and bump the count.
#[tokio::test]
async fn test_comment_prepends_and_counts() {
    let h = signed_in("a@x.com").await;

    Mock::given(method("GET"))
        .and(path("/posts/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "post": post_json("p1", &[], &[]),
            "comments": [
                { "_id": "c1", "postId": "p1", "commenterEmail": "b@x.com",
                  "comment": "older", "createdAt": "2024-05-01T11:00:00Z" },
                { "_id": "c2", "postId": "p1", "commenterEmail": "c@x.com",
                  "comment": "newer", "createdAt": "2024-05-01T12:00:00Z" }
            ]
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/posts/p1/comment"))
        .and(body_json(json!({ "comment": "Great post" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "_id": "c3", "postId": "p1", "commenterEmail": "a@x.com",
            "comment": "Great post", "createdAt": "2024-05-02T09:00:00Z"
        })))
        .mount(&h.server)
        .await;

    let mut thread = h.forum.open_post("p1").await.unwrap();
    assert_eq!(thread.comments[0].body, "newer");

    h.forum.comment(&mut thread, "  Great post ").await.unwrap();
    assert_eq!(thread.comments[0].id, "c3");
    assert_eq!(thread.comments.len(), 3);
    assert_eq!(thread.post.comment_count, 3);
}

/// Test: blank comments never reach the backend.
#[tokio::test]
async fn test_blank_comment_is_validation_error() {
    let h = signed_in("a@x.com").await;
    let mut thread = convonest_core::PostThread {
        post: serde_json::from_value(post_json("p1", &[], &[])).unwrap(),
        comments: Vec::new(),
    };

    let err = h.forum.comment(&mut thread, "   ").await.unwrap_err();
    assert!(matches!(err, ApiError::ValidationFailed { field: "comment", .. }));
}

/// Test: bronze members who used their quota cannot post.
#[tokio::test]
async fn test_bronze_quota_blocks_new_post() {
    let h = signed_in("a@x.com").await;
    mount_profile(&h.server, "a@x.com", profile_json("a@x.com", "user", "bronze", 5)).await;

    let draft = PostDraft {
        title: "Hello".to_string(),
        body: "World".to_string(),
        tag: "rust".to_string(),
    };
    let err = h.forum.create_post(&draft).await.unwrap_err();
    assert!(matches!(err, ApiError::AccessDenied { .. }));
}

/// Test: a gold member's post is sent with author details.
#[tokio::test]
async fn test_create_post_sends_author() {
    let h = signed_in("a@x.com").await;
    mount_profile(&h.server, "a@x.com", profile_json("a@x.com", "user", "gold", 12)).await;

    Mock::given(method("POST"))
        .and(path("/posts"))
        .and(body_partial_json(json!({
            "authorEmail": "a@x.com",
            "authorName": "Ann",
            "postTitle": "Hello",
            "postDescription": "World",
            "tag": "rust",
            "upVote": 0,
            "downVote": 0
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "acknowledged": true,
            "insertedId": "p42"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let draft = PostDraft {
        title: "Hello".to_string(),
        body: "World".to_string(),
        tag: "rust".to_string(),
    };
    assert_eq!(h.forum.create_post(&draft).await.unwrap().as_deref(), Some("p42"));
}

/// Test: admins do not write posts; the post area is for regular users.
#[tokio::test]
async fn test_admin_cannot_add_post() {
    let h = signed_in("a@x.com").await;
    mount_profile(&h.server, "a@x.com", profile_json("a@x.com", "admin", "gold", 0)).await;
    Mock::given(method("POST"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&h.server)
        .await;

    let draft = PostDraft {
        title: "Hello".to_string(),
        body: "World".to_string(),
        tag: "rust".to_string(),
    };
    let err = h.forum.create_post(&draft).await.unwrap_err();
    assert!(matches!(err, ApiError::AccessDenied { .. }));
}

/// Test: only admins may publish announcements.
#[tokio::test]
async fn test_announcement_requires_admin() {
    let h = signed_in("a@x.com").await;
    mount_profile(&h.server, "a@x.com", profile_json("a@x.com", "user", "gold", 0)).await;

    let draft = AnnouncementDraft {
        title: "Maintenance".to_string(),
        description: "Tonight".to_string(),
    };
    let err = h.forum.create_announcement(&draft).await.unwrap_err();
    assert!(matches!(err, ApiError::AccessDenied { .. }));
}

/// Test: registration signs up, sets the profile and upserts the user.
#[tokio::test]
async fn test_register_creates_backend_user() {
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/v1/accounts:signUp"))
        .and(query_param("key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(account_json("n@x.com")))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:update"))
        .and(body_partial_json(json!({ "displayName": "Nia" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "localId": "uid-n@x.com",
            "email": "n@x.com",
            "displayName": "Nia"
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_json(json!({
            "name": "Nia",
            "email": "n@x.com",
            "role": "user",
            "userStatus": "bronze",
            "membership": "no",
            "posts": 0
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "insertedId": "u1" })))
        .expect(1)
        .mount(&h.server)
        .await;

    let form = RegistrationForm {
        name: "Nia".to_string(),
        email: "n@x.com".to_string(),
        password: "secret1".to_string(),
        confirm_password: "secret1".to_string(),
        photo_url: None,
    };
    let principal = h.forum.register(&form).await.unwrap();
    assert_eq!(principal.identifier, "n@x.com");
    assert_eq!(principal.label(), "Nia");
    assert!(h.session.is_authenticated());
}

/// Test: a Google login the backend refuses to record is logged out again.
#[tokio::test]
async fn test_google_login_rolled_back_when_upsert_fails() {
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithIdp"))
        .and(query_param("key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(account_json("g@x.com")))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "message": "Database down" })),
        )
        .mount(&h.server)
        .await;

    let err = h.forum.login_with_google("google-id-token").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::ServerRejected {
            status: 500,
            message: Some("Database down".to_string())
        }
    );
    assert!(!h.session.is_authenticated());
    assert!(h.forum.session().current_principal().is_none());
}

/// Test: cancelling the forum's token stops an in-flight request quietly.
#[tokio::test]
async fn test_cancelled_refresh_is_silent() {
    let Harness {
        server,
        forum,
        notices,
        ..
    } = harness().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "posts": [] }))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let forum = forum.cancel_on(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), forum.refresh_posts())
        .await
        .expect("cancellation should end the request")
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, ApiError::Cancelled);
    assert!(notices.snapshot().is_empty());
}

/// Test: a rejected password leaves the session anonymous.
#[tokio::test]
async fn test_login_rejected_by_identity_provider() {
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "INVALID_LOGIN_CREDENTIALS" }
        })))
        .mount(&h.server)
        .await;

    let err = h.forum.login("a@x.com", "wrong-password").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid email or password");
    assert!(!h.session.is_authenticated());
}

/// Test: popularity sort over fetched posts, five per page.
#[tokio::test]
async fn test_listing_pages_fetched_posts() {
    let h = harness().await;
    let posts = (0..12)
        .map(|n| {
            let voters: Vec<String> = (0..n).map(|i| format!("u{i}@x.com")).collect();
            let voters: Vec<&str> = voters.iter().map(String::as_str).collect();
            post_json(&format!("p{n}"), &voters, &[])
        })
        .collect();
    mount_posts(&h.server, posts).await;

    h.forum.refresh_posts().await.unwrap();
    h.forum.with_listing(|listing| {
        listing.go_to(3);
        listing.set_sort_key(SortKey::Popularity);
        assert_eq!(listing.page(), 1);
        assert_eq!(listing.total_pages(), 3);
    });

    let first: Vec<String> = h.forum.visible_posts().into_iter().map(|p| p.id).collect();
    assert_eq!(first, vec!["p11", "p10", "p9", "p8", "p7"]);
}
