//! Typed wrappers over the backend endpoints.
//!
//! Every call goes through the [`Gateway`], so notices and session teardown
//! happen here too. Call-site checks (login, validation, roles) belong to
//! `forum`, not to this layer.

use std::sync::Arc;

use convonest_types::{
    Announcement, AnnouncementsPage, Comment, NewAnnouncement, NewComment, NewPost, Post,
    PostDetails, PostsPage, Tag, UserProfile, VoteKind, VoteRequest, VoteState,
};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::gateway::{ApiRequest, ApiResponse, Gateway};

/// How many posts one listing fetch asks for.
pub const POSTS_FETCH_LIMIT: u32 = 100;

/// Client for the forum backend.
#[derive(Debug, Clone)]
pub struct ForumApi {
    gateway: Arc<Gateway>,
    cancel: Option<CancellationToken>,
}

impl ForumApi {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            cancel: None,
        }
    }

    /// A handle whose requests all stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(&self, token: CancellationToken) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            cancel: Some(token),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// `GET /posts?page&limit`
    pub async fn list_posts(&self, page: u32, limit: u32) -> ApiResult<Vec<Post>> {
        let request = ApiRequest::get(["posts"])
            .query("page", page)
            .query("limit", limit);
        let page: PostsPage = self.fetch(request).await?;
        Ok(page.posts)
    }

    /// `GET /posts/:id`
    pub async fn post_details(&self, post_id: &str) -> ApiResult<PostDetails> {
        self.fetch(ApiRequest::get(["posts", post_id])).await
    }

    /// `PATCH /posts/:id/vote`
    ///
    /// The backend toggles like the client does; an empty or partial echo is
    /// fine.
    pub async fn vote(&self, post_id: &str, kind: VoteKind) -> ApiResult<VoteState> {
        let request = ApiRequest::patch(["posts", post_id, "vote"])
            .json(to_body(&VoteRequest { kind })?);
        let response = self.execute(request).await?;
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(VoteState::default());
        }
        // Acknowledgements such as `{ "modifiedCount": 1 }` carry no vote sets.
        Ok(response.json::<VoteState>().unwrap_or_default())
    }

    /// `POST /posts/:id/comment`
    pub async fn add_comment(&self, post_id: &str, text: &str) -> ApiResult<Comment> {
        let request = ApiRequest::post(["posts", post_id, "comment"]).json(to_body(&NewComment {
            comment: text.to_string(),
        })?);
        self.fetch(request).await
    }

    /// `POST /posts`
    pub async fn create_post(&self, post: &NewPost) -> ApiResult<Option<String>> {
        let response = self
            .execute(ApiRequest::post(["posts"]).json(to_body(post)?))
            .await?;
        Ok(inserted_id(&response.body))
    }

    /// `GET /tags`
    pub async fn tags(&self) -> ApiResult<Vec<Tag>> {
        self.fetch(ApiRequest::get(["tags"])).await
    }

    /// `GET /announcements`
    pub async fn announcements(&self) -> ApiResult<Vec<Announcement>> {
        let page: AnnouncementsPage = self.fetch(ApiRequest::get(["announcements"])).await?;
        Ok(page.announcements)
    }

    /// `POST /announcements`
    pub async fn create_announcement(
        &self,
        announcement: &NewAnnouncement,
    ) -> ApiResult<Option<String>> {
        let response = self
            .execute(ApiRequest::post(["announcements"]).json(to_body(announcement)?))
            .await?;
        Ok(inserted_id(&response.body))
    }

    /// `GET /users/email/:email`
    pub async fn user_by_email(&self, email: &str) -> ApiResult<UserProfile> {
        self.fetch(ApiRequest::get(["users", "email", email])).await
    }

    /// `POST /users`. Returns `false` when the user already existed (409).
    pub async fn upsert_user(&self, profile: &UserProfile) -> ApiResult<bool> {
        let request = ApiRequest::post(["users"])
            .json(to_body(profile)?)
            .accept_status(StatusCode::CONFLICT);
        let response = self.execute(request).await?;
        Ok(response.status != StatusCode::CONFLICT)
    }

    async fn execute(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let request = match &self.cancel {
            Some(token) => request.with_cancel(token.clone()),
            None => request,
        };
        self.gateway.execute(request).await
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        self.execute(request).await?.json()
    }
}

fn to_body(value: &impl Serialize) -> ApiResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {e}")))
}

/// Pulls `insertedId` out of a create acknowledgement, if present.
fn inserted_id(body: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(body).ok()?;
    match json.get("insertedId")? {
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_id_extraction() {
        assert_eq!(
            inserted_id(br#"{"acknowledged":true,"insertedId":"abc"}"#),
            Some("abc".to_string())
        );
        assert_eq!(inserted_id(b"{}"), None);
        assert_eq!(inserted_id(b"not json"), None);
    }
}
