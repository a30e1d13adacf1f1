//! Posts, comments and vote payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::nullable_list;

/// A forum post as returned by `GET /posts` and `GET /posts/:id`.
///
/// `upvoters` and `downvoters` are ordered sets: an identifier appears at most
/// once in each, and never in both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    /// Author identifier (account email).
    #[serde(rename = "authorEmail", default)]
    pub author: String,
    #[serde(rename = "authorName", default)]
    pub author_name: String,
    #[serde(
        rename = "authorImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub author_image: Option<String>,
    #[serde(rename = "postTitle", default)]
    pub title: String,
    #[serde(rename = "postDescription", default)]
    pub body: String,
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "creation_time", default)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "upvoteBy", default, deserialize_with = "nullable_list")]
    pub upvoters: Vec<String>,
    #[serde(rename = "downvoteBy", default, deserialize_with = "nullable_list")]
    pub downvoters: Vec<String>,
    #[serde(rename = "commentsCount", default)]
    pub comment_count: u64,
}

impl Post {
    /// Popularity score: upvotes minus downvotes.
    pub fn score(&self) -> i64 {
        self.upvoters.len() as i64 - self.downvoters.len() as i64
    }

    /// Returns the vote `actor` currently holds on this post, if any.
    pub fn vote_of(&self, actor: &str) -> Option<VoteKind> {
        if self.upvoters.iter().any(|id| id == actor) {
            Some(VoteKind::Upvote)
        } else if self.downvoters.iter().any(|id| id == actor) {
            Some(VoteKind::Downvote)
        } else {
            None
        }
    }
}

/// Body of `GET /posts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostsPage {
    #[serde(default)]
    pub posts: Vec<Post>,
}

/// Body of `GET /posts/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDetails {
    pub post: Post,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// A comment on a post. Append-only from the client's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "postId", default)]
    pub post_id: String,
    #[serde(rename = "commenterEmail", default)]
    pub commenter: String,
    #[serde(
        rename = "commenterName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub commenter_name: Option<String>,
    #[serde(
        rename = "commenterImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub commenter_image: Option<String>,
    #[serde(rename = "comment", default)]
    pub body: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /posts/:id/comment`.
#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub comment: String,
}

/// Body of `POST /posts`.
#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    #[serde(rename = "authorImage", skip_serializing_if = "Option::is_none")]
    pub author_image: Option<String>,
    #[serde(rename = "authorName")]
    pub author_name: String,
    #[serde(rename = "authorEmail")]
    pub author: String,
    #[serde(rename = "postTitle")]
    pub title: String,
    #[serde(rename = "postDescription")]
    pub body: String,
    pub tag: String,
    #[serde(rename = "upVote")]
    pub up_vote: u32,
    #[serde(rename = "downVote")]
    pub down_vote: u32,
    #[serde(rename = "creation_time")]
    pub created_at: DateTime<Utc>,
}

/// Which way a vote goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Upvote,
    Downvote,
}

impl VoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Upvote => "upvote",
            VoteKind::Downvote => "downvote",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "up" | "upvote" => Ok(Self::Upvote),
            "down" | "downvote" => Ok(Self::Downvote),
            other => Err(format!("Unknown vote kind: {other} (expected up or down)")),
        }
    }
}

/// Body of `PATCH /posts/:id/vote`.
#[derive(Debug, Clone, Serialize)]
pub struct VoteRequest {
    #[serde(rename = "type")]
    pub kind: VoteKind,
}

/// Vote state echoed by the backend after a vote.
///
/// Both lists are optional: a backend that only acknowledges the vote leaves
/// the optimistic state in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VoteState {
    #[serde(rename = "upvoteBy", default)]
    pub upvoters: Option<Vec<String>>,
    #[serde(rename = "downvoteBy", default)]
    pub downvoters: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_post_normalizes_missing_and_null_vote_lists() {
        let post: Post = serde_json::from_value(json!({
            "_id": "p1",
            "authorEmail": "a@x.com",
            "postTitle": "Hello",
            "creation_time": "2024-05-01T10:00:00Z",
            "upvoteBy": null
        }))
        .unwrap();

        assert!(post.upvoters.is_empty());
        assert!(post.downvoters.is_empty());
        assert_eq!(post.comment_count, 0);
        assert_eq!(post.score(), 0);
    }

    #[test]
    fn test_post_reads_backend_field_names() {
        let post: Post = serde_json::from_value(json!({
            "_id": "p2",
            "authorEmail": "a@x.com",
            "authorName": "Ann",
            "postTitle": "Title",
            "postDescription": "Body",
            "tag": "rust",
            "creation_time": "2024-05-01T10:00:00.000Z",
            "upvoteBy": ["b@x.com", "c@x.com"],
            "downvoteBy": ["d@x.com"],
            "commentsCount": 4
        }))
        .unwrap();

        assert_eq!(post.title, "Title");
        assert_eq!(post.body, "Body");
        assert_eq!(post.score(), 1);
        assert_eq!(post.comment_count, 4);
        assert_eq!(post.vote_of("d@x.com"), Some(VoteKind::Downvote));
        assert_eq!(post.vote_of("z@x.com"), None);
    }

    #[test]
    fn test_vote_kind_parsing() {
        assert_eq!("up".parse::<VoteKind>().unwrap(), VoteKind::Upvote);
        assert_eq!("Downvote".parse::<VoteKind>().unwrap(), VoteKind::Downvote);
        assert!("sideways".parse::<VoteKind>().is_err());
    }

    #[test]
    fn test_vote_request_wire_format() {
        let body = serde_json::to_value(VoteRequest {
            kind: VoteKind::Downvote,
        })
        .unwrap();
        assert_eq!(body, json!({ "type": "downvote" }));
    }
}
