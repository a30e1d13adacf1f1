//! Shared data model for the ConvoNest forum client.
//!
//! Wire names follow the backend's JSON (`_id`, `postTitle`, `upvoteBy`, ...);
//! the Rust field names describe what the value means.

pub mod board;
pub mod post;
pub mod user;

pub use board::{Announcement, AnnouncementsPage, NewAnnouncement, Tag};
pub use post::{
    Comment, NewComment, NewPost, Post, PostDetails, PostsPage, VoteKind, VoteRequest, VoteState,
};
pub use user::{CredentialProvider, Membership, Principal, Role, UserProfile, UserStatus};

/// Accepts `null` (or a missing field via `#[serde(default)]`) as an empty list.
pub(crate) fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
