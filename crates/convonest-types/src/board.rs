//! Tags and announcements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "authorName", default)]
    pub author_name: String,
    #[serde(rename = "authorEmail", default)]
    pub author: String,
    #[serde(
        rename = "authorImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub author_image: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "creation_time", default)]
    pub created_at: DateTime<Utc>,
}

/// Body of `GET /announcements`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnouncementsPage {
    #[serde(default)]
    pub announcements: Vec<Announcement>,
}

/// Body of `POST /announcements`.
#[derive(Debug, Clone, Serialize)]
pub struct NewAnnouncement {
    #[serde(rename = "authorName")]
    pub author_name: String,
    #[serde(rename = "authorEmail")]
    pub author: String,
    #[serde(rename = "authorImage", skip_serializing_if = "Option::is_none")]
    pub author_image: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(rename = "creation_time")]
    pub created_at: DateTime<Utc>,
}
