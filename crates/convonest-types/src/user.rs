//! Identities: the signed-in principal and the backend's user profile.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How the principal authenticated with the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialProvider {
    #[default]
    Password,
    Google,
}

impl fmt::Display for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialProvider::Password => write!(f, "password"),
            CredentialProvider::Google => write!(f, "google"),
        }
    }
}

/// The authenticated identity of the current user.
///
/// `identifier` is the account email; the backend keys votes, comments and
/// profiles by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub identifier: String,
    /// Identity-provider account id.
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub provider: CredentialProvider,
}

impl Principal {
    /// Name to show for this principal, falling back to the identifier.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    #[serde(other)]
    Unknown,
}

/// Membership tier. Bronze accounts have a post quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Bronze,
    Gold,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Yes,
    #[default]
    No,
    #[serde(other)]
    Unknown,
}

/// Backend user record (`GET /users/email/:email`, `POST /users`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(rename = "userStatus", default)]
    pub status: UserStatus,
    #[serde(default)]
    pub membership: Membership,
    /// Number of posts the user has written.
    #[serde(default)]
    pub posts: u32,
}

impl UserProfile {
    /// A freshly registered account: regular user, bronze, no membership.
    pub fn new_member(name: &str, email: &str, avatar: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            avatar,
            role: Role::User,
            status: UserStatus::Bronze,
            membership: Membership::No,
            posts: 0,
        }
    }
}
