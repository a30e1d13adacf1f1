//! Role and quota rules for gated actions.

use convonest_types::{Role, UserProfile, UserStatus};

use crate::error::{ApiError, ApiResult};

/// Bronze accounts may write this many posts.
pub const BRONZE_POST_LIMIT: u32 = 5;

/// # Errors
/// `AccessDenied` unless the profile is an admin.
pub fn require_admin(profile: &UserProfile) -> ApiResult<()> {
    if profile.role == Role::Admin {
        return Ok(());
    }
    Err(ApiError::AccessDenied {
        reason: "Only admins can do this".to_string(),
    })
}

/// # Errors
/// `AccessDenied` unless the profile is a regular user.
pub fn require_member_role(profile: &UserProfile) -> ApiResult<()> {
    if profile.role == Role::User {
        return Ok(());
    }
    Err(ApiError::AccessDenied {
        reason: "This area is for members only".to_string(),
    })
}

/// Whether the account still has room under its post quota.
pub fn can_add_post(profile: &UserProfile) -> bool {
    !(profile.status == UserStatus::Bronze && profile.posts >= BRONZE_POST_LIMIT)
}

/// # Errors
/// `AccessDenied` when a bronze account has used its quota.
pub fn require_post_quota(profile: &UserProfile) -> ApiResult<()> {
    if can_add_post(profile) {
        return Ok(());
    }
    Err(ApiError::AccessDenied {
        reason: format!(
            "Bronze members can write up to {BRONZE_POST_LIMIT} posts. Become a member to post more."
        ),
    })
}
