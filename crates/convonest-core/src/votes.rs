//! Vote ledger: optimistic vote edits and their reconciliation.
//!
//! [`apply_vote`] is the pure reducer. [`VoteLedger`] wraps it with a per-post
//! sequence so that only the most recently issued request for a post may
//! settle it; older responses are `Superseded`.

use std::collections::HashMap;

use convonest_types::{Post, VoteKind, VoteState};

use crate::error::{ApiError, ApiResult};

/// What an actor wants their vote on a post to become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEdit {
    pub post_id: String,
    pub actor: String,
    /// `Some(kind)` toggles that vote; `None` clears any vote.
    pub desired: Option<VoteKind>,
}

impl VoteEdit {
    pub fn toggle(post_id: &str, actor: &str, kind: VoteKind) -> Self {
        Self {
            post_id: post_id.to_string(),
            actor: actor.to_string(),
            desired: Some(kind),
        }
    }

    pub fn clear(post_id: &str, actor: &str) -> Self {
        Self {
            post_id: post_id.to_string(),
            actor: actor.to_string(),
            desired: None,
        }
    }
}

/// Applies a vote edit to a post.
///
/// Voting one way removes the actor from the other side and toggles them on
/// this side. Nothing but the two vote sets changes.
///
/// # Errors
/// `UnauthenticatedAction` for an empty actor, `ValidationFailed` when the
/// edit targets another post.
pub fn apply_vote(post: &Post, edit: &VoteEdit) -> ApiResult<Post> {
    if edit.actor.trim().is_empty() {
        return Err(ApiError::UnauthenticatedAction { action: "vote" });
    }
    if edit.post_id != post.id {
        return Err(ApiError::validation(
            "post_id",
            format!("vote for {} applied to post {}", edit.post_id, post.id),
        ));
    }

    let mut next = post.clone();
    let actor = edit.actor.as_str();
    match edit.desired {
        Some(VoteKind::Upvote) => {
            remove(&mut next.downvoters, actor);
            toggle(&mut next.upvoters, actor);
        }
        Some(VoteKind::Downvote) => {
            remove(&mut next.upvoters, actor);
            toggle(&mut next.downvoters, actor);
        }
        None => {
            remove(&mut next.upvoters, actor);
            remove(&mut next.downvoters, actor);
        }
    }
    Ok(next)
}

fn remove(set: &mut Vec<String>, actor: &str) {
    set.retain(|id| id != actor);
}

fn toggle(set: &mut Vec<String>, actor: &str) {
    if set.iter().any(|id| id == actor) {
        remove(set, actor);
    } else {
        set.push(actor.to_string());
    }
}

/// Replaces the vote sets with the ones the server echoed, if any.
pub fn adopt_server_votes(post: &Post, state: &VoteState) -> Post {
    let mut next = post.clone();
    if let Some(upvoters) = &state.upvoters {
        next.upvoters = dedup(upvoters);
    }
    if let Some(downvoters) = &state.downvoters {
        next.downvoters = dedup(downvoters);
    }
    let upvoters = next.upvoters.clone();
    next.downvoters.retain(|id| !upvoters.contains(id));
    next
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

/// An optimistic edit waiting for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVote {
    pub post_id: String,
    pub seq: u64,
    /// What to send to the backend.
    pub kind: Option<VoteKind>,
    /// The post as shown while the request is in flight.
    pub optimistic: Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The backend accepted the latest edit; this is the post to show.
    Confirmed(Post),
    /// The latest edit failed; the post is back at its last confirmed state.
    RolledBack(Post),
    /// A newer edit for the same post is in flight; ignore this response.
    Superseded,
}

#[derive(Debug)]
struct LedgerEntry {
    latest: u64,
    confirmed: Post,
}

/// Tracks in-flight vote edits per post.
#[derive(Debug, Default)]
pub struct VoteLedger {
    entries: HashMap<String, LedgerEntry>,
    next_seq: u64,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `edit` optimistically to `current` and records it as the
    /// latest edit for the post.
    ///
    /// `current` is the post as displayed; when nothing is pending for it, it
    /// also becomes the state to roll back to.
    ///
    /// # Errors
    /// Returns the reducer's error; the ledger is unchanged then.
    pub fn begin(&mut self, current: &Post, edit: &VoteEdit) -> ApiResult<PendingVote> {
        let optimistic = apply_vote(current, edit)?;
        self.next_seq += 1;
        let seq = self.next_seq;

        self.entries
            .entry(current.id.clone())
            .and_modify(|entry| entry.latest = seq)
            .or_insert_with(|| LedgerEntry {
                latest: seq,
                confirmed: current.clone(),
            });

        Ok(PendingVote {
            post_id: current.id.clone(),
            seq,
            kind: edit.desired,
            optimistic,
        })
    }

    /// Settles a pending edit with the backend's outcome.
    pub fn settle(&mut self, pending: &PendingVote, outcome: &ApiResult<VoteState>) -> Settlement {
        let Some(entry) = self.entries.get_mut(&pending.post_id) else {
            return Settlement::Superseded;
        };

        if entry.latest != pending.seq {
            // The server still applied an older edit; roll back to it, not past it.
            if let Ok(state) = outcome
                && pending.seq < entry.latest
            {
                entry.confirmed = adopt_server_votes(&pending.optimistic, state);
            }
            tracing::debug!(
                post_id = %pending.post_id,
                seq = pending.seq,
                latest = entry.latest,
                "Discarding superseded vote response"
            );
            return Settlement::Superseded;
        }

        let Some(entry) = self.entries.remove(&pending.post_id) else {
            return Settlement::Superseded;
        };
        match outcome {
            Ok(state) => Settlement::Confirmed(adopt_server_votes(&pending.optimistic, state)),
            Err(e) => {
                tracing::warn!(post_id = %pending.post_id, "Vote failed, rolling back: {e}");
                Settlement::RolledBack(entry.confirmed)
            }
        }
    }

    pub fn is_pending(&self, post_id: &str) -> bool {
        self.entries.contains_key(post_id)
    }
}
