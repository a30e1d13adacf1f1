//! Forum service: session, API, listing and vote ledger behind one handle.
//!
//! Shared state sits behind a `std::sync::Mutex` that is only held between
//! awaits, never across one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::Utc;
use convonest_types::{
    Announcement, Comment, NewAnnouncement, NewPost, Post, Principal, Tag, UserProfile, VoteKind,
};
use tokio_util::sync::CancellationToken;

use crate::access;
use crate::api::{ForumApi, POSTS_FETCH_LIMIT};
use crate::config::{Config, paths};
use crate::error::{ApiError, ApiResult};
use crate::gateway::{Gateway, ReqwestTransport};
use crate::listing::Listing;
use crate::notice::{NoticeSink, TracingNotices};
use crate::session::cache::CredentialStore;
use crate::session::{Registration, RestIdentityProvider, SessionStore};
use crate::validation::{self, AnnouncementDraft, PostDraft, RegistrationForm};
use crate::votes::{Settlement, VoteEdit, VoteLedger};

/// A post opened with its comments, newest comment first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostThread {
    pub post: Post,
    pub comments: Vec<Comment>,
}

#[derive(Debug)]
struct ForumState {
    listing: Listing,
    ledger: VoteLedger,
}

#[derive(Debug)]
pub struct Forum {
    session: Arc<SessionStore>,
    api: ForumApi,
    state: Mutex<ForumState>,
}

impl Forum {
    pub fn new(session: Arc<SessionStore>, api: ForumApi, listing: Listing) -> Self {
        Self {
            session,
            api,
            state: Mutex::new(ForumState {
                listing,
                ledger: VoteLedger::new(),
            }),
        }
    }

    /// Wires the standard stack from config: persisted credentials under
    /// `CONVONEST_HOME`, the REST identity provider, the standard gateway.
    ///
    /// Notices go to `notices`, or to the log when none is given. A
    /// remembered session is restored before returning.
    ///
    /// # Errors
    /// Returns an error if the API base URL is invalid.
    pub fn connect(config: &Config, notices: Option<Arc<dyn NoticeSink>>) -> Result<Self> {
        let store = CredentialStore::open(paths::session_path());
        let mut identity = RestIdentityProvider::new(&config.identity, store);
        if let Some(timeout) = config.request_timeout() {
            identity = identity.with_timeout(timeout);
        }
        let session = Arc::new(SessionStore::new(Arc::new(identity)));
        session.restore();

        let notices = notices.unwrap_or_else(|| Arc::new(TracingNotices));
        let transport = ReqwestTransport::new(&config.api_url)?;
        let gateway = Gateway::standard(
            config,
            Arc::clone(&session),
            notices,
            Arc::new(transport),
        );
        Ok(Self::new(
            session,
            ForumApi::new(Arc::new(gateway)),
            Listing::from_config(config),
        ))
    }

    /// Stops every request of this forum once `token` is cancelled.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.api = self.api.with_cancel(token);
        self
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn api(&self) -> &ForumApi {
        &self.api
    }

    /// Runs `f` against the listing.
    pub fn with_listing<R>(&self, f: impl FnOnce(&mut Listing) -> R) -> R {
        f(&mut self.lock().listing)
    }

    pub fn visible_posts(&self) -> Vec<Post> {
        self.lock().listing.visible_slice()
    }

    /// Fetches the posts into the listing. Returns how many arrived.
    ///
    /// # Errors
    /// Whatever the gateway reports.
    pub async fn refresh_posts(&self) -> ApiResult<usize> {
        let posts = self.api.list_posts(1, POSTS_FETCH_LIMIT).await?;
        let count = posts.len();
        self.lock().listing.set_posts(posts);
        tracing::debug!(count, "Refreshed posts");
        Ok(count)
    }

    /// Toggles the principal's `kind` vote on a post.
    ///
    /// The listing shows the edit immediately. On failure it is rolled back
    /// and the error returned; when a newer vote on the same post is already
    /// in flight, this call leaves the listing to it.
    ///
    /// # Errors
    /// `UnauthenticatedAction` when nobody is signed in, otherwise the
    /// backend failure.
    pub async fn vote(&self, post_id: &str, kind: VoteKind) -> ApiResult<Post> {
        let principal = self.require_principal("vote")?;

        let known = self.lock().listing.get(post_id).cloned();
        let current = match known {
            Some(post) => post,
            None => self.api.post_details(post_id).await?.post,
        };

        let edit = VoteEdit::toggle(post_id, &principal.identifier, kind);
        let pending = {
            let mut state = self.lock();
            let pending = state.ledger.begin(&current, &edit)?;
            state.listing.replace_post(pending.optimistic.clone());
            pending
        };

        let outcome = self.api.vote(post_id, kind).await;

        let settlement = {
            let mut state = self.lock();
            let settlement = state.ledger.settle(&pending, &outcome);
            match &settlement {
                Settlement::Confirmed(post) | Settlement::RolledBack(post) => {
                    state.listing.replace_post(post.clone());
                }
                Settlement::Superseded => {}
            }
            settlement
        };

        outcome?;
        Ok(match settlement {
            Settlement::Confirmed(post) | Settlement::RolledBack(post) => post,
            Settlement::Superseded => pending.optimistic,
        })
    }

    /// Loads a post and its comments, refreshing the listing's copy.
    ///
    /// # Errors
    /// Whatever the gateway reports.
    pub async fn open_post(&self, post_id: &str) -> ApiResult<PostThread> {
        let details = self.api.post_details(post_id).await?;
        self.lock().listing.replace_post(details.post.clone());

        let mut comments = details.comments;
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(PostThread {
            post: details.post,
            comments,
        })
    }

    /// Posts a comment and prepends the server's copy to the thread.
    ///
    /// # Errors
    /// `UnauthenticatedAction`, `ValidationFailed` for blank text, or the
    /// backend failure.
    pub async fn comment(&self, thread: &mut PostThread, text: &str) -> ApiResult<Comment> {
        self.require_principal("comment")?;
        let text = validation::validate_comment(text)?;

        let comment = self.api.add_comment(&thread.post.id, &text).await?;
        thread.comments.insert(0, comment.clone());
        thread.post.comment_count += 1;
        self.lock().listing.replace_post(thread.post.clone());
        Ok(comment)
    }

    /// Publishes a post as the current principal. Only regular users post,
    /// subject to the bronze quota.
    ///
    /// # Errors
    /// `ValidationFailed`, `UnauthenticatedAction`, `AccessDenied` for
    /// admins or when the quota is used up, or the backend failure.
    pub async fn create_post(&self, draft: &PostDraft) -> ApiResult<Option<String>> {
        validation::validate_post(draft)?;
        let principal = self.require_principal("add a post")?;
        let profile = self.api.user_by_email(&principal.identifier).await?;
        access::require_member_role(&profile)?;
        access::require_post_quota(&profile)?;

        let post = NewPost {
            author_image: principal.photo_url.clone().or(profile.avatar),
            author_name: principal.label().to_string(),
            author: principal.identifier.clone(),
            title: draft.title.trim().to_string(),
            body: draft.body.trim().to_string(),
            tag: draft.tag.trim().to_string(),
            up_vote: 0,
            down_vote: 0,
            created_at: Utc::now(),
        };
        let id = self.api.create_post(&post).await?;
        tracing::info!(id = id.as_deref().unwrap_or("?"), "Created post");
        Ok(id)
    }

    /// Publishes an announcement. Admins only.
    ///
    /// # Errors
    /// `ValidationFailed`, `UnauthenticatedAction`, `AccessDenied` for
    /// non-admins, or the backend failure.
    pub async fn create_announcement(&self, draft: &AnnouncementDraft) -> ApiResult<Option<String>> {
        validation::validate_announcement(draft)?;
        let principal = self.require_principal("add an announcement")?;
        let profile = self.api.user_by_email(&principal.identifier).await?;
        access::require_admin(&profile)?;

        let announcement = NewAnnouncement {
            author_name: principal.label().to_string(),
            author: principal.identifier.clone(),
            author_image: principal.photo_url.clone().or(profile.avatar),
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            created_at: Utc::now(),
        };
        self.api.create_announcement(&announcement).await
    }

    /// # Errors
    /// `ValidationFailed` or the identity provider's refusal.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<Principal> {
        validation::validate_login(email, password)?;
        Ok(self.session.login(email.trim(), password).await?)
    }

    /// Signs in with a Google ID token and makes sure the backend knows the
    /// account. If the backend refuses the account the session is logged
    /// out again.
    ///
    /// # Errors
    /// The identity provider's refusal or the backend failure.
    pub async fn login_with_google(&self, id_token: &str) -> ApiResult<Principal> {
        let principal = self.session.login_with_google(id_token.trim()).await?;
        let profile = UserProfile::new_member(
            principal.label(),
            &principal.identifier,
            principal.photo_url.clone(),
        );
        if let Err(e) = self.api.upsert_user(&profile).await {
            if let Err(logout) = self.session.logout() {
                tracing::warn!("Failed to log out after rejected account: {logout}");
            }
            return Err(e);
        }
        Ok(principal)
    }

    /// Creates the account with the identity provider and records the
    /// backend user (an existing record counts as success).
    ///
    /// # Errors
    /// `ValidationFailed`, the identity provider's refusal, or the backend
    /// failure.
    pub async fn register(&self, form: &RegistrationForm) -> ApiResult<Principal> {
        validation::validate_registration(form)?;
        let registration = Registration {
            name: form.name.trim().to_string(),
            email: form.email.trim().to_string(),
            password: form.password.clone(),
            photo_url: form.photo_url.as_deref().map(str::trim).map(str::to_string),
        };
        let principal = self.session.register(&registration).await?;

        let profile = UserProfile::new_member(
            &registration.name,
            &registration.email,
            registration.photo_url.clone(),
        );
        if !self.api.upsert_user(&profile).await? {
            tracing::debug!(email = %registration.email, "Backend user already existed");
        }
        Ok(principal)
    }

    /// # Errors
    /// Returns an error if stored credentials could not be removed.
    pub fn logout(&self) -> ApiResult<()> {
        Ok(self.session.logout()?)
    }

    /// # Errors
    /// Whatever the gateway reports.
    pub async fn tags(&self) -> ApiResult<Vec<Tag>> {
        self.api.tags().await
    }

    /// Announcements, newest first.
    ///
    /// # Errors
    /// Whatever the gateway reports.
    pub async fn announcements(&self) -> ApiResult<Vec<Announcement>> {
        let mut announcements = self.api.announcements().await?;
        announcements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(announcements)
    }

    /// The backend profile of the current principal.
    ///
    /// # Errors
    /// `UnauthenticatedAction` or the backend failure.
    pub async fn profile(&self) -> ApiResult<UserProfile> {
        let principal = self.require_principal("view your profile")?;
        self.api.user_by_email(&principal.identifier).await
    }

    fn require_principal(&self, action: &'static str) -> ApiResult<Principal> {
        self.session
            .current_principal()
            .ok_or(ApiError::UnauthenticatedAction { action })
    }

    fn lock(&self) -> MutexGuard<'_, ForumState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
