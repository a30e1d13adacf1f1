use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, HeaderValue};
use uuid::Uuid;

use super::{ApiRequest, Next, Stage, StageFuture, describe_duration};
use crate::error::ApiError;
use crate::notice::{Notice, NoticeSink};
use crate::session::{Credential, SessionStore};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logs method, path, outcome and latency under a per-request id.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceStage;

impl Stage for TraceStage {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn handle<'a>(&'a self, mut request: ApiRequest, next: Next<'a>) -> StageFuture<'a> {
        Box::pin(async move {
            let request_id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                request.headers.insert(REQUEST_ID_HEADER, value);
            }
            let method = request.method.clone();
            let path = request.path();
            let started = Instant::now();

            tracing::debug!(%request_id, %method, %path, "Sending request");
            let result = next.run(request).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(response) => tracing::debug!(
                    %request_id,
                    %method,
                    %path,
                    status = response.status.as_u16(),
                    elapsed_ms,
                    "Request finished"
                ),
                Err(e) => tracing::debug!(
                    %request_id,
                    %method,
                    %path,
                    kind = %e.kind(),
                    elapsed_ms,
                    "Request failed: {e}"
                ),
            }
            result
        })
    }
}

/// Turns error statuses into `ApiError`s, raises notices and tears the
/// session down on 401/403. The error is always returned to the caller.
pub struct FailureStage {
    session: Arc<SessionStore>,
    notices: Arc<dyn NoticeSink>,
}

impl FailureStage {
    pub fn new(session: Arc<SessionStore>, notices: Arc<dyn NoticeSink>) -> Self {
        Self { session, notices }
    }

    fn report(&self, error: &ApiError) {
        match error {
            ApiError::SessionExpired { status } => {
                self.notices.notify(&Notice::session_expired());
                if self.session.invalidate(&format!("HTTP {status}")) {
                    tracing::info!(status, "Logged out after rejected credentials");
                }
            }
            ApiError::ServerRejected { message, .. } => {
                self.notices
                    .notify(&Notice::server_rejected(message.as_deref()));
            }
            ApiError::NetworkUnavailable { .. } => {
                self.notices.notify(&Notice::network_error());
            }
            ApiError::ValidationFailed { .. }
            | ApiError::UnauthenticatedAction { .. }
            | ApiError::AccessDenied { .. }
            | ApiError::Cancelled
            | ApiError::InvalidResponse(_)
            | ApiError::Identity(_) => {}
        }
    }
}

impl Stage for FailureStage {
    fn name(&self) -> &'static str {
        "failures"
    }

    fn handle<'a>(&'a self, request: ApiRequest, next: Next<'a>) -> StageFuture<'a> {
        Box::pin(async move {
            let accept_statuses = request.accept_statuses.clone();
            let result = next.run(request).await.and_then(|response| {
                if response.status.is_success() || accept_statuses.contains(&response.status) {
                    Ok(response)
                } else {
                    Err(ApiError::from_status(response.status, &response.body))
                }
            });

            if let Err(e) = &result {
                self.report(e);
            }
            result
        })
    }
}

/// Attaches `Authorization: Bearer <token>` when someone is signed in.
///
/// Credential failures are logged and the request goes out without the
/// header; the backend decides what an anonymous caller may do. A credential
/// that takes longer than the wait limit counts as a failure.
pub struct BearerStage {
    session: Arc<SessionStore>,
    credential_wait: Option<Duration>,
}

impl BearerStage {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self {
            session,
            credential_wait: None,
        }
    }

    /// Caps how long a request waits for the identity provider.
    #[must_use]
    pub fn with_credential_wait(mut self, limit: Duration) -> Self {
        self.credential_wait = Some(limit);
        self
    }

    async fn credential(&self) -> Result<Credential, String> {
        let fetch = self.session.credential();
        match self.credential_wait {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "identity provider did not answer within {}",
                    describe_duration(limit)
                )),
            },
            None => fetch.await.map_err(|e| e.to_string()),
        }
    }
}

impl Stage for BearerStage {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn handle<'a>(&'a self, mut request: ApiRequest, next: Next<'a>) -> StageFuture<'a> {
        Box::pin(async move {
            if self.session.is_authenticated() {
                match self.credential().await {
                    Ok(credential) => {
                        match HeaderValue::from_str(&format!("Bearer {}", credential.token)) {
                            Ok(mut value) => {
                                value.set_sensitive(true);
                                request.headers.insert(AUTHORIZATION, value);
                            }
                            Err(_) => tracing::warn!(
                                path = %request.path(),
                                "Credential is not a valid header value; sending without it"
                            ),
                        }
                    }
                    Err(e) => tracing::warn!(
                        path = %request.path(),
                        "Credential unavailable, sending without it: {e}"
                    ),
                }
            }
            next.run(request).await
        })
    }
}

/// Bounds the rest of the chain; elapsed counts as a network failure.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutStage {
    timeout: Duration,
}

impl TimeoutStage {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Stage for TimeoutStage {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn handle<'a>(&'a self, request: ApiRequest, next: Next<'a>) -> StageFuture<'a> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, next.run(request))
                .await
                .unwrap_or_else(|_| {
                    Err(ApiError::network(format!(
                        "request timed out after {}",
                        describe_duration(self.timeout)
                    )))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use convonest_types::Principal;
    use reqwest::StatusCode;

    use super::*;
    use crate::config::Config;
    use crate::gateway::{ApiResponse, Gateway, Transport};
    use crate::notice::{NoticeLevel, NoticeLog};
    use crate::session::{IdentityError, IdentityFuture, IdentityProvider, Registration};

    struct StaticIdentity {
        token: Option<&'static str>,
        stalled: bool,
    }

    impl IdentityProvider for StaticIdentity {
        fn sign_in<'a>(&'a self, _: &'a str, _: &'a str) -> IdentityFuture<'a, Principal> {
            Box::pin(async { Err(IdentityError::NotSignedIn) })
        }

        fn sign_in_with_google<'a>(&'a self, _: &'a str) -> IdentityFuture<'a, Principal> {
            Box::pin(async { Err(IdentityError::NotSignedIn) })
        }

        fn sign_up<'a>(&'a self, _: &'a Registration) -> IdentityFuture<'a, Principal> {
            Box::pin(async { Err(IdentityError::NotSignedIn) })
        }

        fn id_token(&self) -> IdentityFuture<'_, Credential> {
            if self.stalled {
                return Box::pin(std::future::pending());
            }
            let token = self.token;
            Box::pin(async move {
                token
                    .map(|token| Credential {
                        token: token.to_string(),
                        expires: u64::MAX,
                    })
                    .ok_or_else(|| IdentityError::Network("offline".to_string()))
            })
        }

        fn restore(&self) -> Option<Principal> {
            Some(Principal {
                identifier: "a@x.com".to_string(),
                uid: "uid-a".to_string(),
                display_name: None,
                photo_url: None,
                provider: convonest_types::CredentialProvider::Password,
            })
        }

        fn sign_out(&self) -> Result<(), IdentityError> {
            Ok(())
        }
    }

    struct Canned {
        status: StatusCode,
        body: &'static str,
        delay: Option<Duration>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Canned {
        fn new(status: StatusCode, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                delay: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Canned {
        fn send(&self, request: ApiRequest) -> StageFuture<'_> {
            self.seen.lock().unwrap().push(request);
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(ApiResponse {
                    status: self.status,
                    body: Bytes::from_static(self.body.as_bytes()),
                })
            })
        }
    }

    fn signed_in(token: Option<&'static str>) -> Arc<SessionStore> {
        restored(StaticIdentity {
            token,
            stalled: false,
        })
    }

    fn restored(identity: StaticIdentity) -> Arc<SessionStore> {
        let session = Arc::new(SessionStore::new(Arc::new(identity)));
        session.restore();
        session
    }

    #[tokio::test]
    async fn test_bearer_attached_when_signed_in() {
        let transport = Canned::new(StatusCode::OK, "{}");
        let gateway = Gateway::builder(transport.clone())
            .stage(BearerStage::new(signed_in(Some("tok-123"))))
            .build();

        gateway.execute(ApiRequest::get(["posts"])).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].headers[AUTHORIZATION], "Bearer tok-123");
    }

    #[tokio::test]
    async fn test_bearer_fails_open() {
        let transport = Canned::new(StatusCode::OK, "{}");
        let gateway = Gateway::builder(transport.clone())
            .stage(BearerStage::new(signed_in(None)))
            .build();

        gateway.execute(ApiRequest::get(["posts"])).await.unwrap();

        assert!(transport.seen.lock().unwrap()[0]
            .headers
            .get(AUTHORIZATION)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_credential_fails_open_within_timeout() {
        let session = restored(StaticIdentity {
            token: Some("never"),
            stalled: true,
        });
        let transport = Canned::new(StatusCode::OK, "{}");
        let gateway = Gateway::standard(
            &Config::default(),
            Arc::clone(&session),
            Arc::new(NoticeLog::new()),
            transport.clone(),
        );

        let started = tokio::time::Instant::now();
        let response = tokio::time::timeout(
            Duration::from_secs(600),
            gateway.execute(ApiRequest::get(["posts"])),
        )
        .await
        .expect("request should not hang on the identity provider")
        .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert!(started.elapsed() <= Duration::from_secs(15));
        assert!(session.is_authenticated());
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_failure_stage_passes_accepted_status() {
        let log = NoticeLog::new();
        let gateway = Gateway::builder(Canned::new(StatusCode::CONFLICT, "{}"))
            .stage(FailureStage::new(signed_in(None), Arc::new(log.clone())))
            .build();

        let response = gateway
            .execute(ApiRequest::post(["users"]).accept_status(StatusCode::CONFLICT))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert!(log.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stage_invalidates_on_403() {
        let log = NoticeLog::new();
        let session = signed_in(Some("tok"));
        let gateway = Gateway::builder(Canned::new(StatusCode::FORBIDDEN, "{}"))
            .stage(FailureStage::new(Arc::clone(&session), Arc::new(log.clone())))
            .build();

        let err = gateway.execute(ApiRequest::get(["posts"])).await.unwrap_err();

        assert_eq!(err, ApiError::SessionExpired { status: 403 });
        assert!(!session.is_authenticated());
        let notices = log.snapshot();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Blocking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_network_failure() {
        let transport = Arc::new(Canned {
            status: StatusCode::OK,
            body: "{}",
            delay: Some(Duration::from_secs(60)),
            seen: Mutex::new(Vec::new()),
        });
        let gateway = Gateway::builder(transport)
            .stage(TimeoutStage::new(Duration::from_secs(15)))
            .build();

        let err = gateway.execute(ApiRequest::get(["posts"])).await.unwrap_err();
        assert_eq!(err, ApiError::network("request timed out after 15s"));
    }

    #[tokio::test]
    async fn test_trace_stage_adds_request_id() {
        let transport = Canned::new(StatusCode::OK, "{}");
        let gateway = Gateway::builder(transport.clone()).stage(TraceStage).build();

        gateway.execute(ApiRequest::get(["tags"])).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let id = seen[0].headers[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
