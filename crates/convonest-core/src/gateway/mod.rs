//! Authenticated request gateway.
//!
//! Every backend call goes through one ordered chain of [`Stage`]s that ends
//! in a [`Transport`]. The standard chain, outermost first:
//!
//! ```text
//! trace → failures (notices, session teardown) → bearer → timeout → transport
//! ```
//!
//! The transport returns any HTTP response as `Ok`; error statuses become
//! `ApiError`s in the failure stage, so stages below it see raw responses.

mod stages;
mod transport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
pub use stages::{BearerStage, FailureStage, TimeoutStage, TraceStage};
use tokio_util::sync::CancellationToken;
pub use transport::ReqwestTransport;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::notice::NoticeSink;
use crate::session::SessionStore;

pub const USER_AGENT: &str = concat!("convonest/", env!("CARGO_PKG_VERSION"));

/// Boxed future returned by stages and transports.
pub type StageFuture<'a> = Pin<Box<dyn Future<Output = ApiResult<ApiResponse>> + Send + 'a>>;

/// An outbound backend call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Raw path segments; the transport encodes them.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Error statuses the call site treats as success.
    pub accept_statuses: Vec<StatusCode>,
    pub cancel: Option<CancellationToken>,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            accept_statuses: Vec::new(),
            cancel: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments)
    }

    pub fn patch<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::PATCH, segments)
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn accept_status(mut self, status: StatusCode) -> Self {
        self.accept_statuses.push(status);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Display form of the path, for logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn accepts(&self, status: StatusCode) -> bool {
        status.is_success() || self.accept_statuses.contains(&status)
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decodes the body as JSON.
    ///
    /// # Errors
    /// Returns `InvalidResponse` if the body does not decode into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("HTTP {}: {e}", self.status.as_u16()))
        })
    }
}

/// One link of the request chain.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, request: ApiRequest, next: Next<'a>) -> StageFuture<'a>;
}

/// Sends a request and returns whatever HTTP response came back.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> StageFuture<'_>;
}

/// The remainder of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub fn run(self, request: ApiRequest) -> StageFuture<'a> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(
                request,
                Next {
                    stages: rest,
                    transport: self.transport,
                },
            ),
            None => self.transport.send(request),
        }
    }
}

pub struct Gateway {
    stages: Vec<Arc<dyn Stage>>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|stage| stage.name()).collect();
        f.debug_struct("Gateway").field("stages", &names).finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn builder(transport: Arc<dyn Transport>) -> GatewayBuilder {
        GatewayBuilder {
            stages: Vec::new(),
            transport,
        }
    }

    /// The standard chain for a configured client.
    pub fn standard(
        config: &Config,
        session: Arc<SessionStore>,
        notices: Arc<dyn NoticeSink>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let timeout = config.request_timeout();
        let mut bearer = BearerStage::new(Arc::clone(&session));
        if let Some(limit) = timeout {
            bearer = bearer.with_credential_wait(limit);
        }
        let mut builder = Gateway::builder(transport)
            .stage(TraceStage)
            .stage(FailureStage::new(session, notices))
            .stage(bearer);
        if let Some(limit) = timeout {
            builder = builder.stage(TimeoutStage::new(limit));
        }
        builder.build()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs the request through the chain.
    ///
    /// A request carrying a cancelled token resolves to `Cancelled` without
    /// producing a notice.
    ///
    /// # Errors
    /// Returns the classified failure after notices have been raised.
    pub async fn execute(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let next = Next {
            stages: &self.stages,
            transport: self.transport.as_ref(),
        };
        match request.cancel.clone() {
            Some(token) => {
                let path = request.path();
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        tracing::debug!(%path, "Request cancelled");
                        Err(ApiError::Cancelled)
                    }
                    result = next.run(request) => result,
                }
            }
            None => next.run(request).await,
        }
    }

    /// Runs the request and decodes a JSON body.
    ///
    /// # Errors
    /// Same as [`Gateway::execute`], plus `InvalidResponse` for bad bodies.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        self.execute(request).await?.json()
    }
}

pub struct GatewayBuilder {
    stages: Vec<Arc<dyn Stage>>,
    transport: Arc<dyn Transport>,
}

impl GatewayBuilder {
    /// Appends a stage; earlier stages wrap later ones.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> Gateway {
        Gateway {
            stages: self.stages,
            transport: self.transport,
        }
    }
}

/// Keeps the duration readable in error messages ("15s", "250ms").
pub(crate) fn describe_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Transport that records what reached it and answers with a fixed status.
    struct Canned {
        status: StatusCode,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Transport for Canned {
        fn send(&self, request: ApiRequest) -> StageFuture<'_> {
            self.seen.lock().unwrap().push(request);
            let status = self.status;
            Box::pin(async move {
                Ok(ApiResponse {
                    status,
                    body: Bytes::from_static(b"{\"ok\":true}"),
                })
            })
        }
    }

    /// Stage that tags the request so ordering can be observed.
    struct Tag(&'static str);

    impl Stage for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn handle<'a>(&'a self, mut request: ApiRequest, next: Next<'a>) -> StageFuture<'a> {
            request.query.push(("stage".to_string(), self.0.to_string()));
            next.run(request)
        }
    }

    fn canned(status: StatusCode) -> Arc<Canned> {
        Arc::new(Canned {
            status,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_request_path_and_acceptance() {
        let request = ApiRequest::post(["users"]).accept_status(StatusCode::CONFLICT);
        assert_eq!(request.path(), "/users");
        assert!(request.accepts(StatusCode::CREATED));
        assert!(request.accepts(StatusCode::CONFLICT));
        assert!(!request.accepts(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let transport = canned(StatusCode::OK);
        let gateway = Gateway::builder(transport.clone())
            .stage(Tag("outer"))
            .stage(Tag("inner"))
            .build();

        assert_eq!(gateway.stage_names(), vec!["outer", "inner"]);
        gateway.execute(ApiRequest::get(["posts"])).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let order: Vec<&str> = seen[0].query.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(order, vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_cancelled_request_resolves_to_cancelled() {
        let gateway = Gateway::builder(canned(StatusCode::OK)).build();
        let token = CancellationToken::new();
        token.cancel();

        let err = gateway
            .execute(ApiRequest::get(["posts"]).with_cancel(token))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Cancelled);
    }

    #[tokio::test]
    async fn test_fetch_reports_undecodable_body() {
        let gateway = Gateway::builder(canned(StatusCode::OK)).build();
        let err = gateway
            .fetch::<Vec<String>>(ApiRequest::get(["tags"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(Duration::from_secs(15)), "15s");
        assert_eq!(describe_duration(Duration::from_millis(250)), "250ms");
    }
}
