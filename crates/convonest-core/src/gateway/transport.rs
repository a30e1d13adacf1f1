use anyhow::{Context, Result};
use url::Url;

use super::{ApiRequest, ApiResponse, StageFuture, Transport, USER_AGENT};
use crate::error::ApiError;

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    base: Url,
}

impl ReqwestTransport {
    /// # Errors
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid API base URL: {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry paths: {base_url}");
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, base })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::network(format!("cannot route {}", request.path())))?
            .pop_if_empty()
            .extend(&request.segments);
        Ok(url)
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: ApiRequest) -> StageFuture<'_> {
        Box::pin(async move {
            let url = self.url_for(&request)?;
            let mut builder = self
                .http
                .request(request.method, url)
                .headers(request.headers);
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| ApiError::network(describe(&e)))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| ApiError::network(describe(&e)))?;
            Ok(ApiResponse { status, body })
        })
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_connect() {
        "connection failed".to_string()
    } else if error.is_timeout() {
        "request timed out".to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_are_encoded_onto_base() {
        let transport = ReqwestTransport::new("http://localhost:5000/api/").unwrap();
        let request = ApiRequest::get(["users", "email", "a b@x.com"]);
        let url = transport.url_for(&request).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/users/email/a%20b@x.com");
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(ReqwestTransport::new("not a url").is_err());
        assert!(ReqwestTransport::new("mailto:a@x.com").is_err());
    }
}
