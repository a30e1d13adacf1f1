//! Identity provider: account sign-in, sign-up and bearer tokens.
//!
//! `RestIdentityProvider` speaks the Identity Toolkit REST dialect
//! (`accounts:signInWithPassword`, `accounts:signUp`, `accounts:update`,
//! `accounts:signInWithIdp` and the secure-token refresh endpoint). It keeps
//! one signed-in account, like a browser SDK would, in a `CredentialStore`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use convonest_types::{CredentialProvider, Principal};
use serde::Deserialize;
use serde_json::{Value, json};

use super::cache::{CredentialStore, StoredSession, expiry_from_now};
use crate::config::IdentityConfig;
use crate::gateway::USER_AGENT;
use crate::logging::mask_token;

/// Boxed future returned by identity provider operations.
pub type IdentityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, IdentityError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The provider refused the request (bad password, duplicate email, ...).
    #[error("{0}")]
    Rejected(String),
    #[error("Identity provider unreachable: {0}")]
    Network(String),
    #[error("No signed-in account")]
    NotSignedIn,
    #[error("Identity provider is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("{0}")]
    Storage(String),
    #[error("Invalid identity provider response: {0}")]
    InvalidResponse(String),
}

/// A short-lived bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// Milliseconds since epoch.
    pub expires: u64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &mask_token(&self.token))
            .field("expires", &self.expires)
            .finish()
    }
}

/// New-account details.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub photo_url: Option<String>,
}

/// Third-party identity provider holding at most one signed-in account.
pub trait IdentityProvider: Send + Sync {
    fn sign_in<'a>(&'a self, email: &'a str, password: &'a str) -> IdentityFuture<'a, Principal>;

    /// Exchanges a Google ID token for a session.
    fn sign_in_with_google<'a>(&'a self, google_id_token: &'a str)
    -> IdentityFuture<'a, Principal>;

    /// Creates the account, sets its display profile and signs it in.
    fn sign_up<'a>(&'a self, registration: &'a Registration) -> IdentityFuture<'a, Principal>;

    /// Returns the cached token, refreshing over the network only once it has expired.
    fn id_token(&self) -> IdentityFuture<'_, Credential>;

    /// The account remembered from a previous run, if any.
    fn restore(&self) -> Option<Principal>;

    /// Forgets the signed-in account.
    ///
    /// # Errors
    /// Returns an error if persisted credentials cannot be removed.
    fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Identity Toolkit REST client.
pub struct RestIdentityProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    auth_url: String,
    token_url: String,
    store: CredentialStore,
    refresh: tokio::sync::Mutex<()>,
}

impl RestIdentityProvider {
    pub fn new(config: &IdentityConfig, store: CredentialStore) -> Self {
        Self {
            http: http_client(None),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.trim_end_matches('/').to_string(),
            store,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Bounds every identity provider call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = http_client(Some(timeout));
        self
    }

    fn api_key(&self) -> Result<&str, IdentityError> {
        self.api_key.as_deref().ok_or(IdentityError::NotConfigured(
            "set api_key in [identity] or CONVONEST_IDENTITY_API_KEY",
        ))
    }

    async fn accounts_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, IdentityError> {
        let url = format!("{}/v1/accounts:{method}", self.auth_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key()?)])
            .json(body)
            .send()
            .await
            .map_err(|e| IdentityError::Network(e.to_string()))?;
        decode_response(response).await
    }

    async fn refresh_session(&self, stored: StoredSession) -> Result<Credential, IdentityError> {
        let url = format!("{}/v1/token", self.token_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key()?)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", stored.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IdentityError::Network(e.to_string()))?;

        let refreshed: RefreshResponse = decode_response(response).await?;
        let expires = expiry_from_now(parse_expires_in(refreshed.expires_in.as_ref()));
        let credential = Credential {
            token: refreshed.id_token.clone(),
            expires,
        };
        self.store.set(StoredSession {
            principal: stored.principal,
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            expires,
        })?;
        tracing::debug!(token = %mask_token(&credential.token), "Refreshed id token");
        Ok(credential)
    }

    fn remember(
        &self,
        account: AccountResponse,
        provider: CredentialProvider,
        fallback_email: &str,
    ) -> Result<Principal, IdentityError> {
        let id_token = account
            .id_token
            .ok_or_else(|| IdentityError::InvalidResponse("missing idToken".to_string()))?;
        let refresh_token = account
            .refresh_token
            .ok_or_else(|| IdentityError::InvalidResponse("missing refreshToken".to_string()))?;
        let principal = Principal {
            identifier: account
                .email
                .filter(|email| !email.is_empty())
                .unwrap_or_else(|| fallback_email.to_string()),
            uid: account.local_id,
            display_name: account.display_name.filter(|name| !name.is_empty()),
            photo_url: account
                .photo_url
                .or(account.profile_picture)
                .filter(|url| !url.is_empty()),
            provider,
        };
        self.store.set(StoredSession {
            principal: principal.clone(),
            id_token,
            refresh_token,
            expires: expiry_from_now(parse_expires_in(account.expires_in.as_ref())),
        })?;
        Ok(principal)
    }
}

impl IdentityProvider for RestIdentityProvider {
    fn sign_in<'a>(&'a self, email: &'a str, password: &'a str) -> IdentityFuture<'a, Principal> {
        Box::pin(async move {
            let account: AccountResponse = self
                .accounts_call(
                    "signInWithPassword",
                    &json!({
                        "email": email,
                        "password": password,
                        "returnSecureToken": true,
                    }),
                )
                .await?;
            self.remember(account, CredentialProvider::Password, email)
        })
    }

    fn sign_in_with_google<'a>(
        &'a self,
        google_id_token: &'a str,
    ) -> IdentityFuture<'a, Principal> {
        Box::pin(async move {
            let post_body = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("id_token", google_id_token)
                .append_pair("providerId", "google.com")
                .finish();
            let account: AccountResponse = self
                .accounts_call(
                    "signInWithIdp",
                    &json!({
                        "postBody": post_body,
                        "requestUri": "http://localhost",
                        "returnSecureToken": true,
                        "returnIdpCredential": true,
                    }),
                )
                .await?;
            self.remember(account, CredentialProvider::Google, "")
        })
    }

    fn sign_up<'a>(&'a self, registration: &'a Registration) -> IdentityFuture<'a, Principal> {
        Box::pin(async move {
            let created: AccountResponse = self
                .accounts_call(
                    "signUp",
                    &json!({
                        "email": registration.email,
                        "password": registration.password,
                        "returnSecureToken": true,
                    }),
                )
                .await?;
            let id_token = created
                .id_token
                .clone()
                .filter(|token| !token.is_empty())
                .ok_or_else(|| IdentityError::InvalidResponse("missing idToken".to_string()))?;

            let mut profile = json!({
                "idToken": id_token,
                "displayName": registration.name,
                "returnSecureToken": true,
            });
            if let Some(photo) = &registration.photo_url {
                profile["photoUrl"] = json!(photo);
            }
            let updated: AccountResponse = self.accounts_call("update", &profile).await?;

            // `accounts:update` may omit tokens; keep the ones from sign-up.
            let account = AccountResponse {
                local_id: created.local_id,
                email: updated.email.or(created.email),
                display_name: updated.display_name.or(Some(registration.name.clone())),
                photo_url: updated.photo_url.or_else(|| registration.photo_url.clone()),
                profile_picture: None,
                id_token: updated.id_token.or(created.id_token),
                refresh_token: updated.refresh_token.or(created.refresh_token),
                expires_in: updated.expires_in.or(created.expires_in),
            };
            self.remember(account, CredentialProvider::Password, &registration.email)
        })
    }

    fn id_token(&self) -> IdentityFuture<'_, Credential> {
        Box::pin(async move {
            let stored = self.store.get().ok_or(IdentityError::NotSignedIn)?;
            if !stored.is_expired() {
                return Ok(Credential {
                    token: stored.id_token,
                    expires: stored.expires,
                });
            }

            // One refresh at a time; whoever waited re-checks the cache.
            let _guard = self.refresh.lock().await;
            let stored = self.store.get().ok_or(IdentityError::NotSignedIn)?;
            if !stored.is_expired() {
                return Ok(Credential {
                    token: stored.id_token,
                    expires: stored.expires,
                });
            }
            self.refresh_session(stored).await
        })
    }

    fn restore(&self) -> Option<Principal> {
        self.store.get().map(|stored| stored.principal)
    }

    fn sign_out(&self) -> Result<(), IdentityError> {
        self.store.clear().map(|_| ())
    }
}

fn http_client(timeout: Option<Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    #[serde(default)]
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    profile_picture: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

/// `expiresIn` arrives as a string of seconds ("3600"); accept numbers too.
fn parse_expires_in(value: Option<&Value>) -> u64 {
    const DEFAULT_EXPIRES_IN: u64 = 3600;
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_EXPIRES_IN),
        _ => DEFAULT_EXPIRES_IN,
    }
}

async fn decode_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, IdentityError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| IdentityError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(IdentityError::Rejected(provider_error_message(status, &body)));
    }

    serde_json::from_slice(&body).map_err(|e| IdentityError::InvalidResponse(e.to_string()))
}

/// Turns `{"error":{"message":"INVALID_PASSWORD"}}` into something readable.
fn provider_error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    let code = serde_json::from_slice::<Value>(body).ok().and_then(|json| {
        json.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let Some(code) = code else {
        return format!("Identity provider error (HTTP {status})");
    };

    let head = code.split(':').next().unwrap_or(&code).trim();
    match head {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "Invalid email or password".to_string()
        }
        "EMAIL_EXISTS" => "An account with this email already exists".to_string(),
        "USER_DISABLED" => "This account has been disabled".to_string(),
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "USER_NOT_FOUND" => {
            "Stored login is no longer valid; please log in again".to_string()
        }
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts; try again later".to_string(),
        _ => code,
    }
}
