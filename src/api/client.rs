//! Authenticated HTTP client for the Larder REST API.
//!
//! `ApiClient` wraps `reqwest` with the per-request authorization policy:
//! attach the current access token as a bearer credential, and on a 401
//! refresh the token and resend the original request exactly once. It also
//! implements the token endpoints (`/token`, `/token/verify`,
//! `/token/refresh`) that the session startup sequence consumes through
//! the `TokenService` trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::{CredentialPair, SessionManager, TokenService};

use super::ApiError;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TokenPairResponse {
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access: String,
}

/// API client for the Larder backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection
/// pooling, and the session handle is shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionManager>,
    /// Single-flight guard for refresh exchanges triggered by 401s.
    refresh_gate: Arc<Mutex<()>>,
    logout_on_retry_exhausted: bool,
}

impl ApiClient {
    /// Create a new API client bound to a session.
    pub fn new(
        base_url: impl Into<String>,
        session: Arc<SessionManager>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            refresh_gate: Arc::new(Mutex::new(())),
            logout_on_retry_exhausted: false,
        })
    }

    /// Tear down the session when a request still fails authorization
    /// after the refresh retry.
    ///
    /// Off by default: stale credentials stay in place and the consumer
    /// decides whether to redirect to login.
    pub fn logout_on_retry_exhausted(mut self, enabled: bool) -> Self {
        self.logout_on_retry_exhausted = enabled;
        self
    }

    /// The session this client reads tokens from.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange username and password for a fresh token pair.
    ///
    /// Failures propagate to the caller unchanged - the login form owns
    /// the error display. Establishing the session from the returned pair
    /// is a separate step; see [`ApiClient::login`].
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(self.url("token"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: TokenPairResponse = response.json().await?;
        Ok(CredentialPair {
            access: body.access,
            refresh: body.refresh,
        })
    }

    /// Authenticate and establish the session in one step.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let pair = self.authenticate(username, password).await?;
        self.session.login(pair);
        Ok(())
    }

    /// Send an authenticated GET and decode the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retried = false;

        loop {
            let mut request = self.client.get(&url);
            if let Some(access) = self.session.access_token() {
                request = request.bearer_auth(access);
            }
            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                self.handle_unauthorized(retried).await?;
                retried = true;
                continue;
            }

            let response = Self::check_response(response).await?;
            return response.json().await.map_err(ApiError::from);
        }
    }

    /// Send an authenticated POST and decode the JSON response.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retried = false;

        loop {
            let mut request = self.client.post(&url).json(body);
            if let Some(access) = self.session.access_token() {
                request = request.bearer_auth(access);
            }
            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                self.handle_unauthorized(retried).await?;
                retried = true;
                continue;
            }

            let response = Self::check_response(response).await?;
            return response.json().await.map_err(ApiError::from);
        }
    }

    /// Decide what to do with a 401. `Ok(())` means the token was
    /// refreshed and the caller should resend; any error ends the request.
    async fn handle_unauthorized(&self, already_retried: bool) -> Result<(), ApiError> {
        if !self.session.is_logged_in() {
            // Anonymous requests get no retry, there is nothing to refresh
            return Err(ApiError::Unauthorized);
        }
        if already_retried {
            debug!("Request unauthorized again after refresh retry");
            return Err(self.exhausted());
        }
        match self.refresh_session().await {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!(error = %err, "Refresh exchange failed, surfacing original 401");
                Err(self.exhausted())
            }
        }
    }

    fn exhausted(&self) -> ApiError {
        if self.logout_on_retry_exhausted {
            warn!("Authorization retry exhausted, logging out");
            self.session.logout();
        }
        ApiError::AuthRetryExhausted
    }

    /// Rotate the access token through the refresh endpoint.
    ///
    /// Concurrent 401s are coalesced: the task that wins the gate performs
    /// the exchange, later holders see the already-rotated token and skip
    /// their own round trip.
    async fn refresh_session(&self) -> Result<(), ApiError> {
        let stale = self.session.access_token();
        let _gate = self.refresh_gate.lock().await;

        if self.session.access_token() != stale {
            debug!("Access token already rotated by a concurrent refresh");
            return Ok(());
        }

        let refresh = self.session.refresh_token().ok_or(ApiError::Unauthorized)?;
        let new_access = TokenService::refresh(self, &refresh).await?;
        if let Err(err) = self.session.apply_refreshed_access(&new_access) {
            // Session was torn down while the exchange was in flight; do
            // not resurrect it with the rotated token
            warn!(error = %err, "Could not apply refreshed access token");
            return Err(ApiError::Unauthorized);
        }
        debug!("Access token refreshed after 401");
        Ok(())
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl TokenService for ApiClient {
    async fn verify(&self, access: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("token/verify"))
            .json(&serde_json::json!({ "token": access }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            debug!(status = %response.status(), "Access token failed verification");
            Err(ApiError::VerifyFailed)
        }
    }

    async fn refresh(&self, refresh: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url("token/refresh"))
            .json(&serde_json::json!({ "refresh": refresh }))
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "Refresh token rejected");
            return Err(ApiError::RefreshFailed);
        }

        let body: TokenRefreshResponse = response.json().await?;
        Ok(body.access)
    }
}
