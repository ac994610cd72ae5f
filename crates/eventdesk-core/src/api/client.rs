//! API client for the event portal REST API.
//!
//! Every call goes through `ApiClient::execute`, which attaches the current
//! bearer token, starts a background refresh when the token is about to
//! expire, and on a 401 waits for a refreshed token and sends the request
//! once more. Callers only ever see a 401 that survived that retry.

use std::time::Duration;

use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, PendingRequest};
use crate::auth::{token, AuthManager};

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Authenticated API client.
/// Clone is cheap - reqwest::Client and AuthManager are both shared handles.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: AuthManager,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, auth: AuthManager) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, auth))
    }

    /// Share an existing connection pool
    pub fn with_client(client: Client, base_url: &str, auth: AuthManager) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start building a request against `path` under the API base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        self.execute(builder.build()?).await
    }

    /// Send a request with the session's credential.
    ///
    /// Same shape as `reqwest::Client::execute`: any status other than 401 is
    /// returned as a response. A 401 leads to exactly one retry with a
    /// refreshed token; a second 401 is `ApiError::Unauthorized`.
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        let mut pending = PendingRequest::new(request)?;

        let mut access_token = self.auth.credential().map(|c| c.access_token.clone());
        if let Some(ref token) = access_token {
            self.refresh_if_expiring(token);
        }

        loop {
            let response = self.dispatch(&pending, access_token.as_deref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if !pending.mark_retried() {
                warn!(method = %pending.method(), url = %pending.url(), "Still unauthorized after token refresh");
                return Err(ApiError::Unauthorized);
            }

            debug!(method = %pending.method(), url = %pending.url(), "Unauthorized, waiting for a refreshed token");
            let fresh = self
                .auth
                .coordinator()
                .refreshed_token(access_token.as_deref())
                .await?;
            access_token = Some(fresh);
        }
    }

    // Fire and forget; the current request goes out with the current token
    fn refresh_if_expiring(&self, access_token: &str) {
        let coordinator = self.auth.coordinator();
        if token::expires_within(access_token, self.auth.settings().refresh_window)
            && coordinator.refresh_ahead()
        {
            debug!("Access token close to expiry, refreshing in the background");
        }
    }

    async fn dispatch(
        &self,
        pending: &PendingRequest,
        access_token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let request = pending.attempt(access_token)?;
        debug!(
            method = %request.method(),
            url = %request.url(),
            retry = pending.retried(),
            "Sending request"
        );
        Ok(self.client.execute(request).await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().clone();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    // ===== JSON helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Self::read_json(Self::check_response(response).await?).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        Self::read_json(Self::check_response(response).await?).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::PUT, path).json(body)).await?;
        Self::read_json(Self::check_response(response).await?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.send(self.request(Method::DELETE, path)).await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
