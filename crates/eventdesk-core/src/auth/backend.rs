//! Client for the identity backend that issues and revokes credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AuthError, Credential};

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Exchange email and password for a new credential
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, AuthError>;

    /// Trade a refresh token for a new credential pair
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError>;

    /// Revoke a refresh token
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPairResponse {
    access_token: String,
    refresh_token: String,
}

/// `IdentityBackend` over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpIdentityBackend {
    client: Client,
    base_url: String,
}

impl HttpIdentityBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, AuthError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, path, "Identity backend returned an error status");
            Err(AuthError::rejected(status, &body))
        }
    }

    async fn token_pair(response: reqwest::Response) -> Result<Credential, AuthError> {
        let text = response.text().await?;
        let pair: TokenPairResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::InvalidResponse(format!("token pair: {}", e)))?;
        let credential = Credential::new(pair.access_token, pair.refresh_token);
        if !credential.is_complete() {
            return Err(AuthError::InvalidResponse("token pair: empty token".to_string()));
        }
        Ok(credential)
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        let response = self
            .post("/auth/login", &SignInRequest { email, password })
            .await?;
        Self::token_pair(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError> {
        let response = self
            .post("/auth/refresh", &RefreshTokenRequest { refresh_token })
            .await?;
        Self::token_pair(response).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.post("/auth/logout", &RefreshTokenRequest { refresh_token })
            .await?;
        Ok(())
    }
}
