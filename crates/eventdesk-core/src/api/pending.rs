use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;

use super::ApiError;
use crate::auth::AuthError;

/// One outbound call, kept so it can be sent again after a token refresh.
#[derive(Debug)]
pub struct PendingRequest {
    template: Request,
    retried: bool,
}

impl PendingRequest {
    /// Streaming bodies cannot be sent twice and are refused up front.
    pub fn new(request: Request) -> Result<Self, ApiError> {
        if request.try_clone().is_none() {
            return Err(ApiError::UnreplayableRequest);
        }
        Ok(Self {
            template: request,
            retried: false,
        })
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Claim the single retry this request is allowed. Returns `false` if it
    /// was already used.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    /// Build the next attempt, authorized with `access_token` if given
    pub fn attempt(&self, access_token: Option<&str>) -> Result<Request, ApiError> {
        let mut request = self
            .template
            .try_clone()
            .ok_or(ApiError::UnreplayableRequest)?;

        match access_token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                    AuthError::InvalidResponse("access token is not a valid header value".to_string())
                })?;
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            None => {
                request.headers_mut().remove(AUTHORIZATION);
            }
        }
        Ok(request)
    }

    pub fn method(&self) -> &reqwest::Method {
        self.template.method()
    }

    pub fn url(&self) -> &reqwest::Url {
        self.template.url()
    }
}
