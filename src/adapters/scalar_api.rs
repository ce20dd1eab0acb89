//! Integration manager ("scalar") REST surface.
//!
//! Token exchange and validation against the manager's API endpoint.
//! The scalar protocol authenticates via a `scalar_token` query
//! parameter rather than a bearer header.

use serde::Deserialize;
use std::sync::Arc;

use crate::acquisition::TokenService;
use crate::error::TrustError;
use crate::models::OpenIdToken;
use crate::traits::http::{Headers, HttpClient, Response};

/// Scalar API version sent with every call.
const SCALAR_API_VERSION: &str = "1.1";

/// Typed client for an integration manager's API.
#[derive(Clone)]
pub struct ScalarApiClient {
    http: Arc<dyn HttpClient>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScalarRegisterResponse {
    scalar_token: String,
}

impl ScalarApiClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    fn fail(response: &Response) -> TrustError {
        let body: ErrorBody = response.json().unwrap_or_default();
        let message = body
            .error
            .unwrap_or_else(|| response.text().unwrap_or_default());
        TrustError::from_status(response.status, body.errcode.as_deref(), message)
    }

    /// Exchange an OpenID assertion for a scalar token.
    pub async fn register(
        &self,
        api_url: &str,
        openid: &OpenIdToken,
    ) -> Result<String, TrustError> {
        let url = format!("{}/register?v={}", api_url, SCALAR_API_VERSION);
        let body = serde_json::to_string(openid)?;
        let response = self.http.post(&url, &body, &Headers::new()).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        let registered: ScalarRegisterResponse = response.json()?;
        Ok(registered.scalar_token)
    }

    /// Check that `token` is still accepted by the manager.
    pub async fn validate(&self, api_url: &str, token: &str) -> Result<(), TrustError> {
        let url = format!(
            "{}/account?v={}&scalar_token={}",
            api_url,
            SCALAR_API_VERSION,
            urlencoding::encode(token)
        );
        let response = self.http.get(&url, &Headers::new()).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenService for ScalarApiClient {
    async fn register_token(
        &self,
        base_url: &str,
        openid: &OpenIdToken,
    ) -> Result<String, TrustError> {
        self.register(base_url, openid).await
    }

    async fn validate_token(&self, base_url: &str, token: &str) -> Result<(), TrustError> {
        self.validate(base_url, token).await
    }
}
