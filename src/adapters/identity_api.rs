//! Identity service v2 REST surface.
//!
//! Thin typed client over the [`HttpClient`] executor for the identity
//! server's account, lookup, and validation endpoints. Only the
//! request/response shapes live here; retry policy belongs to
//! [`crate::acquisition`].

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::acquisition::TokenService;
use crate::error::TrustError;
use crate::models::{FoundThreePid, Medium, OpenIdToken, ThreePid};
use crate::traits::http::{bearer_headers, Headers, HttpClient, Response};

/// Typed client for the identity service v2 API.
#[derive(Clone)]
pub struct IdentityApiClient {
    http: Arc<dyn HttpClient>,
}

/// `{errcode, error}` body carried by identity service failures.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RequestTokenResponse {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    mappings: std::collections::HashMap<String, String>,
}

impl IdentityApiClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    fn v2(base_url: &str, path: &str) -> String {
        format!("{}/_matrix/identity/v2{}", base_url, path)
    }

    /// Map a non-2xx response into the error taxonomy, probing the body
    /// for an application error code.
    fn fail(response: &Response) -> TrustError {
        let body: ErrorBody = response.json().unwrap_or_default();
        let message = body
            .error
            .unwrap_or_else(|| response.text().unwrap_or_default());
        TrustError::from_status(response.status, body.errcode.as_deref(), message)
    }

    /// Exchange an OpenID assertion for an identity service token.
    pub async fn register(
        &self,
        base_url: &str,
        openid: &OpenIdToken,
    ) -> Result<String, TrustError> {
        let url = Self::v2(base_url, "/account/register");
        let body = serde_json::to_string(openid)?;
        let response = self.http.post(&url, &body, &Headers::new()).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        let registered: RegisterResponse = response.json()?;
        Ok(registered.token)
    }

    /// Check that `token` is still accepted by the identity server.
    pub async fn account(&self, base_url: &str, token: &str) -> Result<(), TrustError> {
        let url = Self::v2(base_url, "/account");
        let response = self.http.get(&url, &bearer_headers(token)).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        Ok(())
    }

    /// Invalidate `token` on the identity server.
    pub async fn logout(&self, base_url: &str, token: &str) -> Result<(), TrustError> {
        let url = Self::v2(base_url, "/account/logout");
        let response = self.http.post(&url, "{}", &bearer_headers(token)).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        Ok(())
    }

    /// Bulk-resolve three-pids to user ids.
    ///
    /// Uses the `none` lookup algorithm: addresses travel as
    /// `"<address> <medium>"` pairs and come back as mapping keys.
    pub async fn lookup(
        &self,
        base_url: &str,
        token: &str,
        three_pids: &[ThreePid],
    ) -> Result<Vec<FoundThreePid>, TrustError> {
        let addresses: Vec<String> = three_pids
            .iter()
            .map(|pid| format!("{} {}", pid.address.to_lowercase(), pid.medium.as_str()))
            .collect();
        let body = json!({
            "algorithm": "none",
            "pepper": "",
            "addresses": addresses,
        })
        .to_string();

        let url = Self::v2(base_url, "/lookup");
        let response = self.http.post(&url, &body, &bearer_headers(token)).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        let lookup: LookupResponse = response.json()?;

        let mut found = Vec::new();
        for (address, pid) in three_pids.iter().map(|p| {
            (
                format!("{} {}", p.address.to_lowercase(), p.medium.as_str()),
                p,
            )
        }) {
            if let Some(user_id) = lookup.mappings.get(&address) {
                found.push(FoundThreePid {
                    three_pid: pid.clone(),
                    user_id: user_id.clone(),
                });
            }
        }
        debug!(
            requested = three_pids.len(),
            matched = found.len(),
            "bulk lookup complete"
        );
        Ok(found)
    }

    /// Start validation of a three-pid, returning the session id.
    pub async fn request_token(
        &self,
        base_url: &str,
        token: &str,
        three_pid: &ThreePid,
        client_secret: &str,
        send_attempt: u32,
    ) -> Result<String, TrustError> {
        let body = match three_pid.medium {
            Medium::Email => json!({
                "client_secret": client_secret,
                "email": three_pid.address,
                "send_attempt": send_attempt,
            }),
            // International-format number; the country field is only
            // needed for national-format input.
            Medium::Msisdn => json!({
                "client_secret": client_secret,
                "phone_number": three_pid.address,
                "country": "",
                "send_attempt": send_attempt,
            }),
        }
        .to_string();

        let url = Self::v2(
            base_url,
            &format!("/validate/{}/requestToken", three_pid.medium.as_str()),
        );
        let response = self.http.post(&url, &body, &bearer_headers(token)).await?;
        if !response.is_success() {
            return Err(Self::fail(&response));
        }
        let requested: RequestTokenResponse = response.json()?;
        Ok(requested.sid)
    }

    /// Reachability probe. Failures map to `false`, not errors.
    pub async fn ping(&self, base_url: &str) -> bool {
        let url = Self::v2(base_url, "");
        match self.http.get(&url, &Headers::new()).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!("identity ping failed: {}", e);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl TokenService for IdentityApiClient {
    async fn register_token(
        &self,
        base_url: &str,
        openid: &OpenIdToken,
    ) -> Result<String, TrustError> {
        self.register(base_url, openid).await
    }

    async fn validate_token(&self, base_url: &str, token: &str) -> Result<(), TrustError> {
        self.account(base_url, token).await
    }
}
