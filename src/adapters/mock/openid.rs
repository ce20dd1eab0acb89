//! Mock OpenID issuer for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::TrustError;
use crate::models::OpenIdToken;
use crate::traits::openid::OpenIdIssuer;

/// Mock issuer handing out a fixed OpenID assertion.
#[derive(Clone)]
pub struct MockOpenIdIssuer {
    token: OpenIdToken,
    supports_binding: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockOpenIdIssuer {
    pub fn new() -> Self {
        Self {
            token: OpenIdToken {
                access_token: "openid-access".to_string(),
                token_type: "Bearer".to_string(),
                matrix_server_name: "example.com".to_string(),
                expires_in: 3600,
            },
            supports_binding: Arc::new(AtomicBool::new(true)),
            fail: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mark the home server as lacking the binding capability.
    pub fn set_supports_binding(&self, supports: bool) {
        self.supports_binding.store(supports, Ordering::SeqCst);
    }

    /// Make subsequent token requests fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of OpenID tokens requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockOpenIdIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpenIdIssuer for MockOpenIdIssuer {
    async fn get_open_id_token(&self) -> Result<OpenIdToken, TrustError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrustError::Server {
                status: 500,
                message: "openid issuance failed".to_string(),
            });
        }
        Ok(self.token.clone())
    }

    fn supports_threepid_binding(&self) -> bool {
        self.supports_binding.load(Ordering::SeqCst)
    }
}
