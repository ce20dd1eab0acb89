//! Token acquisition and transparent refresh.
//!
//! One instance of [`TokenAcquisition`] exists per (server, purpose)
//! pair: identity-server tokens and widget scalar tokens are two
//! independent instances of the same pattern. The lifecycle per pair is
//! `NoToken -> Acquiring -> Valid -> Invalid (-> Acquiring)`.
//!
//! Auth-class failures are resolved by clearing the cached token and
//! re-acquiring exactly once, behind an explicit retry flag rather than
//! recursion, so a misbehaving server cannot cause a retry storm.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::TrustError;
use crate::models::OpenIdToken;
use crate::traits::openid::OpenIdIssuer;

/// Lifecycle state of one (server, purpose) token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token cached; nothing attempted yet (or the last acquisition
    /// failed).
    NoToken,
    /// OpenID exchange and service registration in flight.
    Acquiring,
    /// A token is cached and has not been rejected.
    Valid,
    /// The service rejected the token; it has been cleared.
    Invalid,
}

/// The remote side of the token exchange: a service that accepts an
/// OpenID assertion and issues its own token, and can validate one.
#[async_trait::async_trait]
pub trait TokenService: Send + Sync {
    /// Exchange an OpenID assertion for a service token.
    async fn register_token(
        &self,
        base_url: &str,
        openid: &OpenIdToken,
    ) -> Result<String, TrustError>;

    /// Check a token against the service's validation endpoint.
    async fn validate_token(&self, base_url: &str, token: &str) -> Result<(), TrustError>;
}

/// The local side: where the token and its server URL live.
///
/// Implemented over [`crate::store::TokenStore`] by the identity and
/// integrations services.
pub trait TokenSlot: Send + Sync {
    /// Base URL of the target service, if one is configured.
    fn server_url(&self) -> Result<Option<String>, TrustError>;

    /// Currently cached token, if any.
    fn token(&self) -> Result<Option<String>, TrustError>;

    /// Persist or clear the cached token.
    fn set_token(&self, token: Option<&str>) -> Result<(), TrustError>;

    /// The terminal error for "no server configured" in this purpose.
    fn missing_server_error(&self) -> TrustError;
}

/// Orchestrates OpenID retrieval, service registration, and one-shot
/// refresh on auth failure.
pub struct TokenAcquisition {
    issuer: Arc<dyn OpenIdIssuer>,
    service: Arc<dyn TokenService>,
    slot: Arc<dyn TokenSlot>,
    state: Mutex<TokenState>,
}

impl TokenAcquisition {
    pub fn new(
        issuer: Arc<dyn OpenIdIssuer>,
        service: Arc<dyn TokenService>,
        slot: Arc<dyn TokenSlot>,
    ) -> Self {
        Self {
            issuer,
            service,
            slot,
            state: Mutex::new(TokenState::NoToken),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TokenState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TokenState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != state {
            debug!(from = ?*guard, to = ?state, "token state transition");
            *guard = state;
        }
    }

    /// Clear the cached token after a rejection. The cleared token is
    /// indistinguishable from "never fetched".
    pub fn invalidate(&self) -> Result<(), TrustError> {
        self.set_state(TokenState::Invalid);
        self.slot.set_token(None)
    }

    /// Return the cached token, acquiring a fresh one if none exists.
    ///
    /// Fails with the slot's missing-server error when no server URL is
    /// configured.
    pub async fn ensure_token(&self) -> Result<String, TrustError> {
        let server_url = self
            .slot
            .server_url()?
            .ok_or_else(|| self.slot.missing_server_error())?;

        if let Some(token) = self.slot.token()? {
            self.set_state(TokenState::Valid);
            return Ok(token);
        }

        self.set_state(TokenState::Acquiring);
        let acquired: Result<String, TrustError> = async {
            let openid = self.issuer.get_open_id_token().await?;
            let token = self.service.register_token(&server_url, &openid).await?;
            self.slot.set_token(Some(&token))?;
            Ok(token)
        }
        .await;

        match acquired {
            Ok(token) => {
                info!(server = %server_url, "acquired new service token");
                self.set_state(TokenState::Valid);
                Ok(token)
            }
            Err(e) => {
                self.set_state(TokenState::NoToken);
                Err(e)
            }
        }
    }

    /// Validate the current token against the service, refreshing it
    /// once on an auth-class rejection. A second rejection is surfaced.
    pub async fn validate(&self) -> Result<String, TrustError> {
        let server_url = self
            .slot
            .server_url()?
            .ok_or_else(|| self.slot.missing_server_error())?;
        let service = Arc::clone(&self.service);

        self.run_authenticated(move |token| {
            let service = Arc::clone(&service);
            let server_url = server_url.clone();
            async move {
                service.validate_token(&server_url, &token).await?;
                Ok(token)
            }
        })
        .await
    }

    /// Run `operation` with a valid token, retrying the whole operation
    /// exactly once after a token refresh if it fails with an auth-class
    /// error. Terminal errors (terms not signed, missing server) are
    /// surfaced without any retry.
    pub async fn run_authenticated<T, F, Fut>(&self, mut operation: F) -> Result<T, TrustError>
    where
        T: Send,
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = Result<T, TrustError>> + Send,
    {
        let mut retried = false;
        loop {
            let token = self.ensure_token().await?;
            match operation(token).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_auth_failure() => {
                    self.invalidate()?;
                    if retried {
                        warn!("refreshed token was rejected again, surfacing failure");
                        return Err(e);
                    }
                    debug!("service rejected token, refreshing once");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::openid::MockOpenIdIssuer;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Slot holding its state in memory.
    struct FakeSlot {
        url: Option<String>,
        token: Mutex<Option<String>>,
    }

    impl FakeSlot {
        fn new(url: Option<&str>, token: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                url: url.map(str::to_string),
                token: Mutex::new(token.map(str::to_string)),
            })
        }
    }

    impl TokenSlot for FakeSlot {
        fn server_url(&self) -> Result<Option<String>, TrustError> {
            Ok(self.url.clone())
        }

        fn token(&self) -> Result<Option<String>, TrustError> {
            Ok(self.token.lock().unwrap().clone())
        }

        fn set_token(&self, token: Option<&str>) -> Result<(), TrustError> {
            *self.token.lock().unwrap() = token.map(str::to_string);
            Ok(())
        }

        fn missing_server_error(&self) -> TrustError {
            TrustError::NoIdentityServerConfigured
        }
    }

    /// Service with scripted validation outcomes and counted
    /// registrations.
    struct FakeService {
        registers: AtomicUsize,
        validations: Mutex<VecDeque<Result<(), TrustError>>>,
    }

    impl FakeService {
        fn new(validations: Vec<Result<(), TrustError>>) -> Arc<Self> {
            Arc::new(Self {
                registers: AtomicUsize::new(0),
                validations: Mutex::new(validations.into()),
            })
        }

        fn register_count(&self) -> usize {
            self.registers.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenService for FakeService {
        async fn register_token(
            &self,
            _base_url: &str,
            _openid: &OpenIdToken,
        ) -> Result<String, TrustError> {
            let n = self.registers.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        }

        async fn validate_token(&self, _base_url: &str, _token: &str) -> Result<(), TrustError> {
            self.validations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }
    }

    fn acquisition(
        slot: Arc<FakeSlot>,
        service: Arc<FakeService>,
    ) -> (TokenAcquisition, Arc<MockOpenIdIssuer>) {
        let issuer = Arc::new(MockOpenIdIssuer::new());
        (
            TokenAcquisition::new(Arc::clone(&issuer) as _, service, slot),
            issuer,
        )
    }

    #[tokio::test]
    async fn test_ensure_returns_cached_token_without_issuer_call() {
        let slot = FakeSlot::new(Some("https://svc"), Some("cached"));
        let service = FakeService::new(vec![]);
        let (acq, issuer) = acquisition(slot, Arc::clone(&service));

        let token = acq.ensure_token().await.unwrap();
        assert_eq!(token, "cached");
        assert_eq!(issuer.calls(), 0);
        assert_eq!(service.register_count(), 0);
        assert_eq!(acq.state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn test_ensure_acquires_and_persists() {
        let slot = FakeSlot::new(Some("https://svc"), None);
        let service = FakeService::new(vec![]);
        let (acq, issuer) = acquisition(Arc::clone(&slot), Arc::clone(&service));

        let token = acq.ensure_token().await.unwrap();
        assert_eq!(token, "token-1");
        assert_eq!(issuer.calls(), 1);
        assert_eq!(slot.token().unwrap().as_deref(), Some("token-1"));
        assert_eq!(acq.state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn test_ensure_without_server_is_terminal() {
        let slot = FakeSlot::new(None, None);
        let service = FakeService::new(vec![]);
        let (acq, issuer) = acquisition(slot, service);

        let err = acq.ensure_token().await.unwrap_err();
        assert!(matches!(err, TrustError::NoIdentityServerConfigured));
        assert_eq!(issuer.calls(), 0);
        assert_eq!(acq.state(), TokenState::NoToken);
    }

    #[tokio::test]
    async fn test_issuer_failure_resets_to_no_token() {
        let slot = FakeSlot::new(Some("https://svc"), None);
        let service = FakeService::new(vec![]);
        let (acq, issuer) = acquisition(Arc::clone(&slot), service);
        issuer.set_fail(true);

        assert!(acq.ensure_token().await.is_err());
        assert_eq!(acq.state(), TokenState::NoToken);
        assert_eq!(slot.token().unwrap(), None);
    }

    #[tokio::test]
    async fn test_validate_refreshes_exactly_once_then_succeeds() {
        let slot = FakeSlot::new(Some("https://svc"), Some("stale"));
        let service = FakeService::new(vec![Err(TrustError::AuthTokenInvalid), Ok(())]);
        let (acq, issuer) = acquisition(Arc::clone(&slot), Arc::clone(&service));

        let token = acq.validate().await.unwrap();
        assert_eq!(token, "token-1");
        // Exactly one register call backs the refresh.
        assert_eq!(service.register_count(), 1);
        assert_eq!(issuer.calls(), 1);
        assert_eq!(slot.token().unwrap().as_deref(), Some("token-1"));
        assert_eq!(acq.state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn test_validate_does_not_loop_on_second_rejection() {
        let slot = FakeSlot::new(Some("https://svc"), Some("stale"));
        let service = FakeService::new(vec![
            Err(TrustError::AuthTokenInvalid),
            Err(TrustError::AuthTokenInvalid),
            Ok(()),
        ]);
        let (acq, _issuer) = acquisition(Arc::clone(&slot), Arc::clone(&service));

        let err = acq.validate().await.unwrap_err();
        assert!(err.is_auth_failure());
        // One refresh happened, then the second rejection surfaced; the
        // third scripted outcome is never consumed.
        assert_eq!(service.register_count(), 1);
        assert_eq!(service.validations.lock().unwrap().len(), 1);
        assert_eq!(slot.token().unwrap(), None);
        assert_eq!(acq.state(), TokenState::Invalid);
    }

    #[tokio::test]
    async fn test_run_authenticated_terms_not_signed_is_not_retried() {
        let slot = FakeSlot::new(Some("https://svc"), Some("tok"));
        let service = FakeService::new(vec![]);
        let (acq, issuer) = acquisition(Arc::clone(&slot), Arc::clone(&service));

        let calls = AtomicUsize::new(0);
        let err = acq
            .run_authenticated(|_token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TrustError::TermsNotSigned) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TrustError::TermsNotSigned));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.register_count(), 0);
        assert_eq!(issuer.calls(), 0);
        // The token was not cleared: terms are orthogonal to validity.
        assert_eq!(slot.token().unwrap().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_run_authenticated_generic_error_propagates_unchanged() {
        let slot = FakeSlot::new(Some("https://svc"), Some("tok"));
        let service = FakeService::new(vec![]);
        let (acq, _issuer) = acquisition(slot, service);

        let err = acq
            .run_authenticated(|_token| async {
                Err::<(), _>(TrustError::Server {
                    status: 502,
                    message: "bad gateway".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::Server { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_run_authenticated_retries_whole_operation_once() {
        let slot = FakeSlot::new(Some("https://svc"), Some("stale"));
        let service = FakeService::new(vec![]);
        let (acq, _issuer) = acquisition(Arc::clone(&slot), Arc::clone(&service));

        let calls = AtomicUsize::new(0);
        let result = acq
            .run_authenticated(|token| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(TrustError::AuthTokenInvalid)
                    } else {
                        Ok(token)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.register_count(), 1);
    }
}
