//! Identity server operations: server selection, bulk lookup, and
//! three-pid binding lifecycle.
//!
//! The service owns the canonical [`IdentityServerConfig`] through the
//! [`TokenStore`], watches `m.identity_server` account data for remote
//! changes, and suppresses echoes of its own writes so a write that
//! round-trips through sync cannot loop back through the mutation path.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::{TokenAcquisition, TokenService, TokenSlot, TokenState};
use crate::adapters::identity_api::IdentityApiClient;
use crate::error::TrustError;
use crate::extractor;
use crate::models::{
    canonicalize_server_url, FoundThreePid, IdentityServerConfig, PendingBinding, ThreePid,
    ACCOUNT_DATA_IDENTITY_SERVER,
};
use crate::registry::ListenerRegistry;
use crate::store::TokenStore;
use crate::traits::account_data::AccountDataSource;
use crate::traits::http::HttpClient;
use crate::traits::openid::OpenIdIssuer;
use crate::watcher::{AccountDataWatcher, SlotHandler, TypedSlot};

/// Observer of identity server selection changes.
pub trait IdentityServerListener: Send + Sync {
    fn on_identity_server_changed(&self, url: Option<&str>);
}

/// [`TokenSlot`] over the store's identity config.
struct IdentityTokenSlot {
    store: Arc<TokenStore>,
}

impl TokenSlot for IdentityTokenSlot {
    fn server_url(&self) -> Result<Option<String>, TrustError> {
        self.store.identity_server_url()
    }

    fn token(&self) -> Result<Option<String>, TrustError> {
        self.store.identity_token()
    }

    fn set_token(&self, token: Option<&str>) -> Result<(), TrustError> {
        self.store.set_identity_token(token)
    }

    fn missing_server_error(&self) -> TrustError {
        TrustError::NoIdentityServerConfigured
    }
}

/// Identity server trust and token lifecycle for one session.
pub struct IdentityService {
    source: Arc<dyn AccountDataSource>,
    issuer: Arc<dyn OpenIdIssuer>,
    api: Arc<IdentityApiClient>,
    store: Arc<TokenStore>,
    acquisition: Arc<TokenAcquisition>,
    listeners: Arc<ListenerRegistry<dyn IdentityServerListener>>,
    watcher: AccountDataWatcher,
}

impl IdentityService {
    pub fn new(
        source: Arc<dyn AccountDataSource>,
        issuer: Arc<dyn OpenIdIssuer>,
        http: Arc<dyn HttpClient>,
        store: Arc<TokenStore>,
    ) -> Self {
        let api = Arc::new(IdentityApiClient::new(http));
        let slot = Arc::new(IdentityTokenSlot {
            store: Arc::clone(&store),
        });
        let acquisition = Arc::new(TokenAcquisition::new(
            Arc::clone(&issuer),
            Arc::clone(&api) as Arc<dyn TokenService>,
            slot,
        ));
        Self {
            watcher: AccountDataWatcher::new(Arc::clone(&source)),
            source,
            issuer,
            api,
            store,
            acquisition,
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Subscribe to remote identity server changes. Idempotent.
    pub async fn start(&self) -> Result<(), TrustError> {
        let store = Arc::clone(&self.store);
        let listeners = Arc::clone(&self.listeners);
        let api = Arc::clone(&self.api);

        let slot = TypedSlot::new(
            ACCOUNT_DATA_IDENTITY_SERVER,
            |content| Some(extractor::identity_server_url(content)),
            move |url: &Option<String>| {
                let current = match store.identity_config() {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("could not read identity config, dropping remote change: {}", e);
                        return;
                    }
                };

                // A value equal to what we already hold is the echo of
                // our own write coming back through sync: it must not
                // re-enter the mutation + notify path.
                if current.url == *url {
                    debug!("identity server account data echo suppressed");
                    return;
                }

                if let (Some(old_url), Some(old_token)) = (current.url, current.token) {
                    let api = Arc::clone(&api);
                    tokio::spawn(async move {
                        // Advisory cleanup of the abandoned server's token.
                        if let Err(e) = api.logout(&old_url, &old_token).await {
                            debug!("logout of previous identity server failed: {}", e);
                        }
                    });
                }

                if let Err(e) = store.set_identity_config(&IdentityServerConfig {
                    url: url.clone(),
                    token: None,
                }) {
                    warn!("could not store remote identity server change: {}", e);
                    return;
                }
                info!(url = ?url, "identity server changed remotely");
                listeners.broadcast(|l| l.on_identity_server_changed(url.as_deref()));
            },
        );

        self.watcher.start(vec![slot as Arc<dyn SlotHandler>]).await
    }

    /// Terminate the subscription; further remote changes are ignored.
    pub fn stop(&self) {
        self.watcher.stop();
    }

    pub fn add_listener(&self, listener: Arc<dyn IdentityServerListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn IdentityServerListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Currently configured identity server URL.
    pub fn identity_server_url(&self) -> Result<Option<String>, TrustError> {
        self.store.identity_server_url()
    }

    /// Lifecycle state of the identity server token.
    pub fn token_state(&self) -> TokenState {
        self.acquisition.state()
    }

    /// Select a new identity server (or disconnect with `None`).
    ///
    /// The URL is canonicalized before comparison and storage; setting
    /// the already-configured server is a no-op. Changing servers drops
    /// the previous server's token best-effort, persists the new config
    /// with no token, pushes the URL to account data, and notifies
    /// listeners.
    pub async fn set_identity_server(&self, url: Option<&str>) -> Result<(), TrustError> {
        let canonical = url.and_then(canonicalize_server_url);
        let current = self.store.identity_config()?;
        if current.url == canonical {
            debug!(url = ?canonical, "identity server unchanged, skipping write");
            return Ok(());
        }

        if let (Some(old_url), Some(old_token)) = (&current.url, &current.token) {
            // Advisory cleanup; a dead old server must not block the switch.
            if let Err(e) = self.api.logout(old_url, old_token).await {
                debug!("logout of previous identity server failed: {}", e);
            }
        }

        self.store.set_identity_config(&IdentityServerConfig {
            url: canonical.clone(),
            token: None,
        })?;
        self.source
            .update(
                ACCOUNT_DATA_IDENTITY_SERVER,
                json!({ "base_url": canonical }),
            )
            .await?;

        info!(url = ?canonical, "identity server changed");
        self.listeners
            .broadcast(|l| l.on_identity_server_changed(canonical.as_deref()));
        Ok(())
    }

    /// Remove the configured identity server.
    pub async fn disconnect(&self) -> Result<(), TrustError> {
        self.set_identity_server(None).await
    }

    /// Make sure a usable identity token exists, acquiring one if
    /// needed.
    pub async fn ensure_token(&self) -> Result<String, TrustError> {
        self.acquisition.ensure_token().await
    }

    /// Validate the identity token, transparently refreshing it once on
    /// rejection.
    pub async fn validate_token(&self) -> Result<String, TrustError> {
        self.acquisition.validate().await
    }

    /// Bulk-resolve three-pids to user ids.
    ///
    /// Runs under the one-shot refresh contract: a rejected token is
    /// cleared and the whole lookup retried once. A terms-not-signed
    /// refusal is terminal and never triggers a refresh.
    pub async fn lookup(&self, three_pids: &[ThreePid]) -> Result<Vec<FoundThreePid>, TrustError> {
        let server_url = self
            .store
            .identity_server_url()?
            .ok_or(TrustError::NoIdentityServerConfigured)?;

        let api = Arc::clone(&self.api);
        let pids = three_pids.to_vec();
        self.acquisition
            .run_authenticated(move |token| {
                let api = Arc::clone(&api);
                let server_url = server_url.clone();
                let pids = pids.clone();
                async move { api.lookup(&server_url, &token, &pids).await }
            })
            .await
    }

    /// Start binding a three-pid to this account.
    ///
    /// Requires the home server binding capability (checked before any
    /// I/O). Restarting an in-flight bind reuses its client secret and
    /// bumps the send attempt, replacing the stored record.
    pub async fn start_bind(&self, three_pid: &ThreePid) -> Result<PendingBinding, TrustError> {
        if !self.issuer.supports_threepid_binding() {
            return Err(TrustError::OutdatedHomeServer);
        }
        let server_url = self
            .store
            .identity_server_url()?
            .ok_or(TrustError::NoIdentityServerConfigured)?;

        let (client_secret, send_attempt) = match self.store.pending_binding(three_pid)? {
            Some(previous) => (previous.client_secret, previous.send_attempt + 1),
            None => (Uuid::new_v4().to_string(), 1),
        };

        let api = Arc::clone(&self.api);
        let pid = three_pid.clone();
        let secret = client_secret.clone();
        let sid = self
            .acquisition
            .run_authenticated(move |token| {
                let api = Arc::clone(&api);
                let server_url = server_url.clone();
                let pid = pid.clone();
                let secret = secret.clone();
                async move {
                    api.request_token(&server_url, &token, &pid, &secret, send_attempt)
                        .await
                }
            })
            .await?;

        let binding = PendingBinding {
            client_secret,
            send_attempt,
            sid,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.set_pending_binding(three_pid, &binding)?;
        info!(three_pid = %three_pid.storage_key(), attempt = send_attempt, "bind started");
        Ok(binding)
    }

    /// Abandon an in-flight bind. Returns whether a record existed.
    pub fn cancel_bind(&self, three_pid: &ThreePid) -> Result<bool, TrustError> {
        let removed = self.store.take_pending_binding(three_pid)?.is_some();
        if removed {
            info!(three_pid = %three_pid.storage_key(), "bind cancelled");
        }
        Ok(removed)
    }

    /// Consume the validated bind record so the caller can complete the
    /// binding with the home server. Returns `None` if no bind was in
    /// flight.
    pub fn finalize_bind(
        &self,
        three_pid: &ThreePid,
    ) -> Result<Option<PendingBinding>, TrustError> {
        let binding = self.store.take_pending_binding(three_pid)?;
        if binding.is_some() {
            info!(three_pid = %three_pid.storage_key(), "bind finalized");
        }
        Ok(binding)
    }

    /// Reachability of the configured identity server. `false` when no
    /// server is configured.
    pub async fn ping(&self) -> bool {
        match self.store.identity_server_url() {
            Ok(Some(url)) => self.api.ping(&url).await,
            _ => false,
        }
    }
}
