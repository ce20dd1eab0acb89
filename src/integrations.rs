//! Integration manager operations: configuration tracking, widget
//! permission mutations, and scalar token lifecycle.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::acquisition::{TokenAcquisition, TokenService, TokenSlot, TokenState};
use crate::adapters::scalar_api::ScalarApiClient;
use crate::error::TrustError;
use crate::extractor;
use crate::models::{
    AllowedWidgetsContent, IntegrationManagerConfig, IntegrationProvisioningContent,
    ACCOUNT_DATA_ALLOWED_WIDGETS, ACCOUNT_DATA_INTEGRATION_PROVISIONING, ACCOUNT_DATA_WIDGETS,
};
use crate::registry::ListenerRegistry;
use crate::store::TokenStore;
use crate::traits::account_data::AccountDataSource;
use crate::traits::http::HttpClient;
use crate::traits::openid::OpenIdIssuer;
use crate::watcher::{AccountDataWatcher, SlotHandler, TypedSlot};

/// Observer of integration configuration and permission changes.
///
/// Default bodies are no-ops so implementors override only the slots
/// they watch.
pub trait IntegrationsListener: Send + Sync {
    fn on_configuration_changed(&self, _config: Option<&IntegrationManagerConfig>) {}
    fn on_allowed_widgets_changed(&self, _content: &AllowedWidgetsContent) {}
    fn on_provisioning_changed(&self, _enabled: bool) {}
}

/// [`TokenSlot`] over the scalar token for the currently configured
/// manager.
struct ScalarTokenSlot {
    store: Arc<TokenStore>,
    config: Arc<Mutex<Option<IntegrationManagerConfig>>>,
}

impl ScalarTokenSlot {
    fn api_url(&self) -> Option<String> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.api_url.clone())
    }
}

impl TokenSlot for ScalarTokenSlot {
    fn server_url(&self) -> Result<Option<String>, TrustError> {
        Ok(self.api_url())
    }

    fn token(&self) -> Result<Option<String>, TrustError> {
        match self.api_url() {
            Some(api_url) => self.store.scalar_token(&api_url),
            None => Ok(None),
        }
    }

    fn set_token(&self, token: Option<&str>) -> Result<(), TrustError> {
        match self.api_url() {
            Some(api_url) => self.store.set_scalar_token(&api_url, token),
            None => Err(TrustError::NoIntegrationManagerConfigured),
        }
    }

    fn missing_server_error(&self) -> TrustError {
        TrustError::NoIntegrationManagerConfigured
    }
}

/// Integration manager trust and permission state for one session.
pub struct IntegrationsService {
    source: Arc<dyn AccountDataSource>,
    acquisition: Arc<TokenAcquisition>,
    listeners: Arc<ListenerRegistry<dyn IntegrationsListener>>,
    watcher: AccountDataWatcher,
    current_config: Arc<Mutex<Option<IntegrationManagerConfig>>>,
}

impl IntegrationsService {
    pub fn new(
        source: Arc<dyn AccountDataSource>,
        issuer: Arc<dyn OpenIdIssuer>,
        http: Arc<dyn HttpClient>,
        store: Arc<TokenStore>,
    ) -> Self {
        let current_config = Arc::new(Mutex::new(None));
        let scalar = Arc::new(ScalarApiClient::new(http));
        let slot = Arc::new(ScalarTokenSlot {
            store,
            config: Arc::clone(&current_config),
        });
        let acquisition = Arc::new(TokenAcquisition::new(
            issuer,
            scalar as Arc<dyn TokenService>,
            slot,
        ));
        Self {
            watcher: AccountDataWatcher::new(Arc::clone(&source)),
            source,
            acquisition,
            listeners: Arc::new(ListenerRegistry::new()),
            current_config,
        }
    }

    /// Subscribe to the three integration account-data types. Idempotent.
    pub async fn start(&self) -> Result<(), TrustError> {
        let listeners = Arc::clone(&self.listeners);
        let config_cache = Arc::clone(&self.current_config);
        let config_slot = TypedSlot::new(
            ACCOUNT_DATA_WIDGETS,
            |content| Some(extractor::integration_manager_config(content)),
            move |config: &Option<IntegrationManagerConfig>| {
                *config_cache.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
                info!(configured = config.is_some(), "integration manager config changed");
                listeners.broadcast(|l| l.on_configuration_changed(config.as_ref()));
            },
        );

        let listeners = Arc::clone(&self.listeners);
        let widgets_slot = TypedSlot::new(
            ACCOUNT_DATA_ALLOWED_WIDGETS,
            extractor::allowed_widgets,
            move |content: &AllowedWidgetsContent| {
                listeners.broadcast(|l| l.on_allowed_widgets_changed(content));
            },
        );

        let listeners = Arc::clone(&self.listeners);
        let provisioning_slot = TypedSlot::new(
            ACCOUNT_DATA_INTEGRATION_PROVISIONING,
            extractor::integration_provisioning,
            move |content: &IntegrationProvisioningContent| {
                listeners.broadcast(|l| l.on_provisioning_changed(content.enabled));
            },
        );

        self.watcher
            .start(vec![
                config_slot as Arc<dyn SlotHandler>,
                widgets_slot as Arc<dyn SlotHandler>,
                provisioning_slot as Arc<dyn SlotHandler>,
            ])
            .await
    }

    /// Terminate the subscriptions; further events are ignored.
    pub fn stop(&self) {
        self.watcher.stop();
    }

    pub fn add_listener(&self, listener: Arc<dyn IntegrationsListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn IntegrationsListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Point-in-time read of the integration manager config, refreshing
    /// the cached value used by the scalar token slot.
    pub async fn integration_manager_config(
        &self,
    ) -> Result<Option<IntegrationManagerConfig>, TrustError> {
        let config = match self.source.get(ACCOUNT_DATA_WIDGETS).await? {
            Some(event) => extractor::integration_manager_config(&event.content),
            None => None,
        };
        *self
            .current_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();
        Ok(config)
    }

    /// Current widget permission grants; absent account data reads as
    /// empty.
    pub async fn allowed_widgets(&self) -> Result<AllowedWidgetsContent, TrustError> {
        Ok(self
            .source
            .get(ACCOUNT_DATA_ALLOWED_WIDGETS)
            .await?
            .and_then(|event| extractor::allowed_widgets(&event.content))
            .unwrap_or_default())
    }

    /// Whether the widget has been allowed by the user.
    pub async fn is_widget_allowed(&self, state_event_id: &str) -> Result<bool, TrustError> {
        Ok(self.allowed_widgets().await?.is_widget_allowed(state_event_id))
    }

    /// Whether a native widget domain has been allowed by the user.
    pub async fn is_native_widget_domain_allowed(
        &self,
        widget_type: &str,
        domain: &str,
    ) -> Result<bool, TrustError> {
        Ok(self
            .allowed_widgets()
            .await?
            .is_native_domain_allowed(widget_type, domain))
    }

    /// Grant or revoke one widget, preserving every sibling entry.
    ///
    /// Copy-on-write merge over the current content; does not require
    /// the integration manager token.
    pub async fn set_widget_allowed(
        &self,
        state_event_id: &str,
        allowed: bool,
    ) -> Result<(), TrustError> {
        let mut content = self.allowed_widgets().await?;
        content.set_widget(state_event_id, allowed);
        self.source
            .update(ACCOUNT_DATA_ALLOWED_WIDGETS, serde_json::to_value(&content)?)
            .await
    }

    /// Grant or revoke one native widget domain, preserving sibling
    /// types and domains.
    pub async fn set_native_widget_domain_allowed(
        &self,
        widget_type: &str,
        domain: &str,
        allowed: bool,
    ) -> Result<(), TrustError> {
        let mut content = self.allowed_widgets().await?;
        content.set_native_domain(widget_type, domain, allowed);
        self.source
            .update(ACCOUNT_DATA_ALLOWED_WIDGETS, serde_json::to_value(&content)?)
            .await
    }

    /// Whether integrations are enabled for this session.
    pub async fn is_integration_enabled(&self) -> Result<bool, TrustError> {
        Ok(self
            .source
            .get(ACCOUNT_DATA_INTEGRATION_PROVISIONING)
            .await?
            .and_then(|event| extractor::integration_provisioning(&event.content))
            .unwrap_or_default()
            .enabled)
    }

    /// Enable or disable integrations.
    ///
    /// Short-circuits to a no-op success when already at the requested
    /// value, avoiding a redundant account-data write and the redundant
    /// notification it would echo.
    pub async fn set_integration_enabled(&self, enable: bool) -> Result<(), TrustError> {
        if self.is_integration_enabled().await? == enable {
            debug!(enable, "integration provisioning already at requested value");
            return Ok(());
        }
        let content = IntegrationProvisioningContent { enabled: enable };
        self.source
            .update(
                ACCOUNT_DATA_INTEGRATION_PROVISIONING,
                serde_json::to_value(content)?,
            )
            .await
    }

    /// Lifecycle state of the scalar token.
    pub fn token_state(&self) -> TokenState {
        self.acquisition.state()
    }

    /// Make sure a usable scalar token exists for the current manager,
    /// acquiring one if needed.
    pub async fn ensure_scalar_token(&self) -> Result<String, TrustError> {
        self.integration_manager_config().await?;
        self.acquisition.ensure_token().await
    }

    /// Validate the scalar token against the manager, transparently
    /// refreshing it once on rejection.
    pub async fn validate_scalar_token(&self) -> Result<String, TrustError> {
        self.integration_manager_config().await?;
        self.acquisition.validate().await
    }
}
