//! Data model for third-party service trust: account-data payloads,
//! service configurations, and identity binding records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account-data type carrying the user's widget definitions.
pub const ACCOUNT_DATA_WIDGETS: &str = "m.widgets";

/// Account-data type carrying the configured identity server URL.
pub const ACCOUNT_DATA_IDENTITY_SERVER: &str = "m.identity_server";

/// Account-data type carrying per-widget permission grants.
pub const ACCOUNT_DATA_ALLOWED_WIDGETS: &str = "im.vector.setting.allowed_widgets";

/// Account-data type carrying the integration provisioning toggle.
pub const ACCOUNT_DATA_INTEGRATION_PROVISIONING: &str =
    "im.vector.setting.integration_provisioning";

/// Widget type marker identifying the integration manager widget.
pub const WIDGET_TYPE_INTEGRATION_MANAGER: &str = "m.integration_manager";

/// A single typed account-data record.
///
/// The server keeps one logical event per type: a new event for a type
/// replaces the previous one, it is never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDataEvent {
    /// Account-data type string (e.g. `m.widgets`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque JSON content; shape depends on the type.
    pub content: serde_json::Value,
}

impl AccountDataEvent {
    /// Create a new account-data event.
    pub fn new(event_type: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            content,
        }
    }
}

/// The identity server a session is connected to, with its auth token.
///
/// `url == None` means "no identity server configured". A `None` token is
/// equivalent to "never fetched": the next authenticated call acquires
/// a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityServerConfig {
    /// Canonical base URL of the identity server.
    pub url: Option<String>,
    /// Bearer token issued by the identity server, if any.
    pub token: Option<String>,
}

impl IdentityServerConfig {
    /// Whether an identity server is configured at all.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

/// Resolved integration manager endpoints.
///
/// Immutable value type; recomputed on every relevant account-data change.
/// Two configs are equal iff both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationManagerConfig {
    /// URL the host embeds for the manager's UI.
    pub ui_url: String,
    /// REST endpoint used for token exchange and provisioning calls.
    pub api_url: String,
}

/// Per-user widget permission grants.
///
/// Updates merge: setting one key must not erase sibling keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowedWidgetsContent {
    /// Grants keyed by widget state event id.
    #[serde(default)]
    pub widgets: HashMap<String, bool>,
    /// Grants for native widgets, keyed by widget type then domain.
    #[serde(default, rename = "native_widgets")]
    pub native: HashMap<String, HashMap<String, bool>>,
}

impl AllowedWidgetsContent {
    /// Whether the widget identified by `state_event_id` has been allowed.
    pub fn is_widget_allowed(&self, state_event_id: &str) -> bool {
        self.widgets.get(state_event_id).copied().unwrap_or(false)
    }

    /// Whether `domain` has been allowed for the native widget `widget_type`.
    pub fn is_native_domain_allowed(&self, widget_type: &str, domain: &str) -> bool {
        self.native
            .get(widget_type)
            .and_then(|domains| domains.get(domain))
            .copied()
            .unwrap_or(false)
    }

    /// Set a grant for one widget, preserving all sibling entries.
    pub fn set_widget(&mut self, state_event_id: impl Into<String>, allowed: bool) {
        self.widgets.insert(state_event_id.into(), allowed);
    }

    /// Set a grant for one native widget domain, preserving all sibling
    /// types and domains.
    pub fn set_native_domain(
        &mut self,
        widget_type: impl Into<String>,
        domain: impl Into<String>,
        allowed: bool,
    ) {
        self.native
            .entry(widget_type.into())
            .or_default()
            .insert(domain.into(), allowed);
    }
}

/// Whether the user has integrations enabled for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationProvisioningContent {
    #[serde(default = "default_provisioning_enabled")]
    pub enabled: bool,
}

fn default_provisioning_enabled() -> bool {
    true
}

impl Default for IntegrationProvisioningContent {
    /// Provisioning is enabled until the user opts out.
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Kind of third-party identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Email,
    Msisdn,
}

impl Medium {
    /// Wire-protocol name of the medium.
    pub fn as_str(&self) -> &'static str {
        match self {
            Medium::Email => "email",
            Medium::Msisdn => "msisdn",
        }
    }
}

/// A third-party identifier: (medium, address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreePid {
    pub medium: Medium,
    pub address: String,
}

impl ThreePid {
    /// An email three-pid. The address is lowercased, matching server-side
    /// case folding for email lookups.
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            medium: Medium::Email,
            address: address.into().to_lowercase(),
        }
    }

    /// A phone-number three-pid in international format, digits only.
    pub fn msisdn(number: impl Into<String>) -> Self {
        Self {
            medium: Medium::Msisdn,
            address: number.into(),
        }
    }

    /// Stable key used to index storage records for this identifier.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.medium.as_str(), self.address)
    }
}

/// A directory match for a looked-up three-pid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundThreePid {
    pub three_pid: ThreePid,
    pub user_id: String,
}

/// In-flight binding of a three-pid to this account.
///
/// At most one exists per three-pid: created on bind-start, deleted on
/// bind-cancel or bind-finalize. Restarting a bind for the same three-pid
/// reuses the client secret and bumps `send_attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBinding {
    /// Client-generated secret tying validation calls together.
    pub client_secret: String,
    /// Number of validation sends so far, starting at 1.
    pub send_attempt: u32,
    /// Session id issued by the identity server for this validation.
    pub sid: String,
    /// Unix timestamp of bind-start.
    pub created_at: i64,
}

/// Short-lived assertion issued by the home server, exchanged with a
/// third-party service for a service-specific token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenIdToken {
    pub access_token: String,
    pub token_type: String,
    pub matrix_server_name: String,
    pub expires_in: u64,
}

/// Canonicalize a user- or server-supplied identity server URL.
///
/// Trims whitespace, defaults the scheme to `https://`, and strips exactly
/// one trailing slash so that formatting-only variants compare equal.
/// Returns `None` for an empty input, which callers treat as
/// "no identity server".
pub fn canonicalize_server_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    Some(
        with_scheme
            .strip_suffix('/')
            .unwrap_or(&with_scheme)
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_data_event_roundtrip() {
        let event = AccountDataEvent::new(
            ACCOUNT_DATA_IDENTITY_SERVER,
            serde_json::json!({"base_url": "https://id.example.com"}),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"m.identity_server""#));
        let back: AccountDataEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_identity_server_config_default_unconfigured() {
        let config = IdentityServerConfig::default();
        assert!(!config.is_configured());
        assert!(config.token.is_none());
    }

    #[test]
    fn test_integration_manager_config_equality() {
        let a = IntegrationManagerConfig {
            ui_url: "https://im.example.com".to_string(),
            api_url: "https://api.example.com".to_string(),
        };
        let b = a.clone();
        assert_eq!(a, b);

        let c = IntegrationManagerConfig {
            api_url: "https://other.example.com".to_string(),
            ..a.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_allowed_widgets_merge_preserves_siblings() {
        let mut content = AllowedWidgetsContent::default();
        content.set_widget("ev1", true);
        content.set_widget("ev2", true);
        assert!(content.is_widget_allowed("ev1"));
        assert!(content.is_widget_allowed("ev2"));

        content.set_native_domain("m.stickerpicker", "example.com", true);
        content.set_native_domain("m.stickerpicker", "other.com", false);
        content.set_native_domain("m.etherpad", "pad.example.com", true);

        assert!(content.is_native_domain_allowed("m.stickerpicker", "example.com"));
        assert!(!content.is_native_domain_allowed("m.stickerpicker", "other.com"));
        assert!(content.is_native_domain_allowed("m.etherpad", "pad.example.com"));
        assert_eq!(content.native.len(), 2);
    }

    #[test]
    fn test_allowed_widgets_unknown_keys_denied() {
        let content = AllowedWidgetsContent::default();
        assert!(!content.is_widget_allowed("missing"));
        assert!(!content.is_native_domain_allowed("m.stickerpicker", "missing.com"));
    }

    #[test]
    fn test_allowed_widgets_wire_field_names() {
        let json = r#"{"widgets":{"ev1":true},"native_widgets":{"m.stickerpicker":{"example.com":true}}}"#;
        let content: AllowedWidgetsContent = serde_json::from_str(json).unwrap();
        assert!(content.is_widget_allowed("ev1"));
        assert!(content.is_native_domain_allowed("m.stickerpicker", "example.com"));
    }

    #[test]
    fn test_provisioning_defaults_enabled() {
        let content: IntegrationProvisioningContent = serde_json::from_str("{}").unwrap();
        assert!(content.enabled);
        assert!(IntegrationProvisioningContent::default().enabled);
    }

    #[test]
    fn test_three_pid_email_lowercased() {
        let pid = ThreePid::email("Alice@Example.COM");
        assert_eq!(pid.address, "alice@example.com");
        assert_eq!(pid.storage_key(), "email:alice@example.com");
    }

    #[test]
    fn test_three_pid_msisdn_key() {
        let pid = ThreePid::msisdn("447700900000");
        assert_eq!(pid.storage_key(), "msisdn:447700900000");
    }

    #[test]
    fn test_medium_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Medium::Email).unwrap(), r#""email""#);
        let medium: Medium = serde_json::from_str(r#""msisdn""#).unwrap();
        assert_eq!(medium, Medium::Msisdn);
    }

    #[test]
    fn test_canonicalize_server_url() {
        assert_eq!(
            canonicalize_server_url("https://id.example.com/"),
            Some("https://id.example.com".to_string())
        );
        assert_eq!(
            canonicalize_server_url("  id.example.com  "),
            Some("https://id.example.com".to_string())
        );
        assert_eq!(
            canonicalize_server_url("http://localhost:8090"),
            Some("http://localhost:8090".to_string())
        );
        assert_eq!(canonicalize_server_url("   "), None);
        assert_eq!(canonicalize_server_url(""), None);
    }

    #[test]
    fn test_canonicalize_strips_single_trailing_slash() {
        // Only one trailing slash is stripped; a path stays intact.
        assert_eq!(
            canonicalize_server_url("https://id.example.com/sub/"),
            Some("https://id.example.com/sub".to_string())
        );
    }
}
