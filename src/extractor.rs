//! Pure extraction of domain configuration from raw account-data
//! payloads.
//!
//! Extraction never fails: a malformed or absent payload yields `None`,
//! which callers treat as "ignore the event" or "no config" depending on
//! the slot.

use serde_json::Value;
use tracing::debug;

use crate::models::{
    canonicalize_server_url, AllowedWidgetsContent, IntegrationManagerConfig,
    IntegrationProvisioningContent, WIDGET_TYPE_INTEGRATION_MANAGER,
};

/// Extract the integration manager config from `m.widgets` content.
///
/// The content maps state event ids to widget events; the first widget
/// whose declared type is the integration-manager marker wins. The order
/// is the payload's iteration order, so callers must not assume a
/// specific winner if a server ever sends more than one. A matching
/// widget with a blank URL yields no config, not an error.
pub fn integration_manager_config(content: &Value) -> Option<IntegrationManagerConfig> {
    let widgets = content.as_object()?;
    let widget_content = widgets.values().find_map(|widget| {
        let widget_content = widget.get("content")?.as_object()?;
        let widget_type = widget_content.get("type")?.as_str()?;
        (widget_type == WIDGET_TYPE_INTEGRATION_MANAGER).then_some(widget_content)
    })?;

    let ui_url = widget_content
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if ui_url.is_empty() {
        debug!("integration manager widget present but has no url");
        return None;
    }

    // The widget's data payload may carry a distinct API endpoint;
    // otherwise the UI URL serves both purposes.
    let api_url = widget_content
        .get("data")
        .and_then(|data| data.get("api_url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(ui_url);

    Some(IntegrationManagerConfig {
        ui_url: ui_url.to_string(),
        api_url: api_url.to_string(),
    })
}

/// Decode `im.vector.setting.allowed_widgets` content.
pub fn allowed_widgets(content: &Value) -> Option<AllowedWidgetsContent> {
    serde_json::from_value(content.clone()).ok()
}

/// Decode `im.vector.setting.integration_provisioning` content.
pub fn integration_provisioning(content: &Value) -> Option<IntegrationProvisioningContent> {
    serde_json::from_value(content.clone()).ok()
}

/// Extract the identity server URL from `m.identity_server` content.
///
/// Unlike the other slots this extraction always succeeds: an absent or
/// blank `base_url` is the valid "no identity server" state, not a
/// malformed event.
pub fn identity_server_url(content: &Value) -> Option<String> {
    content
        .get("base_url")
        .and_then(Value::as_str)
        .and_then(canonicalize_server_url)
}
