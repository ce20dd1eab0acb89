//! Account-data capability trait.
//!
//! Account data is the per-user typed key/value store synchronized by the
//! home server; this crate uses it as the transport for configuration and
//! permission state. The session layer owns the sync machinery and
//! implements this trait over it.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::TrustError;
use crate::models::AccountDataEvent;

/// Live sequence of account-data events for one type. Infinite and
/// restartable per session instance.
pub type AccountDataStream = Pin<Box<dyn Stream<Item = AccountDataEvent> + Send>>;

/// Trait for the account-data capability: point-in-time reads, writes,
/// and a live per-type subscription.
#[async_trait]
pub trait AccountDataSource: Send + Sync {
    /// Subscribe to the live stream of events for one account-data type.
    ///
    /// The stream yields every replacement of the type's logical event,
    /// including echoes of writes performed through [`Self::update`].
    async fn subscribe(&self, event_type: &str) -> Result<AccountDataStream, TrustError>;

    /// Read the current event for a type, if any.
    async fn get(&self, event_type: &str) -> Result<Option<AccountDataEvent>, TrustError>;

    /// Replace the event for a type with new content.
    async fn update(
        &self,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), TrustError>;
}
