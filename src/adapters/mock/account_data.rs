//! Scripted account-data source for testing.
//!
//! Tests emit events into per-type channels and inspect recorded
//! `update` calls. Updates echo back through the subscription streams by
//! default, mirroring the server's sync round-trip.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::TrustError;
use crate::models::AccountDataEvent;
use crate::traits::account_data::{AccountDataSource, AccountDataStream};

/// Mock account-data source backed by in-memory channels.
#[derive(Clone, Default)]
pub struct MockAccountDataSource {
    values: Arc<Mutex<HashMap<String, AccountDataEvent>>>,
    senders: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<AccountDataEvent>>>>>,
    updates: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    echo_updates: Arc<AtomicBool>,
    fail_updates: Arc<AtomicBool>,
}

impl MockAccountDataSource {
    pub fn new() -> Self {
        let source = Self::default();
        source.echo_updates.store(true, Ordering::SeqCst);
        source
    }

    /// Seed the point-in-time value for a type without emitting.
    pub fn seed(&self, event: AccountDataEvent) {
        self.values
            .lock()
            .unwrap()
            .insert(event.event_type.clone(), event);
    }

    /// Emit an event to subscribers and update the stored value.
    pub fn emit(&self, event: AccountDataEvent) {
        self.values
            .lock()
            .unwrap()
            .insert(event.event_type.clone(), event.clone());
        let mut senders = self.senders.lock().unwrap();
        if let Some(subscribers) = senders.get_mut(&event.event_type) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Whether `update` calls echo back through subscriptions (default
    /// true).
    pub fn set_echo_updates(&self, echo: bool) {
        self.echo_updates.store(echo, Ordering::SeqCst);
    }

    /// Make subsequent `update` calls fail.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Recorded `update` calls, in order.
    pub fn updates(&self) -> Vec<(String, serde_json::Value)> {
        self.updates.lock().unwrap().clone()
    }

    /// Number of recorded `update` calls for one type.
    pub fn update_count(&self, event_type: &str) -> usize {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }
}

#[async_trait]
impl AccountDataSource for MockAccountDataSource {
    async fn subscribe(&self, event_type: &str) -> Result<AccountDataStream, TrustError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap()
            .entry(event_type.to_string())
            .or_default()
            .push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn get(&self, event_type: &str) -> Result<Option<AccountDataEvent>, TrustError> {
        Ok(self.values.lock().unwrap().get(event_type).cloned())
    }

    async fn update(
        &self,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), TrustError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(TrustError::Server {
                status: 500,
                message: "update failed".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((event_type.to_string(), content.clone()));
        let event = AccountDataEvent::new(event_type, content);
        if self.echo_updates.load(Ordering::SeqCst) {
            self.emit(event);
        } else {
            self.seed(event);
        }
        Ok(())
    }
}
