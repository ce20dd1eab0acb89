//! Live account-data watching with change detection.
//!
//! The watcher owns one subscription task per account-data type. Each
//! emission is decoded by its slot; malformed payloads are ignored, and
//! values equal to the slot's last cached value are suppressed so that
//! listeners see each logical change exactly once. Per-type ordering is
//! preserved by running one sequential loop per type; ordering across
//! types is not guaranteed.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::error::TrustError;
use crate::models::AccountDataEvent;
use crate::ops::Cancelable;
use crate::traits::account_data::AccountDataSource;

/// One watched account-data type: decoding, dedup, and notification.
pub trait SlotHandler: Send + Sync {
    /// The account-data type this slot subscribes to.
    fn event_type(&self) -> &str;

    /// Process one emission for this type.
    fn handle(&self, event: &AccountDataEvent);
}

/// A [`SlotHandler`] built from a decode function and a notify callback,
/// with equality-based dedup in between.
pub struct TypedSlot<T> {
    event_type: String,
    decode: Box<dyn Fn(&serde_json::Value) -> Option<T> + Send + Sync>,
    notify: Box<dyn Fn(&T) + Send + Sync>,
    last: Mutex<Option<T>>,
}

impl<T: PartialEq + Clone + Send + 'static> TypedSlot<T> {
    pub fn new(
        event_type: impl Into<String>,
        decode: impl Fn(&serde_json::Value) -> Option<T> + Send + Sync + 'static,
        notify: impl Fn(&T) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_type: event_type.into(),
            decode: Box::new(decode),
            notify: Box::new(notify),
            last: Mutex::new(None),
        })
    }

    /// Last decoded value, if any emission has been seen.
    pub fn last(&self) -> Option<T> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: PartialEq + Clone + Send + 'static> SlotHandler for TypedSlot<T> {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn handle(&self, event: &AccountDataEvent) {
        let Some(value) = (self.decode)(&event.content) else {
            debug!(event_type = %self.event_type, "undecodable account data ignored");
            return;
        };

        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() == Some(&value) {
                debug!(event_type = %self.event_type, "unchanged account data suppressed");
                return;
            }
            *last = Some(value.clone());
        }
        // Lock released before user code runs.
        (self.notify)(&value);
    }
}

/// Subscription lifecycle owner for a set of slots.
///
/// Scoped to one session instance: `start` subscribes and spawns the
/// per-type tasks, `stop` aborts them and leaves the watcher inert.
/// Both are idempotent.
pub struct AccountDataWatcher {
    source: Arc<dyn AccountDataSource>,
    tasks: Mutex<Vec<Cancelable<()>>>,
    running: AtomicBool,
}

impl AccountDataWatcher {
    pub fn new(source: Arc<dyn AccountDataSource>) -> Self {
        Self {
            source,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe every slot and spawn its processing task.
    ///
    /// All subscriptions are established before any task is spawned, so
    /// a failing subscription leaves nothing running.
    pub async fn start(&self, slots: Vec<Arc<dyn SlotHandler>>) -> Result<(), TrustError> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("watcher already running, start ignored");
            return Ok(());
        }

        let mut streams = Vec::with_capacity(slots.len());
        for slot in &slots {
            match self.source.subscribe(slot.event_type()).await {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (slot, mut stream) in slots.into_iter().zip(streams) {
            let event_type = slot.event_type().to_string();
            tasks.push(Cancelable::spawn(async move {
                while let Some(event) = stream.next().await {
                    slot.handle(&event);
                }
                debug!(event_type = %event_type, "account data stream ended");
            }));
        }
        info!("account data watcher started");
        Ok(())
    }

    /// Abort every subscription task. Further emissions are ignored.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for task in &tasks {
            task.cancel();
        }
        info!(task_count = tasks.len(), "account data watcher stopped");
    }
}

impl Drop for AccountDataWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
