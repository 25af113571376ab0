//! # Recording notifier

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dumpvault_core::VaultResult;
use dumpvault_engine::{Notification, Notifier};

/// [`Notifier`] that keeps every notification for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Create an empty notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, in order
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    /// Rendered messages received so far
    pub fn messages(&self) -> Vec<String> {
        self.notifications().iter().map(Notification::message).collect()
    }

    /// Wait until at least `count` notifications arrived. Delivery happens
    /// on background tasks, so tests poll instead of asserting directly.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.notifications();
            if seen.len() >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> VaultResult<()> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
