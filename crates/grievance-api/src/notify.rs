//! Citizen-facing notification requests.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use grievance_core::{GrievanceId, GrievanceStatus};
use serde::{Deserialize, Serialize};

use crate::background::BackgroundQueue;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusChanged,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub grievance_id: GrievanceId,
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub status: GrievanceStatus,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Hand `notification` to `notifier` on the background queue.
pub fn schedule(
    queue: &BackgroundQueue,
    notifier: &Arc<dyn Notifier>,
    notification: Notification,
) -> bool {
    let notifier = Arc::clone(notifier);
    queue.submit("citizen_notification", async move { notifier.notify(&notification).await })
}

/// Writes each notification request to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            grievance_id = %notification.grievance_id,
            recipient_id = %notification.recipient_id,
            kind = ?notification.kind,
            status = %notification.status,
            "notification requested"
        );
        Ok(())
    }
}

/// Keeps every notification in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match self.sent.lock() {
            Ok(mut guard) => guard.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}
