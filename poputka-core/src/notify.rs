use async_trait::async_trait;
use poputka_shared::NotificationIntent;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Recipient {0} unreachable")]
    Unreachable(i64),
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Outbound side of the chat transport. One attempt per intent, no retries.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers every intent independently. A failure is logged and counted,
/// never propagated: the action that produced the intents has already been
/// committed.
pub async fn dispatch(notifier: &dyn Notifier, intents: &[NotificationIntent]) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for intent in intents {
        match notifier.deliver(intent).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Notification to {} dropped: {}", intent.recipient, e);
                report.failed += 1;
            }
        }
    }
    if !intents.is_empty() {
        info!(
            "Dispatched {} notifications ({} failed)",
            report.delivered, report.failed
        );
    }
    report
}

/// Keeps delivered intents in memory. Recipients can be marked unreachable to
/// simulate blocked users.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotificationIntent>>,
    unreachable: Mutex<HashSet<i64>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn block(&self, recipient: i64) {
        self.unreachable.lock().await.insert(recipient);
    }

    pub async fn sent(&self) -> Vec<NotificationIntent> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, recipient: i64) -> Vec<NotificationIntent> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
        if self.unreachable.lock().await.contains(&intent.recipient) {
            return Err(DeliveryError::Unreachable(intent.recipient));
        }
        self.sent.lock().await.push(intent.clone());
        Ok(())
    }
}
