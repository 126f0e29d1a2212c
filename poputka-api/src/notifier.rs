use async_trait::async_trait;
use poputka_core::notify::{DeliveryError, Notifier};
use poputka_shared::NotificationIntent;
use tokio::sync::broadcast;

/// Hands intents to whichever transport is attached to the SSE stream
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<NotificationIntent>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<NotificationIntent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn deliver(&self, intent: &NotificationIntent) -> Result<(), DeliveryError> {
        self.tx
            .send(intent.clone())
            .map(|_| ())
            .map_err(|_| DeliveryError::Transport("no transport attached".to_string()))
    }
}
