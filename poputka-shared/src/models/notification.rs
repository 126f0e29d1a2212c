use serde::{Deserialize, Serialize};

use super::action::ActionRef;

/// Something the transport should deliver to one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationIntent {
    /// External (platform) id of the recipient
    pub recipient: i64,
    pub text: String,
    pub action: Option<ActionRef>,
}

impl NotificationIntent {
    pub fn new(recipient: i64, text: impl Into<String>) -> Self {
        Self {
            recipient,
            text: text.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: ActionRef) -> Self {
        self.action = Some(action);
        self
    }
}
