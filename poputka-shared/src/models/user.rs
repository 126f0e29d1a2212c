use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pii::Masked;

/// A chat platform user, created on first interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    /// Platform user id; also the notification address
    pub external_id: i64,
    pub handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Handle as shown to counterparties
    pub fn display_handle(&self) -> &str {
        self.handle.as_deref().unwrap_or("скрыт")
    }

    /// Handle wrapper for log lines
    pub fn masked_handle(&self) -> Masked<String> {
        Masked(self.display_handle().to_string())
    }
}
