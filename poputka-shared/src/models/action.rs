use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Button payload carried through the chat transport and handed back verbatim.
///
/// The textual form is compact on purpose: chat platforms cap callback data
/// at 64 bytes.
///
/// ```text
/// take_<passenger_ride_id>_<driver_ride_id>
/// confirm_<booking_id>
/// del_<ride_id>
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ActionRef {
    Take {
        passenger_ride_id: i64,
        driver_ride_id: i64,
    },
    Confirm {
        booking_id: i64,
    },
    Delete {
        ride_id: i64,
    },
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRef::Take {
                passenger_ride_id,
                driver_ride_id,
            } => write!(f, "take_{}_{}", passenger_ride_id, driver_ride_id),
            ActionRef::Confirm { booking_id } => write!(f, "confirm_{}", booking_id),
            ActionRef::Delete { ride_id } => write!(f, "del_{}", ride_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed action reference: {0}")]
pub struct ParseActionError(pub String);

impl FromStr for ActionRef {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseActionError(s.to_string());
        let id = |part: Option<&str>| -> Result<i64, ParseActionError> {
            part.and_then(|p| p.parse().ok()).ok_or_else(malformed)
        };

        let mut parts = s.split('_');
        let action = match parts.next() {
            Some("take") => ActionRef::Take {
                passenger_ride_id: id(parts.next())?,
                driver_ride_id: id(parts.next())?,
            },
            Some("confirm") => ActionRef::Confirm {
                booking_id: id(parts.next())?,
            },
            Some("del") => ActionRef::Delete {
                ride_id: id(parts.next())?,
            },
            _ => return Err(malformed()),
        };

        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(action)
    }
}

impl From<ActionRef> for String {
    fn from(value: ActionRef) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for ActionRef {
    type Error = ParseActionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
