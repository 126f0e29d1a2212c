use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text shown (and accepted back) for rides without a fixed departure time.
pub const BY_ARRANGEMENT: &str = "По договоренности";

/// Which side of the corridor market a ride belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Passenger,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Passenger => "passenger",
        }
    }

    /// Seat count assumed when the candidate does not state one
    pub fn default_seats(self) -> i32 {
        match self {
            Role::Driver => 3,
            Role::Passenger => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(Role::Driver),
            "passenger" => Ok(Role::Passenger),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Departure time of a ride. Free text because the extraction service
/// returns whatever the user wrote ("9 утра", "18:00").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum StartTime {
    At(String),
    ByArrangement,
}

impl StartTime {
    /// Normalizes optional free text. Blank input, the literal `None`/`null`
    /// some extractors emit, and the by-arrangement label itself all map to
    /// the sentinel.
    pub fn from_text(text: Option<&str>) -> Self {
        match text.map(str::trim) {
            None => StartTime::ByArrangement,
            Some(t)
                if t.is_empty()
                    || t.eq_ignore_ascii_case("none")
                    || t.eq_ignore_ascii_case("null")
                    || t.to_lowercase() == BY_ARRANGEMENT.to_lowercase() =>
            {
                StartTime::ByArrangement
            }
            Some(t) => StartTime::At(t.to_string()),
        }
    }

    pub fn concrete(&self) -> Option<&str> {
        match self {
            StartTime::At(t) => Some(t),
            StartTime::ByArrangement => None,
        }
    }
}

impl From<Option<String>> for StartTime {
    fn from(value: Option<String>) -> Self {
        StartTime::from_text(value.as_deref())
    }
}

impl From<StartTime> for Option<String> {
    fn from(value: StartTime) -> Self {
        match value {
            StartTime::At(t) => Some(t),
            StartTime::ByArrangement => None,
        }
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartTime::At(t) => f.write_str(t),
            StartTime::ByArrangement => f.write_str(BY_ARRANGEMENT),
        }
    }
}

/// A single travel intent: a driver's offer or a passenger's request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: i64,
    pub user_id: i64,
    pub role: Role,
    pub origin: String,
    pub destination: String,
    pub ride_date: NaiveDate,
    pub start_time: StartTime,
    pub initial_seats: i32,
    pub seats: i32,
    pub created_at: DateTime<Utc>,
}

impl Ride {
    pub fn has_capacity(&self) -> bool {
        self.seats > 0
    }

    pub fn can_seat(&self, needed: i32) -> bool {
        self.seats >= needed
    }

    /// Conditional decrement. Leaves the ride untouched when the seats are not there.
    pub fn take_seats(&mut self, needed: i32) -> bool {
        if needed < 0 || !self.can_seat(needed) {
            return false;
        }
        self.seats -= needed;
        true
    }
}

/// Everything needed to persist a ride; ids are assigned by the store
#[derive(Debug, Clone)]
pub struct NewRide {
    pub user_id: i64,
    pub role: Role,
    pub origin: String,
    pub destination: String,
    pub ride_date: NaiveDate,
    pub start_time: StartTime,
    pub seats: i32,
    pub created_at: DateTime<Utc>,
}

impl NewRide {
    pub fn into_ride(self, id: i64) -> Ride {
        Ride {
            id,
            user_id: self.user_id,
            role: self.role,
            origin: self.origin,
            destination: self.destination,
            ride_date: self.ride_date,
            start_time: self.start_time,
            initial_seats: self.seats,
            seats: self.seats,
            created_at: self.created_at,
        }
    }
}
