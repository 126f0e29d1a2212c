use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ride::{Ride, Role, UnknownVariant};

/// Booking status. `Confirmed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "rejected" => Ok(BookingStatus::Rejected),
            other => Err(UnknownVariant {
                kind: "booking status",
                value: other.to_string(),
            }),
        }
    }
}

/// Reservation link between one driver ride and one passenger ride
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: i64,
    pub driver_ride_id: i64,
    pub passenger_ride_id: i64,
    /// Internal id of the user who opened the booking
    pub proposed_by: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub driver_ride_id: i64,
    pub passenger_ride_id: i64,
    pub proposed_by: i64,
    pub created_at: DateTime<Utc>,
}

impl NewBooking {
    pub fn into_booking(self, id: i64) -> Booking {
        Booking {
            id,
            driver_ride_id: self.driver_ride_id,
            passenger_ride_id: self.passenger_ride_id,
            proposed_by: self.proposed_by,
            status: BookingStatus::Pending,
            created_at: self.created_at,
        }
    }
}

/// Outcome of confirming a pending booking against freshly read rides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Confirm {
        seats_needed: i32,
        /// Driver time to copy onto the passenger ride, if it is a concrete one
        start_time: Option<String>,
    },
    Reject {
        seats_needed: i32,
        available: i32,
    },
}

impl Resolution {
    pub fn target_status(&self) -> BookingStatus {
        match self {
            Resolution::Confirm { .. } => BookingStatus::Confirmed,
            Resolution::Reject { .. } => BookingStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Booking {id} already {status}")]
    AlreadyResolved { id: i64, status: BookingStatus },

    #[error("Invalid booking transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking {id} does not link one driver ride to one passenger ride")]
    MismatchedRides { id: i64 },
}

impl Booking {
    /// Decides the confirm transition. Pure: the caller is expected to hold
    /// the rows locked (or the store serialized) while it applies the result.
    pub fn resolve(
        &self,
        driver_ride: &Ride,
        passenger_ride: Option<&Ride>,
    ) -> Result<Resolution, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyResolved {
                id: self.id,
                status: self.status,
            });
        }

        let driver_ok = driver_ride.role == Role::Driver && driver_ride.id == self.driver_ride_id;
        let passenger_ok = passenger_ride
            .is_none_or(|p| p.role == Role::Passenger && p.id == self.passenger_ride_id);
        if !driver_ok || !passenger_ok || self.driver_ride_id == self.passenger_ride_id {
            return Err(TransitionError::MismatchedRides { id: self.id });
        }

        let seats_needed = passenger_ride.map(|p| p.initial_seats).unwrap_or(1);
        if !driver_ride.can_seat(seats_needed) {
            return Ok(Resolution::Reject {
                seats_needed,
                available: driver_ride.seats,
            });
        }

        let start_time = passenger_ride
            .and(driver_ride.start_time.concrete())
            .map(str::to_string);

        Ok(Resolution::Confirm {
            seats_needed,
            start_time,
        })
    }

    /// Pending → Confirmed | Rejected, nothing else
    pub fn transition(&mut self, to: BookingStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyResolved {
                id: self.id,
                status: self.status,
            });
        }
        if to == BookingStatus::Pending {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Committed result of a confirm attempt, with the rides as they were written
#[derive(Debug, Clone)]
pub struct Settlement {
    pub booking: Booking,
    pub driver_ride: Ride,
    pub passenger_ride: Option<Ride>,
    pub resolution: Resolution,
}
