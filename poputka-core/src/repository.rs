use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use poputka_shared::{Booking, NewBooking, NewRide, Ride, Role, Settlement, TransitionError, User};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(#[source] BoxError),
}

impl RepositoryError {
    pub fn ride(id: i64) -> Self {
        RepositoryError::NotFound { entity: "ride", id }
    }

    pub fn booking(id: i64) -> Self {
        RepositoryError::NotFound {
            entity: "booking",
            id,
        }
    }

    pub fn unavailable<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepositoryError::Unavailable(Box::new(err))
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub rides: u64,
    pub bookings: u64,
}

/// Transactional access to users, rides and bookings
#[async_trait]
pub trait RideRepository: Send + Sync {
    /// Creates the user on first contact, refreshes the handle afterwards
    async fn upsert_user(&self, external_id: i64, handle: Option<&str>) -> RepositoryResult<User>;

    async fn find_user(&self, external_id: i64) -> RepositoryResult<Option<User>>;

    async fn user_by_id(&self, id: i64) -> RepositoryResult<Option<User>>;

    async fn create_ride(&self, ride: NewRide) -> RepositoryResult<Ride>;

    async fn get_ride(&self, id: i64) -> RepositoryResult<Option<Ride>>;

    /// Owner of a ride, if both still exist
    async fn ride_owner(&self, ride_id: i64) -> RepositoryResult<Option<User>>;

    /// Rides of `role` on `date` owned by anyone but `exclude_user`.
    /// With `require_seats` only rides with `seats > 0` are returned.
    async fn find_counterparts(
        &self,
        role: Role,
        date: NaiveDate,
        exclude_user: i64,
        require_seats: bool,
    ) -> RepositoryResult<Vec<(Ride, User)>>;

    /// Driver rides with free seats created after `since`, newest first
    async fn list_recent_drivers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<(Ride, User)>>;

    /// All rides of a user, latest ride date first
    async fn list_user_rides(&self, user_id: i64) -> RepositoryResult<Vec<Ride>>;

    /// Role of the user's most recently created ride
    async fn latest_role(&self, user_id: i64) -> RepositoryResult<Option<Role>>;

    /// Deletes the ride and every booking that references it, atomically.
    /// Returns false when the ride was already gone.
    async fn delete_ride(&self, ride_id: i64) -> RepositoryResult<bool>;

    async fn create_booking(&self, booking: NewBooking) -> RepositoryResult<Booking>;

    async fn get_booking(&self, id: i64) -> RepositoryResult<Option<Booking>>;

    /// Confirm transaction: re-reads the booking and both rides, decides via
    /// [`Booking::resolve`], then writes status, seat decrement and the
    /// passenger's start time together. A capacity shortfall commits the
    /// booking as rejected and leaves the seats untouched.
    async fn settle_booking(&self, booking_id: i64) -> RepositoryResult<Settlement>;

    /// Deletes rides and bookings created before `cutoff`
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> RepositoryResult<PurgeReport>;
}
