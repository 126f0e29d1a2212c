use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use poputka_core::repository::{PurgeReport, RepositoryError, RepositoryResult, RideRepository};
use poputka_shared::{
    Booking, BookingStatus, NewBooking, NewRide, Resolution, Ride, Role, Settlement, StartTime,
    User,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

pub struct PostgresRideRepository {
    pool: PgPool,
}

impl PostgresRideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db(err: sqlx::Error) -> RepositoryError {
    RepositoryError::unavailable(err)
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    external_id: i64,
    handle: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            external_id: row.external_id,
            handle: row.handle,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RideRow {
    id: i64,
    user_id: i64,
    role: String,
    origin: String,
    destination: String,
    ride_date: NaiveDate,
    start_time: Option<String>,
    initial_seats: i32,
    seats: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = RepositoryError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| RepositoryError::Corrupt(format!("ride {}: {}", row.id, e)))?;
        Ok(Ride {
            id: row.id,
            user_id: row.user_id,
            role,
            origin: row.origin,
            destination: row.destination,
            ride_date: row.ride_date,
            start_time: StartTime::from(row.start_time),
            initial_seats: row.initial_seats,
            seats: row.seats,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RideWithOwnerRow {
    #[sqlx(flatten)]
    ride: RideRow,
    owner_id: i64,
    owner_external_id: i64,
    owner_handle: Option<String>,
    owner_created_at: DateTime<Utc>,
}

impl TryFrom<RideWithOwnerRow> for (Ride, User) {
    type Error = RepositoryError;

    fn try_from(row: RideWithOwnerRow) -> Result<Self, Self::Error> {
        let user = User {
            id: row.owner_id,
            external_id: row.owner_external_id,
            handle: row.owner_handle,
            created_at: row.owner_created_at,
        };
        Ok((Ride::try_from(row.ride)?, user))
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    driver_ride_id: i64,
    passenger_ride_id: i64,
    proposed_by: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = RepositoryError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| RepositoryError::Corrupt(format!("booking {}: {}", row.id, e)))?;
        Ok(Booking {
            id: row.id,
            driver_ride_id: row.driver_ride_id,
            passenger_ride_id: row.passenger_ride_id,
            proposed_by: row.proposed_by,
            status,
            created_at: row.created_at,
        })
    }
}

const USER_COLUMNS: &str = "id, external_id, handle, created_at";
const RIDE_COLUMNS: &str =
    "id, user_id, role, origin, destination, ride_date, start_time, initial_seats, seats, created_at";
const RIDE_WITH_OWNER: &str = r#"
    SELECT r.id, r.user_id, r.role, r.origin, r.destination, r.ride_date, r.start_time,
           r.initial_seats, r.seats, r.created_at,
           u.id AS owner_id, u.external_id AS owner_external_id,
           u.handle AS owner_handle, u.created_at AS owner_created_at
    FROM rides r
    JOIN users u ON u.id = r.user_id
"#;
const BOOKING_COLUMNS: &str = "id, driver_ride_id, passenger_ride_id, proposed_by, status, created_at";

/// Fresh, locked read of a ride inside a transaction
async fn lock_ride(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> RepositoryResult<Option<Ride>> {
    let sql = format!("SELECT {} FROM rides WHERE id = $1 FOR UPDATE", RIDE_COLUMNS);
    let row = sqlx::query_as::<_, RideRow>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db)?;
    row.map(Ride::try_from).transpose()
}

#[async_trait]
impl RideRepository for PostgresRideRepository {
    async fn upsert_user(&self, external_id: i64, handle: Option<&str>) -> RepositoryResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (external_id, handle)
            VALUES ($1, $2)
            ON CONFLICT (external_id)
            DO UPDATE SET handle = COALESCE(EXCLUDED.handle, users.handle)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(external_id)
            .bind(handle)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.into())
    }

    async fn find_user(&self, external_id: i64) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE external_id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.map(User::from))
    }

    async fn user_by_id(&self, id: i64) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.map(User::from))
    }

    async fn create_ride(&self, ride: NewRide) -> RepositoryResult<Ride> {
        let start_time: Option<String> = ride.start_time.into();
        let sql = format!(
            r#"
            INSERT INTO rides (user_id, role, origin, destination, ride_date, start_time, initial_seats, seats, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8)
            RETURNING {}
            "#,
            RIDE_COLUMNS
        );
        let row = sqlx::query_as::<_, RideRow>(&sql)
            .bind(ride.user_id)
            .bind(ride.role.as_str())
            .bind(&ride.origin)
            .bind(&ride.destination)
            .bind(ride.ride_date)
            .bind(start_time)
            .bind(ride.seats)
            .bind(ride.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        Ride::try_from(row)
    }

    async fn get_ride(&self, id: i64) -> RepositoryResult<Option<Ride>> {
        let sql = format!("SELECT {} FROM rides WHERE id = $1", RIDE_COLUMNS);
        let row = sqlx::query_as::<_, RideRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(Ride::try_from).transpose()
    }

    async fn ride_owner(&self, ride_id: i64) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.external_id, u.handle, u.created_at
            FROM users u
            JOIN rides r ON r.user_id = u.id
            WHERE r.id = $1
            "#,
        )
        .bind(ride_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.map(User::from))
    }

    async fn find_counterparts(
        &self,
        role: Role,
        date: NaiveDate,
        exclude_user: i64,
        require_seats: bool,
    ) -> RepositoryResult<Vec<(Ride, User)>> {
        let sql = format!(
            r#"{}
            WHERE r.ride_date = $1
              AND r.role = $2
              AND r.user_id <> $3
              AND (NOT $4 OR r.seats > 0)
            ORDER BY r.created_at
            "#,
            RIDE_WITH_OWNER
        );
        let rows = sqlx::query_as::<_, RideWithOwnerRow>(&sql)
            .bind(date)
            .bind(role.as_str())
            .bind(exclude_user)
            .bind(require_seats)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.into_iter().map(<(Ride, User)>::try_from).collect()
    }

    async fn list_recent_drivers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<(Ride, User)>> {
        let sql = format!(
            r#"{}
            WHERE r.role = 'driver'
              AND r.seats > 0
              AND r.created_at > $1
            ORDER BY r.created_at DESC
            LIMIT $2
            "#,
            RIDE_WITH_OWNER
        );
        let rows = sqlx::query_as::<_, RideWithOwnerRow>(&sql)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.into_iter().map(<(Ride, User)>::try_from).collect()
    }

    async fn list_user_rides(&self, user_id: i64) -> RepositoryResult<Vec<Ride>> {
        let sql = format!(
            "SELECT {} FROM rides WHERE user_id = $1 ORDER BY ride_date DESC, created_at DESC",
            RIDE_COLUMNS
        );
        let rows = sqlx::query_as::<_, RideRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.into_iter().map(Ride::try_from).collect()
    }

    async fn latest_role(&self, user_id: i64) -> RepositoryResult<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM rides WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        role.map(|r| {
            r.parse::<Role>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    async fn delete_ride(&self, ride_id: i64) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        // Same lock order as settle_booking: bookings before rides
        sqlx::query(
            "SELECT id FROM bookings WHERE driver_ride_id = $1 OR passenger_ride_id = $1 \
             ORDER BY id FOR UPDATE",
        )
        .bind(ride_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if lock_ride(&mut tx, ride_id).await?.is_none() {
            return Ok(false);
        }

        let bookings = sqlx::query(
            "DELETE FROM bookings WHERE driver_ride_id = $1 OR passenger_ride_id = $1",
        )
        .bind(ride_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("DELETE FROM rides WHERE id = $1")
            .bind(ride_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;

        info!(
            "Deleted ride {} with {} bookings",
            ride_id,
            bookings.rows_affected()
        );
        Ok(true)
    }

    async fn create_booking(&self, booking: NewBooking) -> RepositoryResult<Booking> {
        let sql = format!(
            r#"
            INSERT INTO bookings (driver_ride_id, passenger_ride_id, proposed_by, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        );
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking.driver_ride_id)
            .bind(booking.passenger_ride_id)
            .bind(booking.proposed_by)
            .bind(BookingStatus::Pending.as_str())
            .bind(booking.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        Booking::try_from(row)
    }

    async fn get_booking(&self, id: i64) -> RepositoryResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(Booking::try_from).transpose()
    }

    async fn settle_booking(&self, booking_id: i64) -> RepositoryResult<Settlement> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        // Lock order: booking, driver ride, passenger ride
        let sql = format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        );
        let mut booking: Booking = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .ok_or_else(|| RepositoryError::booking(booking_id))
            .and_then(Booking::try_from)?;

        let mut driver_ride = lock_ride(&mut tx, booking.driver_ride_id)
            .await?
            .ok_or_else(|| RepositoryError::ride(booking.driver_ride_id))?;
        let mut passenger_ride = lock_ride(&mut tx, booking.passenger_ride_id).await?;

        let resolution = booking.resolve(&driver_ride, passenger_ride.as_ref())?;

        match &resolution {
            Resolution::Confirm {
                seats_needed,
                start_time,
            } => {
                let updated = sqlx::query(
                    "UPDATE rides SET seats = seats - $2 WHERE id = $1 AND seats >= $2",
                )
                .bind(driver_ride.id)
                .bind(*seats_needed)
                .execute(&mut *tx)
                .await
                .map_err(db)?;

                if updated.rows_affected() != 1 {
                    // unreachable while the row lock is held
                    return Err(RepositoryError::Corrupt(format!(
                        "seat guard refused ride {} after locked read",
                        driver_ride.id
                    )));
                }
                driver_ride.take_seats(*seats_needed);

                if let (Some(time), Some(passenger)) = (start_time, passenger_ride.as_mut()) {
                    sqlx::query("UPDATE rides SET start_time = $2 WHERE id = $1")
                        .bind(passenger.id)
                        .bind(time)
                        .execute(&mut *tx)
                        .await
                        .map_err(db)?;
                    passenger.start_time = StartTime::At(time.clone());
                }
            }
            Resolution::Reject {
                seats_needed,
                available,
            } => {
                warn!(
                    "Booking {} rejected: needs {} seats, ride {} has {}",
                    booking.id, seats_needed, driver_ride.id, available
                );
            }
        }

        booking.transition(resolution.target_status())?;
        sqlx::query("UPDATE bookings SET status = $2 WHERE id = $1")
            .bind(booking.id)
            .bind(booking.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;

        Ok(Settlement {
            booking,
            driver_ride,
            passenger_ride,
            resolution,
        })
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> RepositoryResult<PurgeReport> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let bookings = sqlx::query("DELETE FROM bookings WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        // bookings younger than the cutoff go with their ride via ON DELETE CASCADE
        let rides = sqlx::query("DELETE FROM rides WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;

        Ok(PurgeReport {
            rides: rides.rows_affected(),
            bookings: bookings.rows_affected(),
        })
    }
}
