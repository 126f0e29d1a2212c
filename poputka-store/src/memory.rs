//! Process-local store used by tests and by deployments without Redis.
//!
//! Every operation takes one lock over the whole state, so the confirm path
//! is serialized the same way row locks serialize it in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use poputka_core::repository::{PurgeReport, RepositoryError, RepositoryResult, RideRepository};
use poputka_core::session::{SessionError, SessionStore};
use poputka_shared::{
    Booking, NewBooking, NewRide, Resolution, Ride, Role, Settlement, StartTime, User,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    users: BTreeMap<i64, User>,
    rides: BTreeMap<i64, Ride>,
    bookings: BTreeMap<i64, Booking>,
    next_user: i64,
    next_ride: i64,
    next_booking: i64,
}

impl State {
    fn with_owner(&self, ride: &Ride) -> Option<(Ride, User)> {
        self.users
            .get(&ride.user_id)
            .map(|u| (ride.clone(), u.clone()))
    }

    fn drop_bookings_of(&mut self, ride_id: i64) -> usize {
        let before = self.bookings.len();
        self.bookings
            .retain(|_, b| b.driver_ride_id != ride_id && b.passenger_ride_id != ride_id);
        before - self.bookings.len()
    }
}

#[derive(Default)]
pub struct InMemoryRideRepository {
    state: Mutex<State>,
}

impl InMemoryRideRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideRepository for InMemoryRideRepository {
    async fn upsert_user(&self, external_id: i64, handle: Option<&str>) -> RepositoryResult<User> {
        let mut state = self.state.lock().await;
        if let Some(user) = state
            .users
            .values_mut()
            .find(|u| u.external_id == external_id)
        {
            if let Some(h) = handle {
                user.handle = Some(h.to_string());
            }
            return Ok(user.clone());
        }

        state.next_user += 1;
        let user = User {
            id: state.next_user,
            external_id,
            handle: handle.map(str::to_string),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, external_id: i64) -> RepositoryResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn user_by_id(&self, id: i64) -> RepositoryResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn create_ride(&self, ride: NewRide) -> RepositoryResult<Ride> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&ride.user_id) {
            return Err(RepositoryError::NotFound {
                entity: "user",
                id: ride.user_id,
            });
        }
        state.next_ride += 1;
        let ride = ride.into_ride(state.next_ride);
        state.rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn get_ride(&self, id: i64) -> RepositoryResult<Option<Ride>> {
        Ok(self.state.lock().await.rides.get(&id).cloned())
    }

    async fn ride_owner(&self, ride_id: i64) -> RepositoryResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .rides
            .get(&ride_id)
            .and_then(|r| state.users.get(&r.user_id))
            .cloned())
    }

    async fn find_counterparts(
        &self,
        role: Role,
        date: NaiveDate,
        exclude_user: i64,
        require_seats: bool,
    ) -> RepositoryResult<Vec<(Ride, User)>> {
        let state = self.state.lock().await;
        let mut found: Vec<(Ride, User)> = state
            .rides
            .values()
            .filter(|r| r.role == role && r.ride_date == date && r.user_id != exclude_user)
            .filter(|r| !require_seats || r.has_capacity())
            .filter_map(|r| state.with_owner(r))
            .collect();
        found.sort_by_key(|(r, _)| (r.created_at, r.id));
        Ok(found)
    }

    async fn list_recent_drivers(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<(Ride, User)>> {
        let state = self.state.lock().await;
        let mut found: Vec<(Ride, User)> = state
            .rides
            .values()
            .filter(|r| r.role == Role::Driver && r.has_capacity() && r.created_at > since)
            .filter_map(|r| state.with_owner(r))
            .collect();
        found.sort_by(|(a, _), (b, _)| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn list_user_rides(&self, user_id: i64) -> RepositoryResult<Vec<Ride>> {
        let state = self.state.lock().await;
        let mut rides: Vec<Ride> = state
            .rides
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rides.sort_by(|a, b| (b.ride_date, b.created_at).cmp(&(a.ride_date, a.created_at)));
        Ok(rides)
    }

    async fn latest_role(&self, user_id: i64) -> RepositoryResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state
            .rides
            .values()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| (r.created_at, r.id))
            .map(|r| r.role))
    }

    async fn delete_ride(&self, ride_id: i64) -> RepositoryResult<bool> {
        let mut state = self.state.lock().await;
        if state.rides.remove(&ride_id).is_none() {
            return Ok(false);
        }
        state.drop_bookings_of(ride_id);
        Ok(true)
    }

    async fn create_booking(&self, booking: NewBooking) -> RepositoryResult<Booking> {
        let mut state = self.state.lock().await;
        for ride_id in [booking.driver_ride_id, booking.passenger_ride_id] {
            if !state.rides.contains_key(&ride_id) {
                return Err(RepositoryError::ride(ride_id));
            }
        }
        state.next_booking += 1;
        let booking = booking.into_booking(state.next_booking);
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, id: i64) -> RepositoryResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn settle_booking(&self, booking_id: i64) -> RepositoryResult<Settlement> {
        let mut state = self.state.lock().await;

        let mut booking = state
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| RepositoryError::booking(booking_id))?;
        let mut driver_ride = state
            .rides
            .get(&booking.driver_ride_id)
            .cloned()
            .ok_or_else(|| RepositoryError::ride(booking.driver_ride_id))?;
        let mut passenger_ride = state.rides.get(&booking.passenger_ride_id).cloned();

        let resolution = booking.resolve(&driver_ride, passenger_ride.as_ref())?;

        // Work on copies, then write everything back at once
        if let Resolution::Confirm {
            seats_needed,
            start_time,
        } = &resolution
        {
            if !driver_ride.take_seats(*seats_needed) {
                return Err(RepositoryError::Corrupt(format!(
                    "seat guard refused ride {} after locked read",
                    driver_ride.id
                )));
            }
            if let (Some(time), Some(passenger)) = (start_time, passenger_ride.as_mut()) {
                passenger.start_time = StartTime::At(time.clone());
            }
        }
        booking.transition(resolution.target_status())?;

        state.rides.insert(driver_ride.id, driver_ride.clone());
        if let Some(passenger) = &passenger_ride {
            state.rides.insert(passenger.id, passenger.clone());
        }
        state.bookings.insert(booking.id, booking.clone());

        Ok(Settlement {
            booking,
            driver_ride,
            passenger_ride,
            resolution,
        })
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> RepositoryResult<PurgeReport> {
        let mut state = self.state.lock().await;

        let before = state.bookings.len();
        state.bookings.retain(|_, b| b.created_at >= cutoff);
        let bookings = (before - state.bookings.len()) as u64;

        let stale: Vec<i64> = state
            .rides
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &stale {
            state.rides.remove(id);
            // mirrors ON DELETE CASCADE, not counted
            state.drop_bookings_of(*id);
        }

        Ok(PurgeReport {
            rides: stale.len() as u64,
            bookings,
        })
    }
}

/// Session store without expiry
#[derive(Default)]
pub struct InMemorySessionStore {
    roles: Mutex<HashMap<i64, Role>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn role(&self, conversation: i64) -> Result<Option<Role>, SessionError> {
        Ok(self.roles.lock().await.get(&conversation).copied())
    }

    async fn set_role(&self, conversation: i64, role: Role) -> Result<(), SessionError> {
        self.roles.lock().await.insert(conversation, role);
        Ok(())
    }

    async fn clear(&self, conversation: i64) -> Result<(), SessionError> {
        self.roles.lock().await.remove(&conversation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use poputka_core::resolve_role;
    use poputka_shared::{BookingStatus, TransitionError};
    use std::sync::Arc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 27).unwrap()
    }

    fn new_ride(user_id: i64, role: Role, seats: i32, created_at: DateTime<Utc>) -> NewRide {
        NewRide {
            user_id,
            role,
            origin: "Здравое".to_string(),
            destination: "Краснодар".to_string(),
            ride_date: date(),
            start_time: StartTime::At("9:00".to_string()),
            seats,
            created_at,
        }
    }

    fn booking(driver_ride_id: i64, passenger_ride_id: i64, proposed_by: i64) -> NewBooking {
        NewBooking {
            driver_ride_id,
            passenger_ride_id,
            proposed_by,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_user_keeps_id_and_refreshes_handle() {
        let repo = InMemoryRideRepository::new();
        let first = repo.upsert_user(100, Some("anna")).await.unwrap();
        let again = repo.upsert_user(100, None).await.unwrap();
        let renamed = repo.upsert_user(100, Some("anna_k")).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.handle.as_deref(), Some("anna"));
        assert_eq!(renamed.handle.as_deref(), Some("anna_k"));
    }

    #[tokio::test]
    async fn test_delete_ride_cascades_to_bookings() {
        let repo = InMemoryRideRepository::new();
        let d = repo.upsert_user(1, None).await.unwrap();
        let p = repo.upsert_user(2, None).await.unwrap();
        let dr = repo.create_ride(new_ride(d.id, Role::Driver, 3, Utc::now())).await.unwrap();
        let pr = repo.create_ride(new_ride(p.id, Role::Passenger, 1, Utc::now())).await.unwrap();
        let b = repo.create_booking(booking(dr.id, pr.id, d.id)).await.unwrap();

        assert!(repo.delete_ride(pr.id).await.unwrap());
        assert!(repo.get_booking(b.id).await.unwrap().is_none());
        assert!(repo.get_ride(dr.id).await.unwrap().is_some());
        assert!(!repo.delete_ride(pr.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_rows() {
        let repo = InMemoryRideRepository::new();
        let d = repo.upsert_user(1, None).await.unwrap();
        let p = repo.upsert_user(2, None).await.unwrap();
        let now = Utc::now();

        let old = repo
            .create_ride(new_ride(d.id, Role::Driver, 3, now - Duration::days(3)))
            .await
            .unwrap();
        let fresh = repo
            .create_ride(new_ride(p.id, Role::Passenger, 1, now - Duration::days(1)))
            .await
            .unwrap();
        // young booking pointing at an old ride goes with the ride
        let dangling = repo.create_booking(booking(old.id, fresh.id, d.id)).await.unwrap();

        let report = repo.purge_older_than(now - Duration::days(2)).await.unwrap();

        assert_eq!(report, PurgeReport { rides: 1, bookings: 0 });
        assert!(repo.get_ride(old.id).await.unwrap().is_none());
        assert!(repo.get_ride(fresh.id).await.unwrap().is_some());
        assert!(repo.get_booking(dangling.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counterparts_filter_role_date_owner_and_seats() {
        let repo = InMemoryRideRepository::new();
        let me = repo.upsert_user(1, None).await.unwrap();
        let other = repo.upsert_user(2, None).await.unwrap();
        let now = Utc::now();

        repo.create_ride(new_ride(me.id, Role::Driver, 3, now)).await.unwrap();
        let full = repo.create_ride(new_ride(other.id, Role::Driver, 1, now)).await.unwrap();
        let open = repo.create_ride(new_ride(other.id, Role::Driver, 2, now)).await.unwrap();
        let mut next_day = new_ride(other.id, Role::Driver, 2, now);
        next_day.ride_date = date().succ_opt().unwrap();
        repo.create_ride(next_day).await.unwrap();

        let pr = repo.create_ride(new_ride(me.id, Role::Passenger, 1, now)).await.unwrap();
        let b = repo.create_booking(booking(full.id, pr.id, me.id)).await.unwrap();
        repo.settle_booking(b.id).await.unwrap();

        let with_seats = repo
            .find_counterparts(Role::Driver, date(), me.id, true)
            .await
            .unwrap();
        let ids: Vec<i64> = with_seats.iter().map(|(r, _)| r.id).collect();
        assert_eq!(ids, vec![open.id]);

        let any = repo
            .find_counterparts(Role::Driver, date(), me.id, false)
            .await
            .unwrap();
        assert_eq!(any.len(), 2);
        assert_eq!(any[0].1.external_id, 2);
    }

    #[tokio::test]
    async fn test_recent_drivers_newest_first_with_limit() {
        let repo = InMemoryRideRepository::new();
        let d = repo.upsert_user(1, Some("driver")).await.unwrap();
        let now = Utc::now();

        repo.create_ride(new_ride(d.id, Role::Driver, 3, now - Duration::days(5)))
            .await
            .unwrap();
        let older = repo
            .create_ride(new_ride(d.id, Role::Driver, 3, now - Duration::hours(5)))
            .await
            .unwrap();
        let newer = repo
            .create_ride(new_ride(d.id, Role::Driver, 3, now - Duration::hours(1)))
            .await
            .unwrap();
        repo.create_ride(new_ride(d.id, Role::Passenger, 1, now))
            .await
            .unwrap();

        let since = now - Duration::days(2);
        let listed = repo.list_recent_drivers(since, 10).await.unwrap();
        let ids: Vec<i64> = listed.iter().map(|(r, _)| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        let limited = repo.list_recent_drivers(since, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_twice_is_already_resolved() {
        let repo = InMemoryRideRepository::new();
        let d = repo.upsert_user(1, None).await.unwrap();
        let p = repo.upsert_user(2, None).await.unwrap();
        let dr = repo.create_ride(new_ride(d.id, Role::Driver, 3, Utc::now())).await.unwrap();
        let pr = repo.create_ride(new_ride(p.id, Role::Passenger, 2, Utc::now())).await.unwrap();
        let b = repo.create_booking(booking(dr.id, pr.id, d.id)).await.unwrap();

        let settled = repo.settle_booking(b.id).await.unwrap();
        assert_eq!(settled.booking.status, BookingStatus::Confirmed);
        assert_eq!(settled.driver_ride.seats, 1);

        let err = repo.settle_booking(b.id).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Transition(TransitionError::AlreadyResolved { .. })
        ));
        assert_eq!(repo.get_ride(dr.id).await.unwrap().unwrap().seats, 1);
    }

    #[tokio::test]
    async fn test_settle_refuses_booking_without_a_passenger_ride() {
        let repo = InMemoryRideRepository::new();
        let d = repo.upsert_user(1, None).await.unwrap();
        let dr = repo.create_ride(new_ride(d.id, Role::Driver, 3, Utc::now())).await.unwrap();
        let b = repo.create_booking(booking(dr.id, dr.id, d.id)).await.unwrap();

        let err = repo.settle_booking(b.id).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Transition(TransitionError::MismatchedRides { .. })
        ));
        let stored = repo.get_ride(dr.id).await.unwrap().unwrap();
        assert_eq!((stored.seats, stored.role), (3, Role::Driver));
        assert_eq!(
            repo.get_booking(b.id).await.unwrap().unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_concurrent_settles_never_oversell() {
        let repo = Arc::new(InMemoryRideRepository::new());
        let d = repo.upsert_user(1, None).await.unwrap();
        let p1 = repo.upsert_user(2, None).await.unwrap();
        let p2 = repo.upsert_user(3, None).await.unwrap();
        let dr = repo.create_ride(new_ride(d.id, Role::Driver, 1, Utc::now())).await.unwrap();
        let pr1 = repo.create_ride(new_ride(p1.id, Role::Passenger, 1, Utc::now())).await.unwrap();
        let pr2 = repo.create_ride(new_ride(p2.id, Role::Passenger, 1, Utc::now())).await.unwrap();
        let b1 = repo.create_booking(booking(dr.id, pr1.id, d.id)).await.unwrap();
        let b2 = repo.create_booking(booking(dr.id, pr2.id, d.id)).await.unwrap();

        let (r1, r2) = tokio::join!(repo.settle_booking(b1.id), repo.settle_booking(b2.id));
        let statuses = [r1.unwrap().booking.status, r2.unwrap().booking.status];

        assert_eq!(
            statuses.iter().filter(|s| **s == BookingStatus::Confirmed).count(),
            1
        );
        assert_eq!(
            statuses.iter().filter(|s| **s == BookingStatus::Rejected).count(),
            1
        );
        assert_eq!(repo.get_ride(dr.id).await.unwrap().unwrap().seats, 0);
    }

    #[tokio::test]
    async fn test_resolve_role_seeds_session_from_history() {
        let repo = InMemoryRideRepository::new();
        let sessions = InMemorySessionStore::new();
        let u = repo.upsert_user(42, None).await.unwrap();

        assert_eq!(resolve_role(&sessions, &repo, &u).await.unwrap(), Role::Passenger);

        sessions.clear(42).await.unwrap();
        repo.create_ride(new_ride(u.id, Role::Driver, 3, Utc::now())).await.unwrap();
        assert_eq!(resolve_role(&sessions, &repo, &u).await.unwrap(), Role::Driver);
        assert_eq!(sessions.role(42).await.unwrap(), Some(Role::Driver));

        sessions.set_role(42, Role::Passenger).await.unwrap();
        assert_eq!(resolve_role(&sessions, &repo, &u).await.unwrap(), Role::Passenger);
    }
}
