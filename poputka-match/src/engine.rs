use chrono::Utc;
use poputka_core::notify::{dispatch, DeliveryReport, Notifier};
use poputka_core::repository::{RepositoryError, RideRepository};
use poputka_core::{templates, Corridor, RideDraft};
use poputka_shared::{ActionRef, NewRide, NotificationIntent, Ride, Role, User};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A freshly persisted ride and the fan-out it produced
#[derive(Debug, Clone, Serialize)]
pub struct PostedRide {
    pub ride: Ride,
    pub intents: Vec<NotificationIntent>,
    #[serde(skip)]
    pub delivery: DeliveryReport,
}

/// Persists rides and finds the counterparts that should hear about them
pub struct MatchingEngine {
    repo: Arc<dyn RideRepository>,
    notifier: Arc<dyn Notifier>,
    corridor: Corridor,
}

impl MatchingEngine {
    pub fn new(
        repo: Arc<dyn RideRepository>,
        notifier: Arc<dyn Notifier>,
        corridor: Corridor,
    ) -> Self {
        Self {
            repo,
            notifier,
            corridor,
        }
    }

    /// Saves the draft as a ride owned by `user`, then notifies every
    /// compatible counterpart. Delivery problems are reported, never raised:
    /// the ride stays saved either way.
    pub async fn post(&self, user: &User, draft: RideDraft) -> Result<PostedRide, MatchError> {
        let ride = self
            .repo
            .create_ride(NewRide {
                user_id: user.id,
                role: draft.role,
                origin: draft.origin,
                destination: draft.destination,
                ride_date: draft.ride_date,
                start_time: draft.start_time,
                seats: draft.seats,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            "Ride {} saved for {} ({}, {} -> {}, {})",
            ride.id,
            user.masked_handle(),
            ride.role,
            ride.origin,
            ride.destination,
            ride.ride_date
        );

        let intents = self.on_new_ride(&ride, user).await?;
        let delivery = dispatch(self.notifier.as_ref(), &intents).await;

        Ok(PostedRide {
            ride,
            intents,
            delivery,
        })
    }

    /// Notification intents caused by a new ride.
    ///
    /// A driver ride produces one intent per compatible passenger, all
    /// addressed to the driver. A passenger ride produces one intent per
    /// compatible driver with free seats, addressed to that driver. Either
    /// way the action proposes taking the passenger.
    pub async fn on_new_ride(
        &self,
        ride: &Ride,
        user: &User,
    ) -> Result<Vec<NotificationIntent>, MatchError> {
        let intents = match ride.role {
            Role::Driver => self.passengers_for_driver(ride, user).await?,
            Role::Passenger => self.drivers_for_passenger(ride, user).await?,
        };
        debug!("Ride {} matched {} counterparts", ride.id, intents.len());
        Ok(intents)
    }

    async fn passengers_for_driver(
        &self,
        driver_ride: &Ride,
        driver: &User,
    ) -> Result<Vec<NotificationIntent>, MatchError> {
        if !driver_ride.has_capacity() {
            return Ok(Vec::new());
        }

        let passengers = self
            .repo
            .find_counterparts(Role::Passenger, driver_ride.ride_date, driver.id, false)
            .await?;

        Ok(passengers
            .into_iter()
            .filter(|(p, _)| self.covers(driver_ride, p))
            .map(|(p, owner)| {
                NotificationIntent::new(
                    driver.external_id,
                    templates::passenger_on_the_way(&p, &owner),
                )
                .with_action(ActionRef::Take {
                    passenger_ride_id: p.id,
                    driver_ride_id: driver_ride.id,
                })
            })
            .collect())
    }

    async fn drivers_for_passenger(
        &self,
        passenger_ride: &Ride,
        passenger: &User,
    ) -> Result<Vec<NotificationIntent>, MatchError> {
        let drivers = self
            .repo
            .find_counterparts(Role::Driver, passenger_ride.ride_date, passenger.id, true)
            .await?;

        Ok(drivers
            .into_iter()
            .filter(|(d, _)| self.covers(d, passenger_ride))
            .map(|(d, owner)| {
                NotificationIntent::new(
                    owner.external_id,
                    templates::passenger_for_you(passenger_ride, passenger),
                )
                .with_action(ActionRef::Take {
                    passenger_ride_id: passenger_ride.id,
                    driver_ride_id: d.id,
                })
            })
            .collect())
    }

    fn covers(&self, driver_ride: &Ride, passenger_ride: &Ride) -> bool {
        self.corridor.compatible(
            &driver_ride.origin,
            &driver_ride.destination,
            &passenger_ride.origin,
            &passenger_ride.destination,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use poputka_core::RecordingNotifier;
    use poputka_shared::StartTime;
    use poputka_store::InMemoryRideRepository;

    struct Fixture {
        repo: Arc<InMemoryRideRepository>,
        notifier: Arc<RecordingNotifier>,
        engine: MatchingEngine,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRideRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = MatchingEngine::new(repo.clone(), notifier.clone(), Corridor::default());
        Fixture {
            repo,
            notifier,
            engine,
        }
    }

    fn draft(role: Role, origin: &str, destination: &str, seats: i32) -> RideDraft {
        RideDraft {
            role,
            origin: origin.to_string(),
            destination: destination.to_string(),
            ride_date: NaiveDate::from_ymd_opt(2025, 12, 27).unwrap(),
            start_time: StartTime::At("10:00".to_string()),
            seats,
        }
    }

    #[tokio::test]
    async fn test_passenger_post_notifies_covering_drivers_only() {
        let f = fixture();
        let d1 = f.repo.upsert_user(10, Some("d1")).await.unwrap();
        let d2 = f.repo.upsert_user(20, Some("d2")).await.unwrap();
        let p = f.repo.upsert_user(30, Some("pax")).await.unwrap();

        let forward = f
            .engine
            .post(&d1, draft(Role::Driver, "Здравое", "Краснодар", 3))
            .await
            .unwrap();
        f.engine
            .post(&d2, draft(Role::Driver, "Краснодар", "Здравое", 3))
            .await
            .unwrap();

        let posted = f
            .engine
            .post(&p, draft(Role::Passenger, "Григорьевская", "Энем", 1))
            .await
            .unwrap();

        assert_eq!(posted.intents.len(), 1);
        let intent = &posted.intents[0];
        assert_eq!(intent.recipient, 10);
        assert_eq!(
            intent.action,
            Some(ActionRef::Take {
                passenger_ride_id: posted.ride.id,
                driver_ride_id: forward.ride.id,
            })
        );
        assert!(intent.text.contains("@pax"));
        assert_eq!(f.notifier.sent_to(10).await.len(), 1);
        assert!(f.notifier.sent_to(20).await.is_empty());
    }

    #[tokio::test]
    async fn test_driver_post_notifies_the_driver_per_passenger() {
        let f = fixture();
        let p1 = f.repo.upsert_user(1, None).await.unwrap();
        let p2 = f.repo.upsert_user(2, None).await.unwrap();
        let d = f.repo.upsert_user(3, None).await.unwrap();

        f.engine
            .post(&p1, draft(Role::Passenger, "Григорьевская", "Энем", 1))
            .await
            .unwrap();
        f.engine
            .post(&p2, draft(Role::Passenger, "Смоленская", "Краснодар", 2))
            .await
            .unwrap();

        let posted = f
            .engine
            .post(&d, draft(Role::Driver, "Здравое", "Краснодар", 3))
            .await
            .unwrap();

        assert_eq!(posted.intents.len(), 2);
        assert!(posted.intents.iter().all(|i| i.recipient == 3));
        assert_eq!(posted.delivery.delivered, 2);
    }

    #[tokio::test]
    async fn test_own_rides_and_full_drivers_are_skipped() {
        let f = fixture();
        let same = f.repo.upsert_user(1, None).await.unwrap();
        let p = f.repo.upsert_user(2, None).await.unwrap();

        f.engine
            .post(&same, draft(Role::Passenger, "Григорьевская", "Энем", 1))
            .await
            .unwrap();
        // same user on both sides never matches itself
        let own = f
            .engine
            .post(&same, draft(Role::Driver, "Здравое", "Краснодар", 3))
            .await
            .unwrap();
        assert!(own.intents.is_empty());

        let mut full = f.repo.get_ride(own.ride.id).await.unwrap().unwrap();
        full.seats = 0;
        let none = f
            .engine
            .on_new_ride(&full, &same)
            .await
            .unwrap();
        assert!(none.is_empty());

        let other = f
            .engine
            .post(&p, draft(Role::Passenger, "Григорьевская", "Энем", 1))
            .await
            .unwrap();
        assert_eq!(other.intents.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_places_fall_back_to_text_containment() {
        let f = fixture();
        let d = f.repo.upsert_user(1, None).await.unwrap();
        let p = f.repo.upsert_user(2, None).await.unwrap();

        f.engine
            .post(&d, draft(Role::Driver, "Москва, центр", "Тула", 2))
            .await
            .unwrap();
        let posted = f
            .engine
            .post(&p, draft(Role::Passenger, "москва", "тула", 1))
            .await
            .unwrap();

        assert_eq!(posted.intents.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_recipient_keeps_ride() {
        let f = fixture();
        let d = f.repo.upsert_user(1, None).await.unwrap();
        let p = f.repo.upsert_user(2, None).await.unwrap();
        f.notifier.block(1).await;

        f.engine
            .post(&d, draft(Role::Driver, "Здравое", "Краснодар", 3))
            .await
            .unwrap();
        let posted = f
            .engine
            .post(&p, draft(Role::Passenger, "Энем", "Краснодар", 1))
            .await
            .unwrap();

        assert_eq!(posted.delivery.failed, 1);
        assert!(f.repo.get_ride(posted.ride.id).await.unwrap().is_some());
    }
}
