use chrono::Utc;
use poputka_core::notify::{dispatch, DeliveryReport, Notifier};
use poputka_core::repository::{RepositoryError, RideRepository};
use poputka_core::templates;
use poputka_shared::{
    ActionRef, Booking, NewBooking, NotificationIntent, Resolution, Role, TransitionError, User,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{entity} {id} no longer exists")]
    Stale { entity: &'static str, id: i64 },

    #[error("User {actor} is not a party to {entity} {id}")]
    Forbidden {
        actor: i64,
        entity: &'static str,
        id: i64,
    },

    #[error(transparent)]
    AlreadyResolved(TransitionError),

    #[error("Storage unavailable: {0}")]
    Unavailable(#[source] RepositoryError),
}

impl From<RepositoryError> for BookingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => BookingError::Stale { entity, id },
            RepositoryError::Transition(t) => BookingError::AlreadyResolved(t),
            other => BookingError::Unavailable(other),
        }
    }
}

/// What an action did, as reported back to the actor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Proposed {
        booking: Booking,
    },
    SeatsExhausted {
        driver_ride_id: i64,
    },
    Confirmed {
        booking: Booking,
        seats_taken: i32,
    },
    Rejected {
        booking: Booking,
        seats_needed: i32,
        available: i32,
    },
    Deleted {
        ride_id: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    pub intents: Vec<NotificationIntent>,
    #[serde(skip)]
    pub delivery: DeliveryReport,
}

/// Two-phase booking over driver seat inventory.
///
/// `propose` opens a pending booking without reserving anything. `confirm`
/// settles it inside the store's confirm transaction, which either takes the
/// seats or rejects the booking. Both outcomes are terminal.
pub struct BookingService {
    repo: Arc<dyn RideRepository>,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
    pub fn new(repo: Arc<dyn RideRepository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { repo, notifier }
    }

    /// Runs an action reference on behalf of `actor`
    pub async fn execute(
        &self,
        actor: &User,
        action: ActionRef,
    ) -> Result<ActionResult, BookingError> {
        match action {
            ActionRef::Take {
                passenger_ride_id,
                driver_ride_id,
            } => self.propose(actor, passenger_ride_id, driver_ride_id).await,
            ActionRef::Confirm { booking_id } => self.confirm(actor, booking_id).await,
            ActionRef::Delete { ride_id } => self.delete_ride(actor, ride_id).await,
        }
    }

    pub async fn propose(
        &self,
        actor: &User,
        passenger_ride_id: i64,
        driver_ride_id: i64,
    ) -> Result<ActionResult, BookingError> {
        let passenger_ride = self
            .repo
            .get_ride(passenger_ride_id)
            .await?
            .filter(|ride| ride.role == Role::Passenger && ride.id != driver_ride_id)
            .ok_or(BookingError::Stale {
                entity: "passenger ride",
                id: passenger_ride_id,
            })?;
        let driver_ride = match self.repo.get_ride(driver_ride_id).await? {
            Some(ride) if ride.role != Role::Driver => {
                return Err(BookingError::Stale {
                    entity: "driver ride",
                    id: driver_ride_id,
                })
            }
            found => found,
        };

        let is_party = actor.id == passenger_ride.user_id
            || driver_ride.as_ref().is_some_and(|d| d.user_id == actor.id);
        if !is_party {
            return Err(BookingError::Forbidden {
                actor: actor.external_id,
                entity: "ride",
                id: driver_ride_id,
            });
        }

        // Capacity gate only. Nothing is held until confirm.
        let driver_ride = match driver_ride {
            Some(ride) if ride.has_capacity() => ride,
            _ => {
                info!("Take on ride {} refused: no seats left", driver_ride_id);
                let intents = vec![NotificationIntent::new(
                    actor.external_id,
                    templates::SEATS_EXHAUSTED,
                )];
                return Ok(self
                    .finish(ActionOutcome::SeatsExhausted { driver_ride_id }, intents)
                    .await);
            }
        };

        let booking = self
            .repo
            .create_booking(NewBooking {
                driver_ride_id,
                passenger_ride_id,
                proposed_by: actor.id,
                created_at: Utc::now(),
            })
            .await?;
        info!(
            "Booking {} opened by {} ({} -> {})",
            booking.id,
            actor.masked_handle(),
            driver_ride_id,
            passenger_ride_id
        );

        let mut intents = Vec::new();
        let passenger = self.repo.ride_owner(passenger_ride_id).await?;
        let driver = self.repo.ride_owner(driver_ride_id).await?;
        if let (Some(passenger), Some(driver)) = (passenger, driver) {
            intents.push(
                NotificationIntent::new(
                    passenger.external_id,
                    templates::driver_ready(&driver_ride, &driver),
                )
                .with_action(ActionRef::Confirm {
                    booking_id: booking.id,
                }),
            );
        }

        Ok(self
            .finish(ActionOutcome::Proposed { booking }, intents)
            .await)
    }

    pub async fn confirm(
        &self,
        actor: &User,
        booking_id: i64,
    ) -> Result<ActionResult, BookingError> {
        let booking = self
            .repo
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::Stale {
                entity: "booking",
                id: booking_id,
            })?;

        if let Some(passenger_ride) = self.repo.get_ride(booking.passenger_ride_id).await? {
            if passenger_ride.user_id != actor.id {
                return Err(BookingError::Forbidden {
                    actor: actor.external_id,
                    entity: "booking",
                    id: booking_id,
                });
            }
        }

        let settlement = self.repo.settle_booking(booking_id).await?;

        let mut intents = Vec::new();
        let outcome = match settlement.resolution {
            Resolution::Confirm { seats_needed, .. } => {
                info!(
                    "Booking {} confirmed, ride {} has {} seats left",
                    booking_id, settlement.driver_ride.id, settlement.driver_ride.seats
                );
                if let Some(driver) = self.repo.ride_owner(settlement.driver_ride.id).await? {
                    intents.push(NotificationIntent::new(
                        driver.external_id,
                        templates::booking_confirmed(seats_needed),
                    ));
                }
                ActionOutcome::Confirmed {
                    booking: settlement.booking,
                    seats_taken: seats_needed,
                }
            }
            Resolution::Reject {
                seats_needed,
                available,
            } => {
                warn!(
                    "Booking {} rejected: needs {}, {} available",
                    booking_id, seats_needed, available
                );
                let proposer = self.repo.user_by_id(settlement.booking.proposed_by).await?;
                if let Some(proposer) = proposer {
                    intents.push(NotificationIntent::new(
                        proposer.external_id,
                        templates::booking_rejected(seats_needed, available),
                    ));
                }
                ActionOutcome::Rejected {
                    booking: settlement.booking,
                    seats_needed,
                    available,
                }
            }
        };

        Ok(self.finish(outcome, intents).await)
    }

    /// Removes the actor's ride together with every booking that references it
    pub async fn delete_ride(
        &self,
        actor: &User,
        ride_id: i64,
    ) -> Result<ActionResult, BookingError> {
        let stale = BookingError::Stale {
            entity: "ride",
            id: ride_id,
        };
        let ride = match self.repo.get_ride(ride_id).await? {
            Some(ride) => ride,
            None => return Err(stale),
        };
        if ride.user_id != actor.id {
            return Err(BookingError::Forbidden {
                actor: actor.external_id,
                entity: "ride",
                id: ride_id,
            });
        }
        if !self.repo.delete_ride(ride_id).await? {
            return Err(stale);
        }

        Ok(self
            .finish(ActionOutcome::Deleted { ride_id }, Vec::new())
            .await)
    }

    async fn finish(
        &self,
        outcome: ActionOutcome,
        intents: Vec<NotificationIntent>,
    ) -> ActionResult {
        let delivery = dispatch(self.notifier.as_ref(), &intents).await;
        ActionResult {
            outcome,
            intents,
            delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use poputka_core::{Corridor, RecordingNotifier, RideDraft};
    use poputka_match::MatchingEngine;
    use poputka_shared::{BookingStatus, Ride, StartTime};
    use poputka_store::InMemoryRideRepository;

    struct Fixture {
        repo: Arc<InMemoryRideRepository>,
        notifier: Arc<RecordingNotifier>,
        engine: MatchingEngine,
        bookings: BookingService,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRideRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        Fixture {
            engine: MatchingEngine::new(repo.clone(), notifier.clone(), Corridor::default()),
            bookings: BookingService::new(repo.clone(), notifier.clone()),
            repo,
            notifier,
        }
    }

    fn draft(
        role: Role,
        origin: &str,
        destination: &str,
        start: StartTime,
        seats: i32,
    ) -> RideDraft {
        RideDraft {
            role,
            origin: origin.to_string(),
            destination: destination.to_string(),
            ride_date: NaiveDate::from_ymd_opt(2025, 12, 27).unwrap(),
            start_time: start,
            seats,
        }
    }

    fn loose(role: Role, origin: &str, destination: &str, seats: i32) -> RideDraft {
        draft(role, origin, destination, StartTime::ByArrangement, seats)
    }

    impl Fixture {
        async fn post(&self, user: &User, draft: RideDraft) -> Ride {
            self.engine.post(user, draft).await.unwrap().ride
        }

        async fn seats(&self, ride_id: i64) -> i32 {
            self.repo.get_ride(ride_id).await.unwrap().unwrap().seats
        }
    }

    fn booking_of(result: &ActionResult) -> &Booking {
        match &result.outcome {
            ActionOutcome::Proposed { booking }
            | ActionOutcome::Confirmed { booking, .. }
            | ActionOutcome::Rejected { booking, .. } => booking,
            other => panic!("no booking in {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_take_and_confirm() {
        let f = fixture();
        let driver = f.repo.upsert_user(100, Some("ivan")).await.unwrap();
        let passenger = f.repo.upsert_user(200, Some("olga")).await.unwrap();

        let dr = f
            .post(
                &driver,
                draft(Role::Driver, "Здравое", "Краснодар", StartTime::At("10:00".into()), 3),
            )
            .await;
        let posted = f
            .engine
            .post(
                &passenger,
                loose(Role::Passenger, "Григорьевская", "Энем", 1),
            )
            .await
            .unwrap();
        let pr = posted.ride;

        let take = posted.intents[0].action.unwrap();
        assert_eq!(
            take,
            ActionRef::Take {
                passenger_ride_id: pr.id,
                driver_ride_id: dr.id
            }
        );

        let proposed = f.bookings.execute(&driver, take).await.unwrap();
        let booking = booking_of(&proposed).clone();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(f.seats(dr.id).await, 3);

        let to_passenger = f.notifier.sent_to(200).await;
        assert_eq!(to_passenger.len(), 1);
        let confirm = to_passenger[0].action.unwrap();
        assert_eq!(confirm, ActionRef::Confirm { booking_id: booking.id });

        let confirmed = f.bookings.execute(&passenger, confirm).await.unwrap();
        assert!(matches!(
            confirmed.outcome,
            ActionOutcome::Confirmed { seats_taken: 1, .. }
        ));

        assert_eq!(f.seats(dr.id).await, 2);
        let pr = f.repo.get_ride(pr.id).await.unwrap().unwrap();
        assert_eq!(pr.start_time, StartTime::At("10:00".into()));
        let stored = f.repo.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);

        let to_driver = f.notifier.sent_to(100).await;
        assert!(to_driver.last().unwrap().text.contains("Занято мест: 1"));
    }

    #[tokio::test]
    async fn test_second_confirm_is_rejected_without_changes() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 3))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 2))
            .await;

        let proposed = f.bookings.propose(&driver, pr.id, dr.id).await.unwrap();
        let id = booking_of(&proposed).id;
        f.bookings.confirm(&passenger, id).await.unwrap();

        let err = f.bookings.confirm(&passenger, id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::AlreadyResolved(TransitionError::AlreadyResolved { .. })
        ));
        assert_eq!(f.seats(dr.id).await, 1);
    }

    #[tokio::test]
    async fn test_confirm_rejects_when_seats_ran_out() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 2))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 3))
            .await;

        let proposed = f.bookings.propose(&passenger, pr.id, dr.id).await.unwrap();
        let result = f
            .bookings
            .confirm(&passenger, booking_of(&proposed).id)
            .await
            .unwrap();

        assert!(matches!(
            result.outcome,
            ActionOutcome::Rejected {
                seats_needed: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(f.seats(dr.id).await, 2);
        // the proposer hears about it
        assert_eq!(result.intents[0].recipient, 2);
        let pr = f.repo.get_ride(pr.id).await.unwrap().unwrap();
        assert_eq!(pr.start_time, StartTime::ByArrangement);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_for_last_seat() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let p1 = f.repo.upsert_user(2, None).await.unwrap();
        let p2 = f.repo.upsert_user(3, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 1))
            .await;
        let pr1 = f
            .post(&p1, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;
        let pr2 = f
            .post(&p2, loose(Role::Passenger, "Афипский", "Краснодар", 1))
            .await;

        let b1 = booking_of(&f.bookings.propose(&driver, pr1.id, dr.id).await.unwrap()).id;
        let b2 = booking_of(&f.bookings.propose(&driver, pr2.id, dr.id).await.unwrap()).id;

        let (r1, r2) = tokio::join!(f.bookings.confirm(&p1, b1), f.bookings.confirm(&p2, b2));
        let outcomes = [r1.unwrap().outcome, r2.unwrap().outcome];

        let confirmed = outcomes
            .iter()
            .filter(|o| matches!(o, ActionOutcome::Confirmed { .. }))
            .count();
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, ActionOutcome::Rejected { .. }))
            .count();
        assert_eq!((confirmed, rejected), (1, 1));
        assert_eq!(f.seats(dr.id).await, 0);
    }

    #[tokio::test]
    async fn test_take_on_full_or_missing_driver_ride() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 1))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;

        let id = booking_of(&f.bookings.propose(&driver, pr.id, dr.id).await.unwrap()).id;
        f.bookings.confirm(&passenger, id).await.unwrap();

        let full = f.bookings.propose(&driver, pr.id, dr.id).await.unwrap();
        assert_eq!(
            full.outcome,
            ActionOutcome::SeatsExhausted {
                driver_ride_id: dr.id
            }
        );
        assert_eq!(full.intents[0].text, templates::SEATS_EXHAUSTED);

        let missing = f.bookings.propose(&passenger, pr.id, 9999).await.unwrap();
        assert!(matches!(missing.outcome, ActionOutcome::SeatsExhausted { .. }));

        let err = f.bookings.propose(&driver, 9999, dr.id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Stale {
                entity: "passenger ride",
                id: 9999
            }
        ));
    }

    #[tokio::test]
    async fn test_take_needs_one_driver_and_one_passenger_ride() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 3))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;

        let same = ActionRef::Take {
            passenger_ride_id: dr.id,
            driver_ride_id: dr.id,
        };
        let err = f.bookings.execute(&driver, same).await.unwrap_err();
        assert!(matches!(err, BookingError::Stale { entity: "passenger ride", .. }));

        let swapped = f.bookings.propose(&driver, dr.id, pr.id).await.unwrap_err();
        assert!(matches!(swapped, BookingError::Stale { entity: "passenger ride", .. }));

        let two_passengers = f.bookings.propose(&passenger, pr.id, pr.id).await.unwrap_err();
        assert!(matches!(two_passengers, BookingError::Stale { .. }));

        let other = f
            .post(&driver, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;
        let wrong_driver = f.bookings.propose(&passenger, pr.id, other.id).await.unwrap_err();
        assert!(matches!(wrong_driver, BookingError::Stale { entity: "driver ride", .. }));

        assert_eq!(f.seats(dr.id).await, 3);
        assert!(f.repo.get_booking(1).await.unwrap().is_none());
        assert!(f.notifier.sent_to(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_stranger_on_full_ride_is_forbidden() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let stranger = f.repo.upsert_user(3, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 1))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;
        let id = booking_of(&f.bookings.propose(&driver, pr.id, dr.id).await.unwrap()).id;
        f.bookings.confirm(&passenger, id).await.unwrap();

        let err = f.bookings.propose(&stranger, pr.id, dr.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden { .. }));
        let err = f.bookings.propose(&stranger, pr.id, 9999).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden { .. }));
        assert!(f.notifier.sent_to(3).await.is_empty());
    }

    #[tokio::test]
    async fn test_outsiders_cannot_take_confirm_or_delete() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let stranger = f.repo.upsert_user(3, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 3))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;

        let err = f.bookings.propose(&stranger, pr.id, dr.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden { .. }));

        let id = booking_of(&f.bookings.propose(&driver, pr.id, dr.id).await.unwrap()).id;
        // only the passenger side confirms
        let err = f.bookings.confirm(&driver, id).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden { .. }));

        let err = f.bookings.delete_ride(&stranger, dr.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden { .. }));
        assert_eq!(f.seats(dr.id).await, 3);
    }

    #[tokio::test]
    async fn test_delete_ride_drops_pending_bookings() {
        let f = fixture();
        let driver = f.repo.upsert_user(1, None).await.unwrap();
        let passenger = f.repo.upsert_user(2, None).await.unwrap();
        let dr = f
            .post(&driver, loose(Role::Driver, "Здравое", "Краснодар", 3))
            .await;
        let pr = f
            .post(&passenger, loose(Role::Passenger, "Энем", "Краснодар", 1))
            .await;
        let id = booking_of(&f.bookings.propose(&driver, pr.id, dr.id).await.unwrap()).id;

        let result = f
            .bookings
            .execute(&driver, ActionRef::Delete { ride_id: dr.id })
            .await
            .unwrap();
        assert_eq!(result.outcome, ActionOutcome::Deleted { ride_id: dr.id });
        assert!(f.repo.get_booking(id).await.unwrap().is_none());

        let err = f.bookings.confirm(&passenger, id).await.unwrap_err();
        assert!(matches!(err, BookingError::Stale { entity: "booking", .. }));

        let err = f.bookings.delete_ride(&driver, dr.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Stale { .. }));
    }
}
