use poputka_booking::BookingService;
use poputka_core::{Corridor, Notifier, RideRepository, SessionStore};
use poputka_match::MatchingEngine;
use poputka_shared::NotificationIntent;
use poputka_store::app_config::ListingConfig;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::notifier::BroadcastNotifier;

const NOTIFICATION_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn RideRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub engine: Arc<MatchingEngine>,
    pub bookings: Arc<BookingService>,
    pub listing: ListingConfig,
    pub sse_tx: broadcast::Sender<NotificationIntent>,
}

impl AppState {
    /// Notifications go out over the SSE stream
    pub fn new(
        repo: Arc<dyn RideRepository>,
        sessions: Arc<dyn SessionStore>,
        corridor: Corridor,
        listing: ListingConfig,
    ) -> Self {
        let (sse_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let notifier = Arc::new(BroadcastNotifier::new(sse_tx.clone()));
        Self::with_notifier(repo, sessions, notifier, sse_tx, corridor, listing)
    }

    pub fn with_notifier(
        repo: Arc<dyn RideRepository>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        sse_tx: broadcast::Sender<NotificationIntent>,
        corridor: Corridor,
        listing: ListingConfig,
    ) -> Self {
        Self {
            engine: Arc::new(MatchingEngine::new(repo.clone(), notifier.clone(), corridor)),
            bookings: Arc::new(BookingService::new(repo.clone(), notifier)),
            repo,
            sessions,
            listing,
            sse_tx,
        }
    }
}
