pub mod candidate;
pub mod corridor;
pub mod notify;
pub mod repository;
pub mod session;
pub mod templates;

pub use candidate::{parse_date, CandidateGap, RideCandidate, RideDraft};
pub use corridor::Corridor;
pub use notify::{dispatch, DeliveryError, DeliveryReport, Notifier, RecordingNotifier};
pub use repository::{PurgeReport, RepositoryError, RepositoryResult, RideRepository};
pub use session::{resolve_role, SessionError, SessionStore};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
