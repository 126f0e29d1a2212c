use async_trait::async_trait;
use poputka_shared::{Role, User};
use tracing::debug;

use crate::repository::{BoxError, RideRepository};
use crate::CoreError;

#[derive(Debug, thiserror::Error)]
#[error("Session store unavailable: {0}")]
pub struct SessionError(#[source] pub BoxError);

/// Per-conversation state. Holds the role the user last picked, so that the
/// next candidate is interpreted from the right side.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn role(&self, conversation: i64) -> Result<Option<Role>, SessionError>;

    async fn set_role(&self, conversation: i64, role: Role) -> Result<(), SessionError>;

    async fn clear(&self, conversation: i64) -> Result<(), SessionError>;
}

/// Role for the user's next candidate.
///
/// The session value is authoritative. When it is missing (new process, expired
/// key) the user's latest ride seeds it once, falling back to passenger, and
/// the result is written back so later messages never touch ride history.
pub async fn resolve_role(
    sessions: &dyn SessionStore,
    repo: &dyn RideRepository,
    user: &User,
) -> Result<Role, CoreError> {
    if let Some(role) = sessions.role(user.external_id).await? {
        return Ok(role);
    }

    let role = repo
        .latest_role(user.id)
        .await?
        .unwrap_or(Role::Passenger);
    debug!("Seeding session role for user {} with {}", user.id, role);

    sessions.set_role(user.external_id, role).await?;
    Ok(role)
}
