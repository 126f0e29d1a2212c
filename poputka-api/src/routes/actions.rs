use axum::{extract::State, routing::post, Json, Router};
use poputka_booking::ActionResult;
use poputka_shared::ActionRef;
use serde::Deserialize;
use tracing::debug;

use super::users::known_user;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/actions", post(execute))
}

/// A button press forwarded by the transport, payload untouched
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub actor: i64,
    pub action: ActionRef,
}

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ActionResult>, AppError> {
    let actor = known_user(&state, req.actor).await?;
    debug!("User {} pressed {}", actor.id, req.action);

    let result = state.bookings.execute(&actor, req.action).await?;
    Ok(Json(result))
}
