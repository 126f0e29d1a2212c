use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use poputka_core::{resolve_role, templates, RideCandidate};
use poputka_shared::{NotificationIntent, Ride, Role, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/users", post(register))
        .route("/v1/users/{external_id}/role", put(select_role))
        .route("/v1/users/{external_id}/candidates", post(submit_candidate))
        .route("/v1/users/{external_id}/rides", get(list_rides))
}

pub(crate) async fn known_user(state: &AppState, external_id: i64) -> Result<User, AppError> {
    state
        .repo
        .find_user(external_id)
        .await?
        .ok_or_else(|| AppError::unknown_user(external_id))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub external_id: i64,
    pub handle: Option<String>,
}

/// First contact (or a restart of the conversation). Any previously picked
/// role is forgotten.
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<User>, AppError> {
    let user = state
        .repo
        .upsert_user(req.external_id, req.handle.as_deref())
        .await?;
    state
        .sessions
        .clear(user.external_id)
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    info!("User {} registered as {}", user.id, user.masked_handle());
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub role: Role,
}

async fn select_role(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    let user = known_user(&state, external_id).await?;
    state
        .sessions
        .set_role(user.external_id, req.role)
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(Json(RoleResponse { role: req.role }))
}

/// Either the structured candidate, or the raw assistant reply it should be
/// cut out of.
#[derive(Debug, Deserialize)]
pub struct CandidateRequest {
    pub candidate: Option<RideCandidate>,
    pub assistant_reply: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CandidateResponse {
    pub saved: bool,
    pub role: Role,
    /// Text the transport should show the user
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride: Option<Ride>,
    pub notifications: Vec<NotificationIntent>,
}

async fn submit_candidate(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
    Json(req): Json<CandidateRequest>,
) -> Result<(StatusCode, Json<CandidateResponse>), AppError> {
    let candidate = match (req.candidate, req.assistant_reply) {
        (Some(candidate), _) => candidate,
        (None, Some(reply)) => RideCandidate::from_assistant_reply(&reply),
        (None, None) => {
            return Err(AppError::Validation(
                "either candidate or assistant_reply is required".to_string(),
            ))
        }
    };

    let user = known_user(&state, external_id).await?;
    let role = resolve_role(state.sessions.as_ref(), state.repo.as_ref(), &user).await?;
    let reply = candidate.reply.clone();

    let draft = match candidate.into_draft(role) {
        Ok(draft) => draft,
        Err(gap) => {
            info!("Candidate from user {} not saved: {}", user.id, gap);
            // A clarifying question from the assistant beats the generic retry prompt
            let prompt = reply.unwrap_or_else(|| templates::RIDE_NOT_SAVED.to_string());
            return Ok((
                StatusCode::OK,
                Json(CandidateResponse {
                    saved: false,
                    role,
                    prompt,
                    reason: Some(gap.to_string()),
                    ride: None,
                    notifications: Vec::new(),
                }),
            ));
        }
    };

    let posted = state.engine.post(&user, draft).await?;
    let prompt = match reply {
        Some(text) => format!("{}\n\n{}", text, templates::RIDE_SAVED),
        None => templates::RIDE_SAVED.to_string(),
    };

    Ok((
        StatusCode::CREATED,
        Json(CandidateResponse {
            saved: true,
            role,
            prompt,
            reason: None,
            ride: Some(posted.ride),
            notifications: posted.intents,
        }),
    ))
}

async fn list_rides(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Result<Json<Vec<Ride>>, AppError> {
    let user = known_user(&state, external_id).await?;
    let rides = state.repo.list_user_rides(user.id).await?;
    Ok(Json(rides))
}
