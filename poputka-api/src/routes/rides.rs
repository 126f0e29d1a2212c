use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use chrono::{Duration, Utc};
use poputka_booking::ActionResult;
use poputka_shared::Ride;
use serde::{Deserialize, Serialize};

use super::users::known_user;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rides/drivers", get(recent_drivers))
        .route("/v1/rides/{ride_id}", delete(delete_ride))
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DriverListing {
    #[serde(flatten)]
    pub ride: Ride,
    pub contact: String,
}

async fn recent_drivers(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<Vec<DriverListing>>, AppError> {
    let days = query.days.unwrap_or(state.listing.recent_days);
    let limit = query.limit.unwrap_or(state.listing.limit);
    if days < 0 || limit < 0 {
        return Err(AppError::Validation(
            "days and limit must not be negative".to_string(),
        ));
    }

    let since = Duration::try_days(days)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| AppError::Validation(format!("days out of range: {}", days)))?;
    let listing = state
        .repo
        .list_recent_drivers(since, limit)
        .await?
        .into_iter()
        .map(|(ride, driver)| DriverListing {
            contact: driver.display_handle().to_string(),
            ride,
        })
        .collect();

    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub actor: i64,
}

async fn delete_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<i64>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<ActionResult>, AppError> {
    let actor = known_user(&state, query.actor).await?;
    let result = state.bookings.delete_ride(&actor, ride_id).await?;
    Ok(Json(result))
}
