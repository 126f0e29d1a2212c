use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/notifications/stream", get(stream))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Only intents for this recipient
    pub recipient: Option<i64>,
}

async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sse_tx.subscribe();
    let recipient = query.recipient;

    let events = BroadcastStream::new(rx).filter_map(move |msg| async move {
        match msg {
            Ok(intent) if recipient.is_none_or(|r| r == intent.recipient) => {
                match Event::default().event("notification").json_data(&intent) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        warn!("Dropping unserializable notification: {}", e);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(e) => {
                // lagged receiver; the transport missed some intents
                warn!("Notification stream: {}", e);
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
