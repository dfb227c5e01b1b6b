use axum::{extract::State, http::StatusCode, Json};
use tracing::debug;

use super::super::AppState;
use crate::telegram::{self, Update};

/// `POST <webhook path>`: accept one update pushed by the Bot API.
///
/// The turn runs on a spawned task and the platform gets `200` at once,
/// so a slow assistant run never triggers a redelivery.
pub(crate) async fn receive_update(
    State(state): State<AppState>,
    Json(update): Json<Update>,
) -> StatusCode {
    debug!(update_id = update.update_id, "webhook update received");
    telegram::dispatch(state.relay.clone(), update);
    StatusCode::OK
}
