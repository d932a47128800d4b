use axum::{Json, extract::State};

use courier_types::api::StatsSnapshot;

use crate::state::AppState;

/// Delivery counters since startup and the number of open sockets.
pub async fn delivery_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.broker.snapshot())
}
