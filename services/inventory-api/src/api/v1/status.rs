use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StatusResponse {
    pub status: String,
    pub environment: String,
    pub version: String,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online".to_string(),
        environment: state.environment().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
