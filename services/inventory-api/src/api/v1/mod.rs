//! API v1 routes.

mod components;
mod machines;
mod status;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status::get_status))
        .nest("/components", components::routes())
        // Machine components: /v1/machines/{machine_id}/components
        .nest("/machines", machines::routes())
}
