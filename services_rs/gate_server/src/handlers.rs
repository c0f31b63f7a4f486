use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "env": state.env_name,
        "base_url": state.base_url,
    }))
}

pub async fn api_not_found() -> ApiError {
    ApiError::not_found()
}
