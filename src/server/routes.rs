use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    checkin::CheckInRequest,
    registration::{Registration, RegistrationSummary},
    types::{ListOptions, Projection},
};

use super::{error::ApiError, state::AppState};

/// Registrations in the requested projection.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Listing {
    /// Complete records.
    Full(Vec<Registration>),
    /// Display fields only.
    Summary(Vec<RegistrationSummary>),
}

/// `GET /list` response body.
#[derive(Debug, Serialize)]
pub struct ListBody {
    /// Listed registrations.
    pub data: Listing,
}

/// `GET /list`, honouring `projection` and `order` query parameters.
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(options): Query<ListOptions>,
) -> Result<Json<ListBody>, ApiError> {
    let registrations = state.service.list(options).await?;

    let data = match options.projection {
        Projection::Full => Listing::Full(registrations),
        Projection::Summary => {
            Listing::Summary(registrations.iter().map(Registration::summary).collect())
        }
    };
    Ok(Json(ListBody { data }))
}

/// `POST /checkin`. Malformed bodies are treated like missing fields.
pub async fn checkin_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: CheckInRequest = serde_json::from_slice(&body).unwrap_or_default();
    let checked_in = state.service.check_in(&request).await?;

    Ok(Json(json!({
        "success": true,
        "data": checked_in.registration,
    })))
}

/// `GET /health`
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
