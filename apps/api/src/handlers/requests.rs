use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use dlsgate_domain::{NewAccessRequest, RequestId};

use crate::dto::{AccessRequestResponse, SubmitAccessRequest};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn submit_request_handler(
    State(state): State<AppState>,
    Json(payload): Json<SubmitAccessRequest>,
) -> ApiResult<(StatusCode, Json<AccessRequestResponse>)> {
    let input = NewAccessRequest::new(payload.username, payload.index, payload.ticket_ref)?;
    let record = state.grant_manager.submit_request(input).await?;

    Ok((StatusCode::CREATED, Json(AccessRequestResponse::from(record))))
}

pub async fn list_requests_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AccessRequestResponse>>> {
    let requests = state
        .grant_manager
        .list_requests()
        .await?
        .into_iter()
        .map(AccessRequestResponse::from)
        .collect();

    Ok(Json(requests))
}

pub async fn get_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<AccessRequestResponse>> {
    let request_id = request_id.parse::<RequestId>()?;
    let record = state.grant_manager.get_request(request_id).await?;

    Ok(Json(AccessRequestResponse::from(record)))
}

pub async fn approve_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<AccessRequestResponse>> {
    let request_id = request_id.parse::<RequestId>()?;
    let record = state.grant_manager.approve(request_id).await?;

    Ok(Json(AccessRequestResponse::from(record)))
}

pub async fn revoke_request_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<AccessRequestResponse>> {
    let request_id = request_id.parse::<RequestId>()?;
    let record = state.grant_manager.revoke(request_id).await?;

    Ok(Json(AccessRequestResponse::from(record)))
}
