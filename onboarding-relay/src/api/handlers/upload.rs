//! The onboarding upload endpoint.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::{
    AppState,
    api::models::upload::LivenessResponse,
    config::DeliveryMode,
    email::EmailService,
    errors::Result,
    submission::Submission,
    webhook,
};

#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "upload",
    summary = "Submit onboarding form",
    description = "Relay a multipart onboarding submission (text fields and photos) to the configured webhook or by email.",
    request_body(
        content_type = "multipart/form-data",
        description = "Client details as text fields, photos as file parts"
    ),
    responses(
        (status = 200, description = "Submission relayed", body = String, content_type = "text/plain"),
        (status = 413, description = "Attachments too large"),
        (status = 500, description = "Missing server configuration or relay failure"),
    )
)]
#[tracing::instrument(skip_all, fields(delivery = %state.config.delivery))]
pub async fn upload(State(state): State<AppState>, method: Method, headers: HeaderMap, body: Body) -> Result<Response> {
    let limits = state.parse_limits();

    match state.config.delivery {
        DeliveryMode::Webhook => {
            // Configuration is checked before a single byte of the body is read
            let url = state.config.webhook.target()?;
            let submission = Submission::read(Submission::reader(&headers, body, limits)?, limits).await?;
            let payload = webhook::build_payload(submission, Utc::now())?;
            webhook::send(&state.http_client, &url, &payload).await?;
        }
        DeliveryMode::Email => {
            let service = EmailService::new(&state.config.email)?;
            let submission = Submission::read(Submission::reader(&headers, body, limits)?, limits).await?;
            service.send_submission(submission).await?;
        }
        DeliveryMode::Liveness => return Ok(liveness(method).await.into_response()),
    }

    tracing::info!("Submission relayed");
    Ok("OK".into_response())
}

#[utoipa::path(
    options,
    path = "/api/upload",
    tag = "upload",
    summary = "CORS preflight",
    responses(
        (status = 204, description = "Preflight accepted"),
    )
)]
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Answers any method in the liveness variant without touching the body.
pub async fn liveness(method: Method) -> Json<LivenessResponse> {
    Json(LivenessResponse::for_method(method.as_str()))
}
