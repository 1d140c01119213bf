use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use mqhttp_protocol::topic::valid_topic_name;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::http::error::{ApiError, StatusBody};
use crate::http::AppState;
use crate::slot::Reading;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub message: String,
}

impl PublishRequest {
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let request: PublishRequest =
            serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if request.topic.is_empty() {
            return Err(ApiError::BadRequest("topic is required".into()));
        }
        if request.message.is_empty() {
            return Err(ApiError::BadRequest("message is required".into()));
        }
        if !valid_topic_name(&request.topic) {
            return Err(ApiError::BadRequest(format!(
                "topic must be at most {} bytes without wildcards",
                mqhttp_protocol::MAX_FIELD_LEN
            )));
        }
        Ok(request)
    }
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn ready() -> &'static str {
    "i am ready !"
}

pub async fn latest(State(state): State<AppState>) -> Json<Reading> {
    Json(state.slot.snapshot().await)
}

/// Body is read as raw bytes so a missing or odd content type still gets
/// the JSON treatment. Bodies over the configured limit get a 413.
pub async fn publish(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<StatusBody>), ApiError> {
    let received_at_us = Utc::now().timestamp_micros();
    info!(received_at_us, "http packet received");

    let body = body.map_err(|rejection| {
        warn!(error = %rejection, "unreadable publish body");
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(rejection.body_text()),
            _ => ApiError::BadRequest(rejection.body_text()),
        }
    })?;

    let request = PublishRequest::parse(&body).inspect_err(|e| {
        warn!(error = %e, "rejected publish request");
    })?;

    state.slot.set(request.topic.as_str(), request.message.as_str()).await;

    state
        .publisher
        .publish(
            &request.topic,
            state.publish_qos,
            false,
            Bytes::from(request.message.into_bytes()),
        )
        .await
        .map_err(|e| {
            error!(topic = %request.topic, error = %e, "publish to broker failed");
            ApiError::FailedDependency(e.to_string())
        })?;

    let sent_at_us = Utc::now().timestamp_micros();
    info!(topic = %request.topic, sent_at_us, "http packet sent");
    Ok((StatusCode::CREATED, Json(StatusBody::ok())))
}
