//! Provider webhooks: delivery status callbacks and inbound messages.
//!
//! Both arrive form-encoded.

use crate::rest::{ApiError, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use campaign_core::types::{InboundCommand, StatusCallback};
use campaign_core::{CampaignError, FieldError};
use campaign_store::UpsertOutcome;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct StatusAck {
    pub status: &'static str,
}

/// POST /twilio/status: message lifecycle update.
pub async fn status_callback(
    State(state): State<AppState>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Result<(StatusCode, Json<StatusAck>), ApiError> {
    let callback = status_from_form(&fields)?;
    let outcome = state.engine.reconcile(&callback).await?;
    let status = match outcome {
        UpsertOutcome::Updated => "updated",
        UpsertOutcome::Created => "created",
    };
    Ok((StatusCode::OK, Json(StatusAck { status })))
}

fn status_from_form(fields: &BTreeMap<String, String>) -> Result<StatusCallback, CampaignError> {
    let required = |name: &str| {
        fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let mut errors = Vec::new();
    let message_id = required("MessageSid");
    if message_id.is_none() {
        errors.push(FieldError::new("MessageSid", "required"));
    }
    let status = required("MessageStatus");
    if status.is_none() {
        errors.push(FieldError::new("MessageStatus", "required"));
    }
    match (message_id, status) {
        (Some(message_id), Some(status)) => Ok(StatusCallback {
            message_id,
            status,
            error_code: required("ErrorCode"),
            raw_payload: serde_json::to_value(fields)?,
        }),
        _ => Err(CampaignError::Validation(errors)),
    }
}

#[derive(Debug, Serialize)]
pub struct InboundAck {
    pub status: &'static str,
    pub command: Option<InboundCommand>,
    pub topic: Option<String>,
}

/// POST /twilio/inbound: message sent by a user to the business number.
pub async fn inbound_message(
    State(state): State<AppState>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Result<Json<InboundAck>, ApiError> {
    let from = fields.get("From").map(String::as_str).unwrap_or_default();
    if from.trim().is_empty() {
        return Err(ApiError(CampaignError::Validation(vec![FieldError::new(
            "From", "required",
        )])));
    }
    let body = fields.get("Body").map(String::as_str).unwrap_or_default();
    let event = state.engine.handle_inbound(from, body).await?;
    Ok(Json(InboundAck {
        status: "processed",
        command: event.command,
        topic: event.topic,
    }))
}
