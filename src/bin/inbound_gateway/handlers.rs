use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use followup_module::adapters::{ChatWebhook, EmailInboundPayload};
use followup_module::ingress::{process_inbound_event, InboundEvent, IngressOutcome};
use followup_module::Channel;

use super::state::GatewayState;
use super::verify::{verify_chat_signature, verify_chat_subscription, verify_email_signature};

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn ingest_email(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) =
        verify_email_signature(&headers, &body, state.config.email_webhook_secret.as_deref())
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "status": reason })));
    }

    let payload: EmailInboundPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({ "status": "bad_json" }))),
    };
    if payload.message_id.trim().is_empty() || payload.from.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "missing_fields" })),
        );
    }

    let text = payload
        .text_body
        .clone()
        .or_else(|| payload.subject.clone())
        .unwrap_or_default();
    let event = InboundEvent {
        channel: Channel::Email,
        provider_message_id: payload.message_id.clone(),
        sender_address: payload.from.clone(),
        text,
        subject: payload.subject.clone(),
    };

    // Store and queue clients are synchronous; keep them off the runtime
    // threads.
    let store = state.store.clone();
    let queue = state.queue.clone();
    let result =
        tokio::task::spawn_blocking(move || process_inbound_event(&store, &queue, &event)).await;

    match result {
        Ok(Ok(IngressOutcome::Accepted { inbound_id })) => (
            StatusCode::OK,
            Json(json!({ "status": "accepted", "inbound_id": inbound_id })),
        ),
        Ok(Ok(IngressOutcome::Duplicate)) => {
            (StatusCode::OK, Json(json!({ "status": "duplicate" })))
        }
        Ok(Ok(IngressOutcome::Ignored)) => (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": "unknown_sender" })),
        ),
        Ok(Err(err)) => {
            // Leave the failure visible to the provider so it retries.
            error!("gateway failed to persist email event: {}", err);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "store_failed" })),
            )
        }
        Err(err) => {
            error!("gateway worker panicked: {}", err);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "store_failed" })),
            )
        }
    }
}

/// Query parameters for the chat webhook subscription handshake.
#[derive(Debug, Deserialize)]
pub(super) struct ChatVerifyParams {
    #[serde(rename = "hub.mode")]
    pub hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub hub_challenge: Option<String>,
}

pub(super) async fn verify_chat_webhook(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ChatVerifyParams>,
) -> impl IntoResponse {
    match verify_chat_subscription(
        params.hub_mode.as_deref(),
        params.hub_verify_token.as_deref(),
        params.hub_challenge.as_deref(),
        state.config.chat_verify_token.as_deref(),
    ) {
        Ok(challenge) => (StatusCode::OK, challenge),
        Err(reason) => {
            info!("chat webhook verification failed: {}", reason);
            (StatusCode::FORBIDDEN, reason.to_string())
        }
    }
}

/// One provider request can batch several chat messages; each is processed
/// independently, so one bad event never rolls back its siblings.
pub(super) async fn ingest_chat(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) =
        verify_chat_signature(&headers, &body, state.config.chat_app_secret.as_deref())
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "status": reason })));
    }

    let webhook = match ChatWebhook::parse(&body) {
        Ok(webhook) => webhook,
        Err(err) => {
            warn!("gateway could not parse chat payload: {}", err);
            return (StatusCode::BAD_REQUEST, Json(json!({ "status": "bad_json" })));
        }
    };

    let messages = webhook.text_messages();
    if messages.is_empty() {
        return (StatusCode::OK, Json(json!({ "status": "ignored" })));
    }

    let store = state.store.clone();
    let queue = state.queue.clone();
    let total = messages.len();
    let worker = tokio::task::spawn_blocking(move || {
        let mut results = Vec::with_capacity(messages.len());
        let mut store_failures = 0usize;
        for message in &messages {
            let event = InboundEvent {
                channel: Channel::Chat,
                provider_message_id: message.provider_message_id.clone(),
                sender_address: message.sender.clone(),
                text: message.text.clone(),
                subject: None,
            };
            let status = match process_inbound_event(&store, &queue, &event) {
                Ok(IngressOutcome::Accepted { inbound_id }) => {
                    json!({ "id": message.provider_message_id, "status": "accepted", "inbound_id": inbound_id })
                }
                Ok(IngressOutcome::Duplicate) => {
                    json!({ "id": message.provider_message_id, "status": "duplicate" })
                }
                Ok(IngressOutcome::Ignored) => {
                    json!({ "id": message.provider_message_id, "status": "ignored", "reason": "unknown_sender" })
                }
                Err(err) => {
                    error!("gateway failed to persist chat event: {}", err);
                    store_failures += 1;
                    json!({ "id": message.provider_message_id, "status": "store_failed" })
                }
            };
            results.push(status);
        }
        (results, store_failures)
    })
    .await;

    let (results, store_failures) = match worker {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("gateway worker panicked: {}", err);
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "store_failed" })),
            );
        }
    };

    // Only signal failure when nothing was persisted; a partial batch has
    // durable rows whose retries must be suppressed.
    if store_failures == total {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "status": "store_failed", "results": results })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "status": "processed", "results": results })),
    )
}
