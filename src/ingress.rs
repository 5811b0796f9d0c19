use tracing::{error, info};
use uuid::Uuid;

use crate::channel::Channel;
use crate::job_queue::{JobPayload, JobQueue};
use crate::redaction::redact;
use crate::store::{NewInbound, Store, StoreError};

/// One validated inbound payload, channel-agnostic.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel: Channel,
    pub provider_message_id: String,
    pub sender_address: String,
    pub text: String,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    Accepted { inbound_id: Uuid },
    Duplicate,
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accept one inbound event: resolve the user, deduplicate, persist, and
/// hand off to the ingest queue.
///
/// The inbound row is the durable hand-off point. If enqueueing fails after
/// the insert the event is still reported accepted (the provider must not
/// retry a persisted event); the job-queue dedupe key makes later
/// re-enqueueing safe.
pub fn process_inbound_event(
    store: &Store,
    queue: &JobQueue,
    event: &InboundEvent,
) -> Result<IngressOutcome, IngressError> {
    let Some(user) = store.find_user_by_address(event.channel, &event.sender_address)? else {
        info!(
            "ignoring {} event from unknown sender {}",
            event.channel, event.sender_address
        );
        return Ok(IngressOutcome::Ignored);
    };

    let idempotency_key = format!("{}:{}", user.user_id, event.provider_message_id);
    let inbound = NewInbound {
        user_id: user.user_id.clone(),
        channel: event.channel,
        provider_message_id: event.provider_message_id.clone(),
        idempotency_key: idempotency_key.clone(),
        raw_text_redacted: redact(&event.text),
    };

    let Some(inbound_id) = store.insert_inbound(&inbound)? else {
        info!("duplicate inbound event key={}", idempotency_key);
        return Ok(IngressOutcome::Duplicate);
    };

    let payload = JobPayload::Ingest {
        inbound_id,
        user_id: user.user_id.clone(),
    };
    if let Err(err) = queue.enqueue(&payload, &idempotency_key) {
        error!(
            "failed to enqueue ingest job for inbound {}: {}",
            inbound_id, err
        );
    }

    Ok(IngressOutcome::Accepted { inbound_id })
}
