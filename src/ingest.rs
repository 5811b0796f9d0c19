use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::PipelineConfig;
use crate::extractor::{Extraction, Extractor};
use crate::job_queue::{JobKind, JobPayload, JobQueue};
use crate::redaction::redact;
use crate::store::{
    ActionType, EventType, InboundStatus, NewOutbox, NewTask, Preferences, Store, StoreError,
    TaskStatus, UserRecord,
};
use crate::worker::{sleep_interruptibly, WorkerControl};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Process one ingest job end to end: load the inbound event, extract a task
/// from its text, create the task and its confirmation (or clarification)
/// outbox row, and mark the inbound processed.
///
/// Any error fails the job so the queue retries it. Replays are safe: a
/// processed inbound no-ops, task creation is anchored on the inbound id,
/// and the outbox row is only created once per task.
pub fn process_ingest_job(
    store: &Store,
    extractor: &Extractor,
    inbound_id: Uuid,
) -> Result<(), IngestError> {
    let Some(inbound) = store.load_inbound(inbound_id)? else {
        warn!("ingest job for missing inbound {}", inbound_id);
        return Ok(());
    };
    if inbound.status == InboundStatus::Processed {
        return Ok(());
    }

    let Some(user) = store.load_user(&inbound.user_id)? else {
        warn!(
            "ingest job for inbound {} with missing user {}",
            inbound_id, inbound.user_id
        );
        return Ok(());
    };
    let preferences = store.load_preferences(&user.user_id)?;

    // Stored text is already scrubbed at ingress; scrub again so rows written
    // before a redaction-rule change never reach the extractor raw.
    let safe_text = redact(&inbound.raw_text_redacted);

    let extraction = match extractor.extract(&safe_text, &preferences.timezone, Utc::now()) {
        Ok(extraction) => extraction,
        Err(err) => {
            warn!(
                "extractor failed for inbound {}; asking for clarification: {}",
                inbound_id, err
            );
            Extraction::fallback(preferences.default_action)
        }
    };

    match extraction {
        Extraction::NeedsClarification {
            question,
            action_type,
            contact_hint,
            context,
        } => {
            let (task, created) = store.create_task_for_inbound(&NewTask {
                user_id: user.user_id.clone(),
                source_inbound_id: inbound.inbound_id,
                due_at: None,
                action_type,
                contact_hint,
                context,
                status: TaskStatus::NeedsClarification,
            })?;
            if created {
                store.log_task_event(task.task_id, &user.user_id, EventType::Created, json!({}));
                store.log_task_event(
                    task.task_id,
                    &user.user_id,
                    EventType::ClarificationSent,
                    json!({ "question": question }),
                );
            }
            if !store.outbox_exists_for_task(task.task_id)? {
                queue_user_message(
                    store,
                    &user,
                    inbound.channel,
                    &preferences,
                    task.task_id,
                    Some("Quick question about your follow-up".to_string()),
                    question,
                )?;
            }
        }
        Extraction::Scheduled {
            due_at,
            action_type,
            contact_hint,
            context,
        } => {
            let (task, created) = store.create_task_for_inbound(&NewTask {
                user_id: user.user_id.clone(),
                source_inbound_id: inbound.inbound_id,
                due_at: Some(due_at),
                action_type,
                contact_hint: contact_hint.clone(),
                context: context.clone(),
                status: TaskStatus::Pending,
            })?;
            if created {
                store.log_task_event(task.task_id, &user.user_id, EventType::Created, json!({}));
                store.log_task_event(
                    task.task_id,
                    &user.user_id,
                    EventType::Scheduled,
                    json!({ "due_at": due_at.to_rfc3339() }),
                );
            }
            if !store.outbox_exists_for_task(task.task_id)? {
                let body = confirmation_body(
                    action_type,
                    &contact_hint,
                    &context,
                    due_at,
                    &preferences.timezone,
                );
                queue_user_message(
                    store,
                    &user,
                    inbound.channel,
                    &preferences,
                    task.task_id,
                    Some("Follow-up scheduled".to_string()),
                    body,
                )?;
            }
        }
    }

    store.mark_inbound_processed(inbound.inbound_id)?;
    Ok(())
}

fn queue_user_message(
    store: &Store,
    user: &UserRecord,
    inbound_channel: Channel,
    preferences: &Preferences,
    task_id: Uuid,
    subject: Option<String>,
    body: String,
) -> Result<(), StoreError> {
    let Some((channel, recipient)) = resolve_recipient(user, inbound_channel, preferences) else {
        warn!(
            "user {} has no deliverable address; dropping message for task {}",
            user.user_id, task_id
        );
        return Ok(());
    };
    store.create_outbox(&NewOutbox {
        task_id: Some(task_id),
        user_id: user.user_id.clone(),
        channel,
        recipient,
        subject,
        body,
    })?;
    Ok(())
}

/// Prefer the channel the message arrived on; fall back to the user's
/// configured fallback channel.
pub fn resolve_recipient(
    user: &UserRecord,
    preferred: Channel,
    preferences: &Preferences,
) -> Option<(Channel, String)> {
    if let Some(address) = user.address_for(preferred) {
        return Some((preferred, address.to_string()));
    }
    let fallback = preferences.fallback_channel;
    user.address_for(fallback)
        .map(|address| (fallback, address.to_string()))
}

/// Human-readable confirmation for the scheduling of a task, with the due
/// instant rendered in the user's timezone.
pub fn confirmation_body(
    action_type: ActionType,
    contact_hint: &str,
    context: &str,
    due_at: DateTime<Utc>,
    timezone: &str,
) -> String {
    let when = format_in_timezone(due_at, timezone);
    let about = describe_followup(contact_hint, context);
    match action_type {
        ActionType::Remind => {
            format!("Got it! I'll remind you {about} on {when}.")
        }
        ActionType::RemindAndDraft => {
            format!("Got it! I'll remind you {about} on {when}, with a draft ready to send.")
        }
        ActionType::Send => {
            format!("Got it! I'll send your follow-up {about} on {when}.")
        }
    }
}

fn describe_followup(contact_hint: &str, context: &str) -> String {
    match (contact_hint.trim(), context.trim()) {
        ("", "") => "about this".to_string(),
        (contact, "") => format!("to follow up with {contact}"),
        ("", context) => format!("about {context}"),
        (contact, context) => format!("to follow up with {contact} about {context}"),
    }
}

pub fn format_in_timezone(instant: DateTime<Utc>, timezone: &str) -> String {
    let tz: chrono_tz::Tz = timezone.parse().unwrap_or(chrono_tz::Tz::UTC);
    instant
        .with_timezone(&tz)
        .format("%A, %B %-d at %-I:%M %p %Z")
        .to_string()
}

/// N polling workers draining the ingest queue.
pub fn spawn_ingest_workers(
    config: Arc<PipelineConfig>,
    store: Arc<Store>,
    queue: Arc<JobQueue>,
    extractor: Arc<Extractor>,
) -> WorkerControl {
    let mut control = WorkerControl::new();
    for worker_index in 0..config.ingest_worker_concurrency {
        let stop = control.stop_flag();
        let store = store.clone();
        let queue = queue.clone();
        let extractor = extractor.clone();
        let poll_interval = config.worker_poll_interval;
        let handle = thread::spawn(move || {
            info!("ingest worker {} started", worker_index);
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                match queue.claim_next(JobKind::Ingest) {
                    Ok(Some(job)) => {
                        let JobPayload::Ingest { inbound_id, .. } = job.payload else {
                            warn!("ingest worker claimed non-ingest job {}", job.job_id);
                            let _ = queue.mark_done(job.job_id);
                            continue;
                        };
                        match process_ingest_job(&store, &extractor, inbound_id) {
                            Ok(()) => {
                                if let Err(err) = queue.mark_done(job.job_id) {
                                    warn!("failed to mark ingest job done: {}", err);
                                }
                            }
                            Err(err) => {
                                warn!("ingest job {} failed: {}", job.job_id, err);
                                if let Err(mark_err) =
                                    queue.mark_failed(job.job_id, &err.to_string())
                                {
                                    warn!("failed to mark ingest job failed: {}", mark_err);
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        sleep_interruptibly(poll_interval, &stop);
                    }
                    Err(err) => {
                        warn!("ingest queue claim error: {}", err);
                        sleep_interruptibly(poll_interval, &stop);
                    }
                }
            }
            info!("ingest worker {} stopped", worker_index);
        });
        control.push(handle);
    }
    control
}
