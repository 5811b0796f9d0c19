use std::sync::Arc;
use std::thread;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::drafter::{fallback_draft, Draft, Drafter};
use crate::ingest::resolve_recipient;
use crate::job_queue::{JobKind, JobPayload, JobQueue};
use crate::store::{
    ActionType, EventType, NewOutbox, Store, StoreError, TaskRecord, TaskStatus, Tone,
};
use crate::worker::{sleep_interruptibly, WorkerControl};

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Process one execute job: move the task from `due` through `executing` to
/// `sending`, producing the outbound message along the way.
///
/// Queue replays are harmless: the `status = 'due'` gate on the claim makes
/// a replayed job a no-op once the task has moved on.
pub fn process_execute_job(
    store: &Store,
    drafter: &Drafter,
    task_id: Uuid,
) -> Result<(), ExecuteError> {
    let Some(task) = store.load_task(task_id)? else {
        warn!("execute job for missing task {}", task_id);
        return Ok(());
    };
    if task.status != TaskStatus::Due {
        return Ok(());
    }
    if !store.begin_task_execution(task_id)? {
        // Another worker won the claim between load and update.
        return Ok(());
    }
    store.log_task_event(
        task_id,
        &task.user_id,
        EventType::Executing,
        json!({ "attempt": task.attempt_count + 1 }),
    );

    let Some(user) = store.load_user(&task.user_id)? else {
        warn!("execute job for task {} with missing user", task_id);
        return Ok(());
    };
    let preferences = store.load_preferences(&user.user_id)?;

    let source_channel = match task.source_inbound_id {
        Some(inbound_id) => store.load_inbound(inbound_id)?.map(|row| row.channel),
        None => None,
    };
    let channel = source_channel.unwrap_or(preferences.fallback_channel);

    let Some((channel, recipient)) = resolve_recipient(&user, channel, &preferences) else {
        warn!(
            "task {} has no deliverable address for user {}; failing",
            task_id, user.user_id
        );
        if store.mark_task_failed(task_id)? {
            store.log_task_event(
                task_id,
                &task.user_id,
                EventType::Failed,
                json!({ "reason": "no deliverable address" }),
            );
        }
        return Ok(());
    };

    let (subject, body) = build_outbound_message(store, drafter, &task, &user.display_name, preferences.tone);

    store.create_outbox(&NewOutbox {
        task_id: Some(task_id),
        user_id: user.user_id.clone(),
        channel,
        recipient,
        subject,
        body,
    })?;

    if store.mark_task_sending(task_id)? {
        store.log_task_event(task_id, &task.user_id, EventType::Sending, json!({}));
    }
    info!("task {} queued for delivery on {}", task_id, channel);
    Ok(())
}

/// Build `(subject, body)` for the task's action type. Drafter failures fall
/// back to a deterministic template so execution never stalls on the
/// language-model service.
fn build_outbound_message(
    store: &Store,
    drafter: &Drafter,
    task: &TaskRecord,
    display_name: &str,
    tone: Tone,
) -> (Option<String>, String) {
    match task.action_type {
        ActionType::Remind => (
            Some(reminder_subject(&task.contact_hint, &task.context)),
            reminder_body(display_name, &task.contact_hint, &task.context, tone),
        ),
        ActionType::RemindAndDraft => {
            let draft = obtain_draft(store, drafter, task, tone);
            let body = format!(
                "{}\n\nHere's a draft you can use:\n\n{}",
                reminder_body(display_name, &task.contact_hint, &task.context, tone),
                draft.body
            );
            (Some(draft.subject), body)
        }
        ActionType::Send => {
            let draft = obtain_draft(store, drafter, task, tone);
            (Some(draft.subject), draft.body)
        }
    }
}

fn obtain_draft(store: &Store, drafter: &Drafter, task: &TaskRecord, tone: Tone) -> Draft {
    match drafter.draft(&task.contact_hint, &task.context, tone) {
        Ok(draft) => {
            store.log_task_event(
                task.task_id,
                &task.user_id,
                EventType::DraftGenerated,
                json!({ "fallback": false }),
            );
            draft
        }
        Err(err) => {
            warn!(
                "drafter failed for task {}; using fallback template: {}",
                task.task_id, err
            );
            let draft = fallback_draft(&task.contact_hint, &task.context, tone);
            store.log_task_event(
                task.task_id,
                &task.user_id,
                EventType::DraftGenerated,
                json!({ "fallback": true }),
            );
            draft
        }
    }
}

fn reminder_subject(contact_hint: &str, context: &str) -> String {
    if !contact_hint.trim().is_empty() {
        format!("Reminder: follow up with {}", contact_hint.trim())
    } else if !context.trim().is_empty() {
        format!("Reminder: {}", context.trim())
    } else {
        "Reminder: follow up".to_string()
    }
}

fn reminder_body(display_name: &str, contact_hint: &str, context: &str, tone: Tone) -> String {
    let greeting = match (tone, display_name.trim()) {
        (Tone::Brief, _) | (_, "") => String::new(),
        (Tone::Friendly, name) => format!("Hi {name}!\n\n"),
        (Tone::Formal, name) => format!("Hello {name},\n\n"),
    };
    let who = if contact_hint.trim().is_empty() {
        "your contact".to_string()
    } else {
        contact_hint.trim().to_string()
    };
    let context_line = if context.trim().is_empty() {
        String::new()
    } else {
        format!(" Context: {}.", context.trim())
    };
    format!("{greeting}This is your reminder to follow up with {who}.{context_line}")
}

/// N polling workers draining the execute queue.
pub fn spawn_execute_workers(
    config: Arc<PipelineConfig>,
    store: Arc<Store>,
    queue: Arc<JobQueue>,
    drafter: Arc<Drafter>,
) -> WorkerControl {
    let mut control = WorkerControl::new();
    for worker_index in 0..config.execute_worker_concurrency {
        let stop = control.stop_flag();
        let store = store.clone();
        let queue = queue.clone();
        let drafter = drafter.clone();
        let poll_interval = config.worker_poll_interval;
        let handle = thread::spawn(move || {
            info!("execute worker {} started", worker_index);
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                match queue.claim_next(JobKind::Execute) {
                    Ok(Some(job)) => {
                        let JobPayload::Execute { task_id } = job.payload else {
                            warn!("execute worker claimed non-execute job {}", job.job_id);
                            let _ = queue.mark_done(job.job_id);
                            continue;
                        };
                        match process_execute_job(&store, &drafter, task_id) {
                            Ok(()) => {
                                if let Err(err) = queue.mark_done(job.job_id) {
                                    warn!("failed to mark execute job done: {}", err);
                                }
                            }
                            Err(err) => {
                                warn!("execute job {} failed: {}", job.job_id, err);
                                if let Err(mark_err) =
                                    queue.mark_failed(job.job_id, &err.to_string())
                                {
                                    warn!("failed to mark execute job failed: {}", mark_err);
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        sleep_interruptibly(poll_interval, &stop);
                    }
                    Err(err) => {
                        warn!("execute queue claim error: {}", err);
                        sleep_interruptibly(poll_interval, &stop);
                    }
                }
            }
            info!("execute worker {} stopped", worker_index);
        });
        control.push(handle);
    }
    control
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_subject_prefers_contact_then_context() {
        assert_eq!(
            reminder_subject("Raj", "Q3 numbers"),
            "Reminder: follow up with Raj"
        );
        assert_eq!(reminder_subject("", "Q3 numbers"), "Reminder: Q3 numbers");
        assert_eq!(reminder_subject("", ""), "Reminder: follow up");
    }

    #[test]
    fn reminder_body_respects_tone() {
        let friendly = reminder_body("Alice", "Raj", "Q3", Tone::Friendly);
        assert!(friendly.starts_with("Hi Alice!"));
        assert!(friendly.contains("follow up with Raj"));
        assert!(friendly.contains("Context: Q3."));

        let brief = reminder_body("Alice", "Raj", "", Tone::Brief);
        assert_eq!(brief, "This is your reminder to follow up with Raj.");
    }
}
