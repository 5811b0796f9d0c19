use std::sync::Arc;
use std::thread;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use crate::adapters::OutboundRouter;
use crate::channel::OutboundDelivery;
use crate::config::PipelineConfig;
use crate::store::{EventType, SendFailureDisposition, Store, StoreError};
use crate::worker::{sleep_interruptibly, WorkerControl};

/// How many poll periods a `sending` claim may go untouched before the
/// sweeper decides its owner crashed.
const STUCK_SENDING_POLL_MULTIPLE: i64 = 10;
/// Tasks stranded in `executing` longer than this return to `due`.
const STUCK_EXECUTING_MINUTES: i64 = 10;

/// One sender poll: recover stuck claims, then claim sendable rows and
/// deliver them.
///
/// A successful send completes the linked task; a failed send re-queues the
/// row with exponential backoff until the attempt limit, at which point the
/// row and its task become terminally failed.
pub fn run_outbox_poll(
    store: &Store,
    router: &OutboundRouter,
    config: &PipelineConfig,
) -> Result<usize, StoreError> {
    sweep_stuck_claims(store, config)?;

    let claimed = store.claim_sendable_outbox(config.outbox_claim_limit)?;
    if claimed.is_empty() {
        return Ok(0);
    }
    info!("outbox sender claimed {} row(s)", claimed.len());

    for row in &claimed {
        let delivery = OutboundDelivery {
            channel: row.channel,
            to: row.recipient.clone(),
            subject: row.subject.clone(),
            body: row.body.clone(),
        };
        match router.adapter_for(row.channel).send(&delivery) {
            Ok(result) => {
                store.mark_outbox_sent(row.outbox_id)?;
                if let Some(task_id) = row.task_id {
                    store.log_task_event(
                        task_id,
                        &row.user_id,
                        EventType::Sent,
                        json!({ "provider_message_id": result.message_id }),
                    );
                    if store.mark_task_done(task_id)? {
                        store.log_task_event(task_id, &row.user_id, EventType::Done, json!({}));
                    }
                }
            }
            Err(err) => {
                warn!(
                    "send failed for outbox {} on {}: {}",
                    row.outbox_id, row.channel, err
                );
                let disposition =
                    store.record_send_failure(row.outbox_id, config.outbox_max_attempts)?;
                match disposition {
                    SendFailureDisposition::Requeued {
                        attempts,
                        next_retry_at,
                    } => {
                        if let Some(task_id) = row.task_id {
                            store.log_task_event(
                                task_id,
                                &row.user_id,
                                EventType::Retried,
                                json!({
                                    "attempts": attempts,
                                    "next_retry_at": next_retry_at.to_rfc3339(),
                                    "error": err.to_string(),
                                }),
                            );
                        }
                    }
                    SendFailureDisposition::Failed { attempts } => {
                        if let Some(task_id) = row.task_id {
                            store.mark_task_failed(task_id)?;
                            store.log_task_event(
                                task_id,
                                &row.user_id,
                                EventType::Failed,
                                json!({
                                    "attempts": attempts,
                                    "reason": err.to_string(),
                                }),
                            );
                        }
                    }
                }
            }
        }
    }
    Ok(claimed.len())
}

/// Crash recovery: rows left in `sending` (and tasks left in `executing`)
/// past their cutoff return to a claimable state.
fn sweep_stuck_claims(store: &Store, config: &PipelineConfig) -> Result<(), StoreError> {
    let sending_cutoff = Utc::now()
        - ChronoDuration::milliseconds(
            config.outbox_poll_interval.as_millis() as i64 * STUCK_SENDING_POLL_MULTIPLE,
        );
    let requeued = store.requeue_stuck_sending(sending_cutoff)?;
    if requeued > 0 {
        warn!("re-queued {} outbox row(s) stuck in sending", requeued);
    }

    let executing_cutoff = Utc::now() - ChronoDuration::minutes(STUCK_EXECUTING_MINUTES);
    let recovered = store.requeue_stuck_executing(executing_cutoff)?;
    if recovered > 0 {
        warn!("returned {} task(s) stuck in executing to due", recovered);
    }
    Ok(())
}

/// Single-threaded periodic sender; one inflight poll per process.
pub fn spawn_outbox_sender(
    config: Arc<PipelineConfig>,
    store: Arc<Store>,
    router: Arc<OutboundRouter>,
) -> WorkerControl {
    let mut control = WorkerControl::new();
    let stop = control.stop_flag();
    let handle = thread::spawn(move || {
        info!(
            "outbox sender started (poll interval: {:?})",
            config.outbox_poll_interval
        );
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            if let Err(err) = run_outbox_poll(&store, &router, &config) {
                error!("outbox poll failed: {}", err);
            }
            sleep_interruptibly(config.outbox_poll_interval, &stop);
        }
        info!("outbox sender stopped");
    });
    control.push(handle);
    control
}
