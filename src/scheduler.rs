use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::job_queue::{JobPayload, JobQueue};
use crate::store::{EventType, Store, StoreError};
use crate::worker::{sleep_interruptibly, WorkerControl};

/// One scheduler tick: atomically claim past-due pending tasks (marking them
/// `due`) and enqueue an execute job per claim. Returns the number of tasks
/// claimed.
///
/// The claim is exclusive across replicas, so a task fires exactly once; a
/// missed tick needs no catch-up state because the next tick claims whatever
/// is still pending with a past due time.
pub fn run_scheduler_tick(
    store: &Store,
    queue: &JobQueue,
    claim_limit: i64,
) -> Result<usize, StoreError> {
    let claimed = store.claim_due_tasks(claim_limit)?;
    if claimed.is_empty() {
        return Ok(0);
    }
    info!("scheduler claimed {} due task(s)", claimed.len());

    for task in &claimed {
        store.log_task_event(
            task.task_id,
            &task.user_id,
            EventType::Due,
            json!({ "due_at": task.due_at.map(|at| at.to_rfc3339()) }),
        );
        let payload = JobPayload::Execute {
            task_id: task.task_id,
        };
        let dedupe_key = format!("exec:{}", task.task_id);
        if let Err(err) = queue.enqueue(&payload, &dedupe_key) {
            error!(
                "failed to enqueue execute job for task {}: {}",
                task.task_id, err
            );
        }
    }
    Ok(claimed.len())
}

/// Cron-cadenced scheduler thread. The expression is pre-validated by config
/// loading; ticks never overlap because the loop runs them serially.
pub fn spawn_scheduler(
    config: Arc<PipelineConfig>,
    store: Arc<Store>,
    queue: Arc<JobQueue>,
) -> WorkerControl {
    let mut control = WorkerControl::new();
    let stop = control.stop_flag();
    let handle = thread::spawn(move || {
        let schedule = match cron::Schedule::from_str(&config.scheduler_cron) {
            Ok(schedule) => schedule,
            Err(err) => {
                error!("scheduler cron parse failed: {}", err);
                return;
            }
        };
        info!("scheduler started (cron: {})", config.scheduler_cron);

        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            let now = Utc::now();
            let Some(next_fire) = schedule.after(&now).next() else {
                error!("scheduler cron has no upcoming fire time");
                return;
            };
            let wait = (next_fire - now).to_std().unwrap_or(Duration::ZERO);
            if !sleep_interruptibly(wait, &stop) {
                break;
            }
            if let Err(err) = run_scheduler_tick(&store, &queue, config.scheduler_claim_limit) {
                error!("scheduler tick failed: {}", err);
            }
        }
        info!("scheduler stopped");
    });
    control.push(handle);
    control
}
