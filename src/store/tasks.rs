use std::str::FromStr;

use chrono::{DateTime, Utc};
use postgres::Row;
use uuid::Uuid;

use super::types::{ActionType, TaskRecord, TaskStatus};
use super::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: String,
    pub source_inbound_id: Uuid,
    pub due_at: Option<DateTime<Utc>>,
    pub action_type: ActionType,
    pub contact_hint: String,
    pub context: String,
    pub status: TaskStatus,
}

/// Row projection returned by the scheduler claim.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task_id: Uuid,
    pub user_id: String,
    pub due_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Create the task for an inbound event. `source_inbound_id` is the
    /// idempotence anchor: a replayed ingest job finds the existing row and
    /// returns it with `created = false` instead of creating a second task.
    pub fn create_task_for_inbound(
        &self,
        task: &NewTask,
    ) -> Result<(TaskRecord, bool), StoreError> {
        let task_id = Uuid::new_v4();
        let mut conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT INTO tasks
                 (task_id, user_id, source_inbound_id, due_at, action_type,
                  contact_hint, context, status, attempt_count, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, now())
             ON CONFLICT (source_inbound_id) DO NOTHING",
            &[
                &task_id,
                &task.user_id,
                &task.source_inbound_id,
                &task.due_at,
                &task.action_type.as_str(),
                &task.contact_hint,
                &task.context,
                &task.status.as_str(),
            ],
        )?;
        let row = conn
            .query_opt(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE source_inbound_id = $1"),
                &[&task.source_inbound_id],
            )?
            .ok_or_else(|| StoreError::Data("task missing after insert".to_string()))?;
        Ok((task_from_row(row)?, inserted > 0))
    }

    pub fn load_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1"),
            &[&task_id],
        )?;
        row.map(task_from_row).transpose()
    }

    /// Atomically claim up to `limit` past-due pending tasks and mark them
    /// `due`. The skip-locked select guarantees no task is returned by two
    /// concurrent claims across replicas. Results come back in `due_at`
    /// order.
    pub fn claim_due_tasks(&self, limit: i64) -> Result<Vec<ClaimedTask>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            "UPDATE tasks SET status = 'due', updated_at = now()
             WHERE task_id IN (
                 SELECT task_id FROM tasks
                 WHERE status = 'pending' AND due_at <= now()
                 ORDER BY due_at
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED)
             RETURNING task_id, user_id, due_at",
            &[&limit],
        )?;
        let mut claimed: Vec<ClaimedTask> = rows
            .into_iter()
            .map(|row| ClaimedTask {
                task_id: row.get(0),
                user_id: row.get(1),
                due_at: row.get(2),
            })
            .collect();
        claimed.sort_by_key(|task| task.due_at);
        Ok(claimed)
    }

    /// `due -> executing`, bumping the attempt counters. Returns false when
    /// the task is no longer `due` (queue replay, concurrent worker).
    pub fn begin_task_execution(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE tasks SET status = 'executing',
                 attempt_count = attempt_count + 1,
                 last_attempt_at = now(),
                 updated_at = now()
             WHERE task_id = $1 AND status = 'due'",
            &[&task_id],
        )?;
        Ok(updated > 0)
    }

    pub fn mark_task_sending(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE tasks SET status = 'sending', updated_at = now()
             WHERE task_id = $1 AND status = 'executing'",
            &[&task_id],
        )?;
        Ok(updated > 0)
    }

    pub fn mark_task_done(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE tasks SET status = 'done', updated_at = now()
             WHERE task_id = $1 AND status = 'sending'",
            &[&task_id],
        )?;
        Ok(updated > 0)
    }

    pub fn mark_task_failed(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE tasks SET status = 'failed', updated_at = now()
             WHERE task_id = $1 AND status IN ('sending', 'executing')",
            &[&task_id],
        )?;
        Ok(updated > 0)
    }

    /// Admin retry: `failed -> due` with a reset attempt counter.
    pub fn retry_failed_task(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE tasks SET status = 'due', attempt_count = 0, updated_at = now()
             WHERE task_id = $1 AND status = 'failed'",
            &[&task_id],
        )?;
        Ok(updated > 0)
    }

    pub fn list_failed_tasks(&self, limit: i64) -> Result<Vec<TaskRecord>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status = 'failed' ORDER BY updated_at DESC LIMIT $1"
            ),
            &[&limit],
        )?;
        rows.into_iter().map(task_from_row).collect()
    }

    /// Stuck-claim sweep: tasks stranded in `executing` by a crashed worker
    /// go back to `due`; the execute job's retry re-delivers them.
    pub fn requeue_stuck_executing(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE tasks SET status = 'due', updated_at = now()
             WHERE status = 'executing' AND updated_at < $1",
            &[&cutoff],
        )?;
        Ok(updated)
    }
}

const TASK_COLUMNS: &str = "task_id, user_id, source_inbound_id, due_at, action_type, \
                            contact_hint, context, status, attempt_count, last_attempt_at, \
                            updated_at";

fn task_from_row(row: Row) -> Result<TaskRecord, StoreError> {
    let action_type: String = row.get(4);
    let status: String = row.get(7);
    Ok(TaskRecord {
        task_id: row.get(0),
        user_id: row.get(1),
        source_inbound_id: row.get(2),
        due_at: row.get(3),
        action_type: ActionType::from_str(&action_type).map_err(StoreError::Data)?,
        contact_hint: row.get(5),
        context: row.get(6),
        status: TaskStatus::from_str(&status).map_err(StoreError::Data)?,
        attempt_count: row.get(8),
        last_attempt_at: row.get(9),
        updated_at: row.get(10),
    })
}
