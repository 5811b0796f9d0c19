use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use postgres::Row;
use uuid::Uuid;

use crate::channel::Channel;

use super::types::{OutboxRecord, OutboxStatus};
use super::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct NewOutbox {
    pub task_id: Option<Uuid>,
    pub user_id: String,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
}

/// What happened to an outbox row after a failed send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailureDisposition {
    Requeued {
        attempts: i32,
        next_retry_at: DateTime<Utc>,
    },
    Failed {
        attempts: i32,
    },
}

/// Retry delay after the nth failure, capped at ten minutes.
pub fn backoff_ms(attempt: i32) -> i64 {
    let exponent = attempt.clamp(0, 16) as u32;
    30_000i64.saturating_mul(1i64 << exponent).min(600_000)
}

impl Store {
    pub fn create_outbox(&self, outbox: &NewOutbox) -> Result<Uuid, StoreError> {
        let outbox_id = Uuid::new_v4();
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO outbox_messages
                 (outbox_id, task_id, user_id, channel, recipient, subject, body,
                  status, attempts, next_retry_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', 0, now(), now())",
            &[
                &outbox_id,
                &outbox.task_id,
                &outbox.user_id,
                &outbox.channel.as_str(),
                &outbox.recipient,
                &outbox.subject,
                &outbox.body,
            ],
        )?;
        Ok(outbox_id)
    }

    pub fn load_outbox(&self, outbox_id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            &format!("SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE outbox_id = $1"),
            &[&outbox_id],
        )?;
        row.map(outbox_from_row).transpose()
    }

    /// Whether any send intent already exists for a task; used by ingest to
    /// keep job replays from double-queuing confirmations.
    pub fn outbox_exists_for_task(&self, task_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_one(
            "SELECT count(*) FROM outbox_messages WHERE task_id = $1",
            &[&task_id],
        )?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    /// Claim up to `limit` sendable rows and move them to `sending`. The
    /// claim is the only producer of the `sending` state, so a claimed row
    /// never receives concurrent work.
    pub fn claim_sendable_outbox(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            &format!(
                "UPDATE outbox_messages SET status = 'sending', updated_at = now()
                 WHERE outbox_id IN (
                     SELECT outbox_id FROM outbox_messages
                     WHERE status = 'queued' AND next_retry_at <= now()
                     ORDER BY next_retry_at
                     LIMIT $1
                     FOR UPDATE SKIP LOCKED)
                 RETURNING {OUTBOX_COLUMNS}"
            ),
            &[&limit],
        )?;
        let mut claimed = rows
            .into_iter()
            .map(outbox_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|row| row.next_retry_at);
        Ok(claimed)
    }

    pub fn mark_outbox_sent(&self, outbox_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE outbox_messages
             SET status = 'sent', attempts = attempts + 1, updated_at = now()
             WHERE outbox_id = $1 AND status = 'sending'",
            &[&outbox_id],
        )?;
        Ok(updated > 0)
    }

    /// Bookkeeping after a failed send: re-queue with exponential backoff, or
    /// mark terminally failed once attempts reach the limit.
    pub fn record_send_failure(
        &self,
        outbox_id: Uuid,
        max_attempts: i32,
    ) -> Result<SendFailureDisposition, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_one(
            "SELECT attempts FROM outbox_messages WHERE outbox_id = $1",
            &[&outbox_id],
        )?;
        let attempts: i32 = row.get(0);
        let new_attempts = attempts + 1;

        if new_attempts >= max_attempts {
            conn.execute(
                "UPDATE outbox_messages
                 SET status = 'failed', attempts = $2, updated_at = now()
                 WHERE outbox_id = $1 AND status = 'sending'",
                &[&outbox_id, &new_attempts],
            )?;
            Ok(SendFailureDisposition::Failed {
                attempts: new_attempts,
            })
        } else {
            let next_retry_at = Utc::now() + Duration::milliseconds(backoff_ms(new_attempts));
            conn.execute(
                "UPDATE outbox_messages
                 SET status = 'queued', attempts = $2, next_retry_at = $3, updated_at = now()
                 WHERE outbox_id = $1 AND status = 'sending'",
                &[&outbox_id, &new_attempts, &next_retry_at],
            )?;
            Ok(SendFailureDisposition::Requeued {
                attempts: new_attempts,
                next_retry_at,
            })
        }
    }

    /// Admin retry of a terminally failed row.
    pub fn retry_failed_outbox(&self, outbox_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE outbox_messages
             SET status = 'queued', attempts = 0, next_retry_at = now(), updated_at = now()
             WHERE outbox_id = $1 AND status = 'failed'",
            &[&outbox_id],
        )?;
        Ok(updated > 0)
    }

    pub fn list_failed_outbox(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            &format!(
                "SELECT {OUTBOX_COLUMNS} FROM outbox_messages
                 WHERE status = 'failed' ORDER BY updated_at DESC LIMIT $1"
            ),
            &[&limit],
        )?;
        rows.into_iter().map(outbox_from_row).collect()
    }

    /// Stuck-claim sweep: rows left in `sending` by a crashed sender return
    /// to `queued` once their last update is older than the cutoff.
    pub fn requeue_stuck_sending(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE outbox_messages SET status = 'queued', updated_at = now()
             WHERE status = 'sending' AND updated_at < $1",
            &[&cutoff],
        )?;
        Ok(updated)
    }
}

const OUTBOX_COLUMNS: &str = "outbox_id, task_id, user_id, channel, recipient, subject, body, \
                              status, attempts, next_retry_at, updated_at";

fn outbox_from_row(row: Row) -> Result<OutboxRecord, StoreError> {
    let channel: String = row.get(3);
    let status: String = row.get(7);
    Ok(OutboxRecord {
        outbox_id: row.get(0),
        task_id: row.get(1),
        user_id: row.get(2),
        channel: Channel::from_str(&channel).map_err(StoreError::Data)?,
        recipient: row.get(4),
        subject: row.get(5),
        body: row.get(6),
        status: OutboxStatus::from_str(&status).map_err(StoreError::Data)?,
        attempts: row.get(8),
        next_retry_at: row.get(9),
        updated_at: row.get(10),
    })
}
