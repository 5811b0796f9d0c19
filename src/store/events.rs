use std::str::FromStr;

use postgres::Row;
use tracing::warn;
use uuid::Uuid;

use super::types::{EventType, TaskEventRecord};
use super::{Store, StoreError};

impl Store {
    pub fn record_task_event(
        &self,
        task_id: Uuid,
        user_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO task_events (task_id, user_id, event_type, payload, created_at)
             VALUES ($1, $2, $3, $4, now())",
            &[&task_id, &user_id, &event_type.as_str(), &payload],
        )?;
        Ok(())
    }

    /// Audit writes never propagate; a failure is logged and the pipeline
    /// continues.
    pub fn log_task_event(
        &self,
        task_id: Uuid,
        user_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) {
        if let Err(err) = self.record_task_event(task_id, user_id, event_type, payload) {
            warn!(
                "failed to record {} event for task {}: {}",
                event_type, task_id, err
            );
        }
    }

    pub fn list_task_events(&self, task_id: Uuid) -> Result<Vec<TaskEventRecord>, StoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            "SELECT event_id, task_id, user_id, event_type, payload, created_at
             FROM task_events WHERE task_id = $1 ORDER BY event_id",
            &[&task_id],
        )?;
        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: Row) -> Result<TaskEventRecord, StoreError> {
    let event_type: String = row.get(3);
    Ok(TaskEventRecord {
        event_id: row.get(0),
        task_id: row.get(1),
        user_id: row.get(2),
        event_type: EventType::from_str(&event_type).map_err(StoreError::Data)?,
        payload: row.get(4),
        created_at: row.get(5),
    })
}
