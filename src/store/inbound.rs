use std::str::FromStr;

use chrono::{DateTime, Utc};
use postgres::Row;
use uuid::Uuid;

use crate::channel::Channel;

use super::types::{InboundRecord, InboundStatus};
use super::{Store, StoreError};

pub const RETENTION_MARKER: &str = "[REDACTED_PER_RETENTION_POLICY]";

#[derive(Debug, Clone)]
pub struct NewInbound {
    pub user_id: String,
    pub channel: Channel,
    pub provider_message_id: String,
    pub idempotency_key: String,
    pub raw_text_redacted: String,
}

impl Store {
    /// Persist one accepted webhook event. The UNIQUE constraint on
    /// `idempotency_key` is the authoritative deduplication: a conflict
    /// returns `None` and the caller reports a duplicate.
    pub fn insert_inbound(&self, inbound: &NewInbound) -> Result<Option<Uuid>, StoreError> {
        let inbound_id = Uuid::new_v4();
        let mut conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT INTO inbound_messages
                 (inbound_id, user_id, channel, provider_message_id, idempotency_key,
                  raw_text_redacted, status, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'received', now())
             ON CONFLICT (idempotency_key) DO NOTHING",
            &[
                &inbound_id,
                &inbound.user_id,
                &inbound.channel.as_str(),
                &inbound.provider_message_id,
                &inbound.idempotency_key,
                &inbound.raw_text_redacted,
            ],
        )?;
        Ok((inserted > 0).then_some(inbound_id))
    }

    pub fn load_inbound(&self, inbound_id: Uuid) -> Result<Option<InboundRecord>, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            "SELECT inbound_id, user_id, channel, provider_message_id, idempotency_key,
                    raw_text_redacted, status, received_at
             FROM inbound_messages WHERE inbound_id = $1",
            &[&inbound_id],
        )?;
        row.map(inbound_from_row).transpose()
    }

    /// Final step of ingest; gated on the row still being `received` so a
    /// replayed job observes `processed` and no-ops.
    pub fn mark_inbound_processed(&self, inbound_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE inbound_messages SET status = 'processed'
             WHERE inbound_id = $1 AND status = 'received'",
            &[&inbound_id],
        )?;
        Ok(updated > 0)
    }

    /// Retention sweep: replace stored text older than the cutoff with a
    /// fixed marker. Returns the number of rows redacted.
    pub fn redact_inbound_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE inbound_messages SET raw_text_redacted = $1
             WHERE received_at < $2 AND raw_text_redacted <> $1",
            &[&RETENTION_MARKER, &cutoff],
        )?;
        Ok(updated)
    }
}

fn inbound_from_row(row: Row) -> Result<InboundRecord, StoreError> {
    let channel: String = row.get(2);
    let status: String = row.get(6);
    Ok(InboundRecord {
        inbound_id: row.get(0),
        user_id: row.get(1),
        channel: Channel::from_str(&channel).map_err(StoreError::Data)?,
        provider_message_id: row.get(3),
        idempotency_key: row.get(4),
        raw_text_redacted: row.get(5),
        status: InboundStatus::from_str(&status).map_err(StoreError::Data)?,
        received_at: row.get(7),
    })
}
