use std::str::FromStr;

use postgres::Row;

use crate::channel::Channel;

use super::types::{ActionType, Preferences, Tone, UserRecord};
use super::{Store, StoreError};

/// Canonical form of a sender address for the channel's identifying column:
/// lowercased for email, digits and leading `+` only for chat numbers.
pub fn normalize_address(channel: Channel, address: &str) -> String {
    match channel {
        Channel::Email => address.trim().to_ascii_lowercase(),
        Channel::Chat => address
            .chars()
            .filter(|ch| ch.is_ascii_digit() || *ch == '+')
            .collect(),
    }
}

impl Store {
    /// Resolve a user by the sender address on the channel's identifying
    /// column. Returns `None` for unknown senders.
    pub fn find_user_by_address(
        &self,
        channel: Channel,
        address: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let normalized = normalize_address(channel, address);
        if normalized.is_empty() {
            return Ok(None);
        }
        let column = match channel {
            Channel::Email => "primary_email",
            Channel::Chat => "chat_number",
        };
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            &format!(
                "SELECT user_id, primary_email, chat_number, display_name, status
                 FROM users WHERE {column} = $1"
            ),
            &[&normalized],
        )?;
        row.map(user_from_row).transpose()
    }

    pub fn load_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            "SELECT user_id, primary_email, chat_number, display_name, status
             FROM users WHERE user_id = $1",
            &[&user_id],
        )?;
        row.map(user_from_row).transpose()
    }

    /// Preferences for a user, or defaults when no row exists.
    pub fn load_preferences(&self, user_id: &str) -> Result<Preferences, StoreError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            "SELECT timezone, tone, default_action, fallback_channel
             FROM user_preferences WHERE user_id = $1",
            &[&user_id],
        )?;
        match row {
            Some(row) => {
                let tone: String = row.get(1);
                let default_action: String = row.get(2);
                let fallback_channel: String = row.get(3);
                Ok(Preferences {
                    timezone: row.get(0),
                    tone: Tone::from_str(&tone).map_err(StoreError::Data)?,
                    default_action: ActionType::from_str(&default_action)
                        .map_err(StoreError::Data)?,
                    fallback_channel: Channel::from_str(&fallback_channel)
                        .map_err(StoreError::Data)?,
                })
            }
            None => Ok(Preferences::default()),
        }
    }

    /// Provisioning is external to the pipeline; this exists for admin tooling
    /// and tests.
    pub fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO users (user_id, primary_email, chat_number, display_name, status)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id) DO NOTHING",
            &[
                &user.user_id,
                &user.primary_email,
                &user.chat_number,
                &user.display_name,
                &user.status,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            "INSERT INTO user_preferences (user_id, timezone, tone, default_action, fallback_channel)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id) DO UPDATE SET
                 timezone = EXCLUDED.timezone,
                 tone = EXCLUDED.tone,
                 default_action = EXCLUDED.default_action,
                 fallback_channel = EXCLUDED.fallback_channel",
            &[
                &user_id,
                &preferences.timezone,
                &preferences.tone.as_str(),
                &preferences.default_action.as_str(),
                &preferences.fallback_channel.as_str(),
            ],
        )?;
        Ok(())
    }
}

fn user_from_row(row: Row) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        user_id: row.get(0),
        primary_email: row.get(1),
        chat_number: row.get(2),
        display_name: row.get(3),
        status: row.get(4),
    })
}
