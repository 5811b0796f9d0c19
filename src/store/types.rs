use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Channel;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

string_enum! {
    /// Lifecycle of an accepted webhook event.
    InboundStatus {
        Received => "received",
        Processed => "processed",
    }
}

string_enum! {
    /// Task lifecycle; transitions are guarded by single-row updates that
    /// assert the prior status.
    TaskStatus {
        Pending => "pending",
        NeedsClarification => "needs_clarification",
        Due => "due",
        Executing => "executing",
        Sending => "sending",
        Done => "done",
        Failed => "failed",
    }
}

string_enum! {
    OutboxStatus {
        Queued => "queued",
        Sending => "sending",
        Sent => "sent",
        Failed => "failed",
    }
}

string_enum! {
    /// What the pipeline does when a task comes due.
    ActionType {
        Remind => "remind",
        RemindAndDraft => "remind_and_draft",
        Send => "send",
    }
}

string_enum! {
    Tone {
        Friendly => "friendly",
        Formal => "formal",
        Brief => "brief",
    }
}

string_enum! {
    /// Audit event types; one per observable task transition.
    EventType {
        Created => "created",
        ClarificationSent => "clarification_sent",
        Scheduled => "scheduled",
        Due => "due",
        Executing => "executing",
        DraftGenerated => "draft_generated",
        Sending => "sending",
        Sent => "sent",
        Done => "done",
        Failed => "failed",
        Retried => "retried",
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
    pub primary_email: Option<String>,
    pub chat_number: Option<String>,
    pub display_name: String,
    pub status: String,
}

impl UserRecord {
    /// Deliverable address for one channel, if the user has one.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.primary_email.as_deref(),
            Channel::Chat => self.chat_number.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preferences {
    pub timezone: String,
    pub tone: Tone,
    pub default_action: ActionType,
    pub fallback_channel: Channel,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            tone: Tone::Friendly,
            default_action: ActionType::Remind,
            fallback_channel: Channel::Email,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub inbound_id: Uuid,
    pub user_id: String,
    pub channel: Channel,
    pub provider_message_id: String,
    pub idempotency_key: String,
    pub raw_text_redacted: String,
    pub status: InboundStatus,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub user_id: String,
    pub source_inbound_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
    pub action_type: ActionType,
    pub contact_hint: String,
    pub context: String,
    pub status: TaskStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub outbox_id: Uuid,
    pub task_id: Option<Uuid>,
    pub user_id: String,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TaskEventRecord {
    pub event_id: i64,
    pub task_id: Uuid,
    pub user_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::NeedsClarification,
            TaskStatus::Due,
            TaskStatus::Executing,
            TaskStatus::Sending,
            TaskStatus::Done,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn action_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&ActionType::RemindAndDraft).unwrap();
        assert_eq!(json, "\"remind_and_draft\"");
        let parsed: ActionType = serde_json::from_str("\"send\"").unwrap();
        assert_eq!(parsed, ActionType::Send);
    }
}
