use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A messaging channel the service can receive from and send to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Chat => "chat",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "chat" => Ok(Channel::Chat),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// One outbound message ready to hand to a provider.
#[derive(Debug, Clone)]
pub struct OutboundDelivery {
    pub channel: Channel,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub message_id: String,
    pub submitted_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("config error: {0}")]
    Config(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("send error: {0}")]
    Send(String),
}

/// Sends one delivery over a single channel.
pub trait OutboundAdapter: Send + Sync {
    fn send(&self, delivery: &OutboundDelivery) -> Result<SendResult, AdapterError>;
    fn channel(&self) -> Channel;
}
