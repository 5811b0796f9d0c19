pub mod chat;
pub mod email;

use crate::channel::{Channel, OutboundAdapter};
use crate::config::PipelineConfig;

pub use chat::{ChatInboundMessage, ChatOutboundAdapter, ChatWebhook};
pub use email::{EmailInboundPayload, EmailOutboundAdapter};

/// Routes deliveries to the adapter for their channel.
pub struct OutboundRouter {
    email: EmailOutboundAdapter,
    chat: ChatOutboundAdapter,
}

impl OutboundRouter {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, crate::channel::AdapterError> {
        Ok(Self {
            email: EmailOutboundAdapter::from_config(config)?,
            chat: ChatOutboundAdapter::from_config(config)?,
        })
    }

    pub fn adapter_for(&self, channel: Channel) -> &dyn OutboundAdapter {
        match channel {
            Channel::Email => &self.email,
            Channel::Chat => &self.chat,
        }
    }
}
