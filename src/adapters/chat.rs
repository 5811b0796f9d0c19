//! Chat adapter for the provider's Cloud-API-shaped webhooks and sends.
//!
//! Inbound payloads nest messages under `entry[].changes[].value.messages[]`;
//! delivery-status events arrive on the same hook and are ignored.

use serde::{Deserialize, Serialize};

use crate::channel::{AdapterError, Channel, OutboundAdapter, OutboundDelivery, SendResult};
use crate::config::PipelineConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatWebhook {
    #[serde(default)]
    pub object: String,
    pub entry: Vec<ChatEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatEntry {
    #[serde(default)]
    pub id: String,
    pub changes: Vec<ChatChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChange {
    pub value: ChatValue,
    #[serde(default)]
    pub field: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatValue {
    #[serde(default)]
    pub messaging_product: String,
    #[serde(default)]
    pub metadata: Option<ChatMetadata>,
    #[serde(default)]
    pub contacts: Option<Vec<ChatContact>>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub statuses: Option<Vec<ChatStatus>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMetadata {
    pub display_phone_number: Option<String>,
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatContact {
    pub wa_id: Option<String>,
    pub profile: Option<ChatProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatProfile {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<ChatText>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatText {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatStatus {
    pub id: String,
    pub status: String,
}

/// One text message extracted from a webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInboundMessage {
    pub provider_message_id: String,
    pub sender: String,
    pub text: String,
}

impl ChatWebhook {
    pub fn parse(raw_payload: &[u8]) -> Result<Self, AdapterError> {
        serde_json::from_slice(raw_payload).map_err(|err| AdapterError::Parse(err.to_string()))
    }

    /// Every text message in the delivery, in order. Status updates and
    /// non-text message types are skipped.
    pub fn text_messages(&self) -> Vec<ChatInboundMessage> {
        let mut messages = Vec::new();
        for entry in &self.entry {
            for change in &entry.changes {
                let Some(batch) = change.value.messages.as_ref() else {
                    continue;
                };
                for message in batch {
                    let Some(text) = message.text.as_ref() else {
                        continue;
                    };
                    if message.message_type != "text" {
                        continue;
                    }
                    messages.push(ChatInboundMessage {
                        provider_message_id: message.id.clone(),
                        sender: message.from.clone(),
                        text: text.body.clone(),
                    });
                }
            }
        }
        messages
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatSendRequest<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: ChatTextContent<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatTextContent<'a> {
    body: &'a str,
}

/// Sends chat messages through the provider's Graph-style API.
pub struct ChatOutboundAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    access_token: String,
    phone_number_id: String,
}

impl ChatOutboundAdapter {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, AdapterError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.external_call_timeout)
            .build()
            .map_err(|err| AdapterError::Config(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.send_chat_api_base_url.trim_end_matches('/').to_string(),
            access_token: config.send_chat_access_token.clone().unwrap_or_default(),
            phone_number_id: config.send_chat_phone_number_id.clone(),
        })
    }

    fn api_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }
}

impl OutboundAdapter for ChatOutboundAdapter {
    fn send(&self, delivery: &OutboundDelivery) -> Result<SendResult, AdapterError> {
        if delivery.to.trim().is_empty() {
            return Err(AdapterError::Config(
                "no phone number specified for chat message".to_string(),
            ));
        }

        // Chat has no subject line; fold it into the body when present.
        let body = match delivery.subject.as_deref().filter(|s| !s.is_empty()) {
            Some(subject) => format!("{subject}\n\n{}", delivery.body),
            None => delivery.body.clone(),
        };

        let request = ChatSendRequest {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: &delivery.to,
            message_type: "text",
            text: ChatTextContent { body: &body },
        };

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .map_err(|err| AdapterError::Send(err.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .map_err(|err| AdapterError::Send(err.to_string()))?;

        if !status.is_success() {
            let error_msg = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(AdapterError::Send(format!(
                "chat API returned {status}: {error_msg}"
            )));
        }

        let message_id = body["messages"][0]["id"].as_str().unwrap_or("").to_string();
        Ok(SendResult {
            message_id,
            submitted_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn channel(&self) -> Channel {
        Channel::Chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_PAYLOAD: &str = r#"{
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "123456789",
            "changes": [{
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "15551234567",
                        "phone_number_id": "987654321"
                    },
                    "contacts": [{
                        "wa_id": "14155551234",
                        "profile": { "name": "Dana" }
                    }],
                    "messages": [
                        {
                            "id": "wamid.abc123",
                            "from": "14155551234",
                            "timestamp": "1234567890",
                            "type": "text",
                            "text": { "body": "remind me friday" }
                        },
                        {
                            "id": "wamid.def456",
                            "from": "14155551234",
                            "timestamp": "1234567891",
                            "type": "image"
                        }
                    ]
                },
                "field": "messages"
            }]
        }]
    }"#;

    #[test]
    fn extracts_text_messages_and_skips_other_types() {
        let webhook = ChatWebhook::parse(TEXT_PAYLOAD.as_bytes()).unwrap();
        let messages = webhook.text_messages();
        assert_eq!(
            messages,
            vec![ChatInboundMessage {
                provider_message_id: "wamid.abc123".to_string(),
                sender: "14155551234".to_string(),
                text: "remind me friday".to_string(),
            }]
        );
    }

    #[test]
    fn status_only_payload_yields_no_messages() {
        let payload = r#"{
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "123456789",
                "changes": [{
                    "value": {
                        "messaging_product": "whatsapp",
                        "statuses": [{ "id": "wamid.abc123", "status": "delivered" }]
                    },
                    "field": "messages"
                }]
            }]
        }"#;
        let webhook = ChatWebhook::parse(payload.as_bytes()).unwrap();
        assert!(webhook.text_messages().is_empty());
    }

    #[test]
    fn send_posts_bearer_token_and_reads_message_id() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/987654321/messages")
            .match_header("authorization", "Bearer chat-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages":[{"id":"wamid.out1"}]}"#)
            .expect(1)
            .create();

        let adapter = ChatOutboundAdapter {
            client: reqwest::blocking::Client::new(),
            base_url: server.url(),
            access_token: "chat-token".to_string(),
            phone_number_id: "987654321".to_string(),
        };

        let result = adapter
            .send(&OutboundDelivery {
                channel: Channel::Chat,
                to: "14155551234".to_string(),
                subject: None,
                body: "time to follow up".to_string(),
            })
            .unwrap();
        mock.assert();
        assert_eq!(result.message_id, "wamid.out1");
    }

    #[test]
    fn api_error_is_a_send_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/987654321/messages")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"invalid recipient"}}"#)
            .create();

        let adapter = ChatOutboundAdapter {
            client: reqwest::blocking::Client::new(),
            base_url: server.url(),
            access_token: String::new(),
            phone_number_id: "987654321".to_string(),
        };

        let result = adapter.send(&OutboundDelivery {
            channel: Channel::Chat,
            to: "14155551234".to_string(),
            subject: None,
            body: "hello".to_string(),
        });
        assert!(matches!(result, Err(AdapterError::Send(_))));
    }
}
