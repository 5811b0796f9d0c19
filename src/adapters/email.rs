//! Email adapter: inbound webhook payload parsing and outbound sending via
//! the provider's HTTP API.

use serde::{Deserialize, Serialize};

use crate::channel::{AdapterError, Channel, OutboundAdapter, OutboundDelivery, SendResult};
use crate::config::PipelineConfig;

/// Inbound email webhook body. Field aliases cover the provider's
/// Pascal-cased variant of the same payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailInboundPayload {
    #[serde(rename = "messageId", alias = "MessageID", alias = "MessageId")]
    pub message_id: String,
    #[serde(rename = "from", alias = "From")]
    pub from: String,
    #[serde(default, rename = "to", alias = "To")]
    pub to: Option<String>,
    #[serde(default, rename = "subject", alias = "Subject")]
    pub subject: Option<String>,
    #[serde(default, rename = "textBody", alias = "TextBody")]
    pub text_body: Option<String>,
    #[serde(default, rename = "timestamp", alias = "Date")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SendEmailRequest<'a> {
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "To")]
    to: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "TextBody")]
    text_body: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct SendEmailResponse {
    #[serde(default, rename = "MessageID", alias = "MessageId")]
    message_id: Option<String>,
    #[serde(default, rename = "SubmittedAt")]
    submitted_at: Option<String>,
    #[serde(default, rename = "ErrorCode")]
    error_code: i64,
    #[serde(default, rename = "Message")]
    message: Option<String>,
}

/// Sends email through the provider's server-token API.
pub struct EmailOutboundAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
    from: String,
}

impl EmailOutboundAdapter {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, AdapterError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.external_call_timeout)
            .build()
            .map_err(|err| AdapterError::Config(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.send_email_api_base_url.trim_end_matches('/').to_string(),
            token: config.send_email_token.clone().unwrap_or_default(),
            from: config.send_email_from.clone(),
        })
    }
}

impl OutboundAdapter for EmailOutboundAdapter {
    fn send(&self, delivery: &OutboundDelivery) -> Result<SendResult, AdapterError> {
        let url = format!("{}/email", self.base_url);
        let request = SendEmailRequest {
            from: &self.from,
            to: &delivery.to,
            subject: delivery.subject.as_deref().unwrap_or("Follow-up"),
            text_body: &delivery.body,
        };

        let response = self
            .client
            .post(&url)
            .header("X-Send-Server-Token", &self.token)
            .json(&request)
            .send()
            .map_err(|err| AdapterError::Send(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::Send(format!(
                "email API returned {status}: {body}"
            )));
        }

        let body: SendEmailResponse = response
            .json()
            .map_err(|err| AdapterError::Send(err.to_string()))?;
        if body.error_code != 0 {
            return Err(AdapterError::Send(format!(
                "email API error {}: {}",
                body.error_code,
                body.message.unwrap_or_default()
            )));
        }

        Ok(SendResult {
            message_id: body.message_id.unwrap_or_default(),
            submitted_at: body.submitted_at.unwrap_or_default(),
        })
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_payload() {
        let payload: EmailInboundPayload = serde_json::from_str(
            r#"{"messageId":"msg-1","from":"alice@example.com","subject":"hi","textBody":"follow up"}"#,
        )
        .unwrap();
        assert_eq!(payload.message_id, "msg-1");
        assert_eq!(payload.from, "alice@example.com");
        assert_eq!(payload.text_body.as_deref(), Some("follow up"));
    }

    #[test]
    fn parses_provider_pascal_case_payload() {
        let payload: EmailInboundPayload = serde_json::from_str(
            r#"{"MessageID":"msg-2","From":"bob@example.com","To":"svc@followup.dev","TextBody":"ping"}"#,
        )
        .unwrap();
        assert_eq!(payload.message_id, "msg-2");
        assert_eq!(payload.to.as_deref(), Some("svc@followup.dev"));
    }

    #[test]
    fn send_posts_server_token_and_parses_response() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/email")
            .match_header("x-send-server-token", "token-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"To":"alice@example.com","SubmittedAt":"2026-08-01T00:00:00Z","MessageID":"out-1","ErrorCode":0,"Message":"OK"}"#,
            )
            .expect(1)
            .create();

        let adapter = EmailOutboundAdapter {
            client: reqwest::blocking::Client::new(),
            base_url: server.url(),
            token: "token-1".to_string(),
            from: "svc@followup.dev".to_string(),
        };

        let result = adapter
            .send(&OutboundDelivery {
                channel: Channel::Email,
                to: "alice@example.com".to_string(),
                subject: Some("Reminder".to_string()),
                body: "time to follow up".to_string(),
            })
            .unwrap();
        mock.assert();
        assert_eq!(result.message_id, "out-1");
    }

    #[test]
    fn provider_error_code_is_a_send_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/email")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ErrorCode":406,"Message":"inactive recipient"}"#)
            .create();

        let adapter = EmailOutboundAdapter {
            client: reqwest::blocking::Client::new(),
            base_url: server.url(),
            token: String::new(),
            from: "svc@followup.dev".to_string(),
        };

        let result = adapter.send(&OutboundDelivery {
            channel: Channel::Email,
            to: "gone@example.com".to_string(),
            subject: None,
            body: "hello".to_string(),
        });
        assert!(matches!(result, Err(AdapterError::Send(_))));
    }
}
