use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::store::Tone;

#[derive(Debug, thiserror::Error)]
pub enum DrafterError {
    #[error("drafter request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("drafter returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
struct DraftRequest<'a> {
    contact_hint: &'a str,
    context: &'a str,
    tone: Tone,
}

/// Deterministic short template used whenever the drafter is unavailable.
pub fn fallback_draft(contact_hint: &str, context: &str, tone: Tone) -> Draft {
    let contact = if contact_hint.trim().is_empty() {
        "them"
    } else {
        contact_hint.trim()
    };
    let opening = match tone {
        Tone::Friendly => format!("Hi {contact},"),
        Tone::Formal => format!("Dear {contact},"),
        Tone::Brief => format!("{contact},"),
    };
    let context_line = if context.trim().is_empty() {
        "I wanted to follow up on our earlier conversation.".to_string()
    } else {
        format!("I wanted to follow up regarding {}.", context.trim())
    };
    Draft {
        subject: format!("Following up with {contact}"),
        body: format!("{opening}\n\n{context_line} Let me know how you'd like to proceed.\n"),
    }
}

/// Client for the language-model drafting service.
pub struct Drafter {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Drafter {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DrafterError> {
        Self::new(
            &config.drafter_api_base_url,
            config.extractor_key.clone(),
            config.external_call_timeout,
        )
    }

    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, DrafterError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn draft(
        &self,
        contact_hint: &str,
        context: &str,
        tone: Tone,
    ) -> Result<Draft, DrafterError> {
        let url = format!("{}/v1/draft", self.base_url);
        let request = DraftRequest {
            contact_hint,
            context,
            tone,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DrafterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json()?)
    }
}
