use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::store::ActionType;

/// Fixed question used whenever the extractor fails or violates its contract.
pub const FALLBACK_CLARIFICATION: &str =
    "I couldn't work out when you'd like this follow-up. When should I remind you?";

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("extractor returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("extractor contract violation: {0}")]
    Contract(String),
}

/// Wire shape of the extraction service response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionWire {
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarifying_question: String,
    #[serde(default)]
    pub due_at_iso: Option<String>,
    pub action_type: ActionType,
    #[serde(default)]
    pub contact_hint: String,
    #[serde(default)]
    pub context: String,
}

/// Contract-validated extraction outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    NeedsClarification {
        question: String,
        action_type: ActionType,
        contact_hint: String,
        context: String,
    },
    Scheduled {
        due_at: DateTime<Utc>,
        action_type: ActionType,
        contact_hint: String,
        context: String,
    },
}

impl Extraction {
    /// What ingest falls back to when the extractor is unavailable or
    /// misbehaves.
    pub fn fallback(default_action: ActionType) -> Self {
        Extraction::NeedsClarification {
            question: FALLBACK_CLARIFICATION.to_string(),
            action_type: default_action,
            contact_hint: String::new(),
            context: String::new(),
        }
    }
}

/// Validate the wire contract: a clarification carries a non-empty question
/// and no due time; anything else carries a parseable due instant.
pub fn validate_extraction(wire: ExtractionWire) -> Result<Extraction, ExtractorError> {
    if wire.needs_clarification {
        if wire.due_at_iso.is_some() {
            return Err(ExtractorError::Contract(
                "needs_clarification with non-null due_at_iso".to_string(),
            ));
        }
        if wire.clarifying_question.trim().is_empty() {
            return Err(ExtractorError::Contract(
                "needs_clarification with empty clarifying_question".to_string(),
            ));
        }
        return Ok(Extraction::NeedsClarification {
            question: wire.clarifying_question,
            action_type: wire.action_type,
            contact_hint: wire.contact_hint,
            context: wire.context,
        });
    }

    let due_at_iso = wire
        .due_at_iso
        .as_deref()
        .ok_or_else(|| ExtractorError::Contract("missing due_at_iso".to_string()))?;
    let due_at = DateTime::parse_from_rfc3339(due_at_iso)
        .map_err(|err| ExtractorError::Contract(format!("unparseable due_at_iso: {err}")))?
        .with_timezone(&Utc);

    Ok(Extraction::Scheduled {
        due_at,
        action_type: wire.action_type,
        contact_hint: wire.contact_hint,
        context: wire.context,
    })
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
    timezone: &'a str,
    now: String,
}

/// Client for the language-model extraction service.
pub struct Extractor {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Extractor {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ExtractorError> {
        Self::new(
            &config.extractor_api_base_url,
            config.extractor_key.clone(),
            config.external_call_timeout,
        )
    }

    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ExtractorError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn extract(
        &self,
        text: &str,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Extraction, ExtractorError> {
        let url = format!("{}/v1/extract", self.base_url);
        let request = ExtractRequest {
            text,
            timezone,
            now: now.to_rfc3339(),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let wire: ExtractionWire = response.json()?;
        validate_extraction(wire)
    }
}
