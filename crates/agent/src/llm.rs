use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use frontdesk_core::config::LlmConfig;
use frontdesk_core::intake::fields::PatientFields;
use frontdesk_core::intake::session::Message;
use frontdesk_core::intake::stage::Stage;

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Ground truth handed to the turn generator on every exchange: what is
/// already known and what is needed next. The core never formats this;
/// serialization happens at the provider boundary only.
#[derive(Clone, Debug, Serialize)]
pub struct TurnContext {
    pub practice_name: String,
    pub stage: Stage,
    pub fields: PatientFields,
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("llm api key is not configured")]
    MissingApiKey,
    #[error("turn generation client could not be built: {0}")]
    ClientBuild(String),
    #[error("turn generation request failed: {0}")]
    Transport(String),
    #[error("turn generation API returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("turn generation response was malformed: {0}")]
    Malformed(String),
}

impl TurnError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// The external language-model boundary: structured context and full
/// history in, the assistant's next reply out.
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    async fn next_reply(&self, context: &TurnContext, history: &[Message])
        -> Result<String, TurnError>;
}

pub struct AnthropicTurnClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicTurnClient {
    pub fn new(config: &LlmConfig) -> Result<Self, TurnError> {
        let api_key = config.api_key.clone().ok_or(TurnError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| TurnError::ClientBuild(error.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    async fn request_once(
        &self,
        system: &str,
        messages: &Value,
    ) -> Result<String, TurnError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "system": system,
                "messages": messages,
            }))
            .send()
            .await
            .map_err(|error| TurnError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TurnError::Api { status: status.as_u16(), body });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| TurnError::Malformed(error.to_string()))?;

        payload["content"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| TurnError::Malformed("missing content[0].text".to_string()))
    }
}

#[async_trait]
impl TurnGenerator for AnthropicTurnClient {
    async fn next_reply(
        &self,
        context: &TurnContext,
        history: &[Message],
    ) -> Result<String, TurnError> {
        let system = system_prompt(context);
        let messages = serde_json::to_value(history)
            .map_err(|error| TurnError::Malformed(error.to_string()))?;

        let mut attempt = 0;
        loop {
            match self.request_once(&system, &messages).await {
                Ok(reply) => return Ok(reply),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    warn!(
                        event_name = "llm.turn.retrying",
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "transient turn generation failure"
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let multiplier = 1_u64 << exponent;
    Duration::from_millis(250_u64.saturating_mul(multiplier).min(2_000))
}

/// The fixed instruction template plus the live field snapshot and stage.
fn system_prompt(context: &TurnContext) -> String {
    let snapshot = serde_json::to_string_pretty(&context.fields)
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        "You are a professional AI receptionist for {practice}.\n\
         Collect patient information: name, phone, email, date of birth, reason for visit, \
         and insurance details.\n\
         Ask ONE question at a time. Keep responses under 40 words. Be warm and professional.\n\n\
         Information collected so far:\n{snapshot}\n\n\
         Still needed, in order: {missing}.\n\
         Current step: {stage}.\n\
         Never re-ask for information already collected. Once everything is collected, offer \
         to schedule a follow-up appointment.",
        practice = context.practice_name,
        snapshot = snapshot,
        missing = if context.missing.is_empty() {
            "nothing".to_string()
        } else {
            context.missing.join(", ")
        },
        stage = context.stage,
    )
}
