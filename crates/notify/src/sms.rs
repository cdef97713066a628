use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use frontdesk_core::config::TwilioConfig;

use crate::retry::RetryPolicy;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRef {
    pub sid: String,
}

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("sms sending is disabled")]
    Disabled,
    #[error("sms request failed: {0}")]
    Transport(String),
    #[error("sms API returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("sms response was malformed: {0}")]
    Malformed(String),
}

impl SmsError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<MessageRef, SmsError>;
}

/// Sends confirmation texts through the Twilio Messages API.
pub struct TwilioSmsClient {
    client: Client,
    account_sid: String,
    auth_token: SecretString,
    from_number: String,
    retry: RetryPolicy,
}

impl TwilioSmsClient {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            client: Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            retry: RetryPolicy::default(),
        }
    }

    async fn send_once(&self, to: &str, body: &str) -> Result<MessageRef, SmsError> {
        let response = self
            .client
            .post(format!(
                "{TWILIO_API_BASE}/2010-04-01/Accounts/{}/Messages.json",
                self.account_sid
            ))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&message_form(to, &self.from_number, body))
            .send()
            .await
            .map_err(|error| SmsError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Api { status: status.as_u16(), body });
        }

        let payload: Value =
            response.json().await.map_err(|error| SmsError::Malformed(error.to_string()))?;

        payload["sid"]
            .as_str()
            .map(|sid| MessageRef { sid: sid.to_owned() })
            .ok_or_else(|| SmsError::Malformed("missing message sid".to_string()))
    }
}

#[async_trait]
impl SmsSender for TwilioSmsClient {
    async fn send(&self, to: &str, body: &str) -> Result<MessageRef, SmsError> {
        let mut attempt = 0;
        loop {
            match self.send_once(to, body).await {
                Ok(message) => {
                    info!(
                        event_name = "notify.sms.sent",
                        message_sid = %message.sid,
                        "confirmation sms sent"
                    );
                    return Ok(message);
                }
                Err(error) if error.is_transient() && self.retry.attempts_left(attempt) => {
                    warn!(
                        event_name = "notify.sms.retrying",
                        attempt,
                        error = %error,
                        "transient sms failure"
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn message_form<'a>(to: &'a str, from: &'a str, body: &'a str) -> [(&'static str, &'a str); 3] {
    [("To", to), ("From", from), ("Body", body)]
}

/// Stand-in sender for tests and SMS-less deployments.
#[derive(Default)]
pub struct NoopSms;

#[async_trait]
impl SmsSender for NoopSms {
    async fn send(&self, _to: &str, _body: &str) -> Result<MessageRef, SmsError> {
        Err(SmsError::Disabled)
    }
}
