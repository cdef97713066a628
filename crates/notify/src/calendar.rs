use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use frontdesk_core::config::GoogleConfig;

use crate::retry::RetryPolicy;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: Option<String>,
    pub start_date_time: String,
    pub end_date_time: String,
    pub time_zone: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookedEvent {
    pub event_id: String,
    pub html_link: Option<String>,
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar booking is disabled (no google credentials configured)")]
    Disabled,
    #[error("calendar token exchange failed: {0}")]
    Auth(String),
    #[error("calendar request failed: {0}")]
    Transport(String),
    #[error("calendar API returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("calendar response was malformed: {0}")]
    Malformed(String),
}

impl CalendarError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait CalendarBooker: Send + Sync {
    async fn book(&self, event: &CalendarEvent) -> Result<BookedEvent, CalendarError>;
}

/// Books events through the Google Calendar v3 API using the long-lived
/// refresh credential obtained by the `frontdesk google-auth` bootstrap.
pub struct GoogleCalendarClient {
    client: Client,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    calendar_id: String,
    retry: RetryPolicy,
}

impl GoogleCalendarClient {
    /// Returns `None` when the credential set is absent; bootstrap swaps
    /// in [`NoopCalendar`] for that case.
    pub fn from_config(config: &GoogleConfig) -> Option<Self> {
        let client_id = config.client_id.clone()?;
        let client_secret = config.client_secret.clone()?;
        let refresh_token = config.refresh_token.clone()?;

        Some(Self {
            client: Client::new(),
            client_id,
            client_secret,
            refresh_token,
            calendar_id: config.calendar_id.clone(),
            retry: RetryPolicy::default(),
        })
    }

    async fn access_token(&self) -> Result<String, CalendarError> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", self.refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|error| CalendarError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Auth(format!("status {status}: {body}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| CalendarError::Malformed(error.to_string()))?;

        payload["access_token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| CalendarError::Malformed("missing access_token".to_string()))
    }

    async fn insert_once(&self, event: &CalendarEvent) -> Result<BookedEvent, CalendarError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!("{CALENDAR_API_BASE}/calendars/{}/events", self.calendar_id))
            .bearer_auth(token)
            .json(&event_payload(event))
            .send()
            .await
            .map_err(|error| CalendarError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api { status: status.as_u16(), body });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| CalendarError::Malformed(error.to_string()))?;

        let event_id = payload["id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| CalendarError::Malformed("missing event id".to_string()))?;

        Ok(BookedEvent { event_id, html_link: payload["htmlLink"].as_str().map(str::to_owned) })
    }
}

#[async_trait]
impl CalendarBooker for GoogleCalendarClient {
    async fn book(&self, event: &CalendarEvent) -> Result<BookedEvent, CalendarError> {
        let mut attempt = 0;
        loop {
            match self.insert_once(event).await {
                Ok(booked) => {
                    info!(
                        event_name = "notify.calendar.booked",
                        event_id = %booked.event_id,
                        "calendar event created"
                    );
                    return Ok(booked);
                }
                Err(error) if error.is_transient() && self.retry.attempts_left(attempt) => {
                    warn!(
                        event_name = "notify.calendar.retrying",
                        attempt,
                        error = %error,
                        "transient calendar failure"
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn event_payload(event: &CalendarEvent) -> Value {
    json!({
        "summary": event.summary,
        "description": event.description,
        "start": { "dateTime": event.start_date_time, "timeZone": event.time_zone },
        "end": { "dateTime": event.end_date_time, "timeZone": event.time_zone },
    })
}

/// Stand-in for deployments without Google credentials; booking reports
/// itself disabled and the confirmation path carries a null link.
#[derive(Default)]
pub struct NoopCalendar;

#[async_trait]
impl CalendarBooker for NoopCalendar {
    async fn book(&self, _event: &CalendarEvent) -> Result<BookedEvent, CalendarError> {
        Err(CalendarError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::config::GoogleConfig;

    use super::{event_payload, CalendarBooker, CalendarError, CalendarEvent, GoogleCalendarClient, NoopCalendar};

    fn event() -> CalendarEvent {
        CalendarEvent {
            summary: "Appointment: John Smith".to_string(),
            description: Some("back pain follow-up".to_string()),
            start_date_time: "2026-08-20T10:30:00".to_string(),
            end_date_time: "2026-08-20T11:00:00".to_string(),
            time_zone: "America/New_York".to_string(),
        }
    }

    #[test]
    fn event_payload_matches_calendar_api_shape() {
        let payload = event_payload(&event());
        assert_eq!(payload["summary"], "Appointment: John Smith");
        assert_eq!(payload["start"]["dateTime"], "2026-08-20T10:30:00");
        assert_eq!(payload["end"]["timeZone"], "America/New_York");
    }

    #[test]
    fn client_requires_the_full_credential_set() {
        let config = GoogleConfig {
            client_id: Some("client-1".to_string()),
            client_secret: None,
            refresh_token: None,
            calendar_id: "primary".to_string(),
            redirect_uri: "http://localhost:3000/oauth2callback".to_string(),
        };
        assert!(GoogleCalendarClient::from_config(&config).is_none());
    }

    #[test]
    fn transient_errors_are_distinguished() {
        assert!(CalendarError::Transport("reset".to_string()).is_transient());
        assert!(CalendarError::Api { status: 500, body: String::new() }.is_transient());
        assert!(!CalendarError::Api { status: 403, body: String::new() }.is_transient());
        assert!(!CalendarError::Auth("bad refresh token".to_string()).is_transient());
    }

    #[tokio::test]
    async fn noop_calendar_reports_disabled() {
        let result = NoopCalendar.book(&event()).await;
        assert!(matches!(result, Err(CalendarError::Disabled)));
    }
}
