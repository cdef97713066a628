//! Notification Gateway - appointment confirmation side effects
//!
//! Once an appointment row has committed, two best-effort senders run:
//! - **Calendar** (`calendar`) - Google Calendar event insert via the
//!   OAuth refresh-token flow; the event link becomes the appointment's
//!   calendar reference
//! - **SMS** (`sms`) - Twilio Messages API confirmation text to the
//!   patient's phone
//!
//! Neither sender is allowed to fail the confirmation request: transient
//! failures are retried with bounded backoff (`retry`), terminal failures
//! are logged and surfaced as an absent calendar link / unsent message.
//! Deployments without Google credentials get the noop calendar.

pub mod calendar;
pub mod retry;
pub mod sms;

pub use calendar::{BookedEvent, CalendarBooker, CalendarError, CalendarEvent, GoogleCalendarClient, NoopCalendar};
pub use retry::RetryPolicy;
pub use sms::{MessageRef, NoopSms, SmsError, SmsSender, TwilioSmsClient};
