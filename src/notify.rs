//! Best-effort webhook notifications for stream events.
//!
//! Each event kind is gated by a flag in the notification settings. Delivery
//! is a single POST with a short timeout; failures are reported to the caller
//! and never retried.

use crate::constants::{
    NOTIFICATION_SOURCE, NOTIFY_TIMEOUT_SECS, WEBHOOK_TEST_SOURCE, WEBHOOK_TEST_TIMEOUT_SECS,
};
use crate::settings::NotificationSettings;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StreamStart,
    StreamEnd,
    Error,
    Test,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StreamStart => "stream_start",
            EventKind::StreamEnd => "stream_end",
            EventKind::Error => "error",
            EventKind::Test => "test",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload<'a> {
    pub event: &'a str,
    pub message: &'a str,
    pub timestamp: String,
    pub source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The event kind is switched off.
    Skipped,
    /// The event is enabled but no webhook is configured.
    NoWebhook,
    Delivered(u16),
    Rejected(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct Notifier<'a> {
    settings: &'a NotificationSettings,
}

impl<'a> Notifier<'a> {
    pub fn new(settings: &'a NotificationSettings) -> Self {
        Notifier { settings }
    }

    pub fn is_enabled(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::StreamStart => self.settings.notify_stream_start,
            EventKind::StreamEnd => self.settings.notify_stream_end,
            EventKind::Error => self.settings.notify_errors,
            EventKind::Test => false,
        }
    }

    pub fn notify(
        &self,
        kind: EventKind,
        message: &str,
        data: Option<&Value>,
        timestamp: String,
    ) -> Result<NotifyOutcome, NotifyError> {
        if !self.is_enabled(kind) {
            log::debug!("Notifications for {kind} are disabled");
            return Ok(NotifyOutcome::Skipped);
        }
        let url = self.settings.webhook_url.trim();
        if url.is_empty() {
            log::info!("{kind}: {message}");
            return Ok(NotifyOutcome::NoWebhook);
        }

        let payload = WebhookPayload {
            event: kind.as_str(),
            message,
            timestamp,
            source: NOTIFICATION_SOURCE,
            data,
        };
        let outcome = post(url, &payload, Duration::from_secs(NOTIFY_TIMEOUT_SECS))?;
        match outcome {
            NotifyOutcome::Delivered(_) => log::info!("Notification sent: {message}"),
            other => log::warn!("Notification not accepted: {other:?}"),
        }
        Ok(outcome)
    }
}

/// Send a test event to `url` and report how the endpoint answered.
pub fn test_webhook(url: &str, timestamp: String) -> Result<NotifyOutcome, NotifyError> {
    let payload = WebhookPayload {
        event: EventKind::Test.as_str(),
        message: "Test notification from YouTube Live Stream Manager",
        timestamp,
        source: WEBHOOK_TEST_SOURCE,
        data: None,
    };
    post(url, &payload, Duration::from_secs(WEBHOOK_TEST_TIMEOUT_SECS))
}

fn post(url: &str, payload: &WebhookPayload<'_>, timeout: Duration) -> Result<NotifyOutcome, NotifyError> {
    let client = Client::builder().timeout(timeout).build()?;
    let status = client.post(url).json(payload).send()?.status();
    // Only a plain 200 counts as delivered.
    if status == reqwest::StatusCode::OK {
        Ok(NotifyOutcome::Delivered(status.as_u16()))
    } else {
        Ok(NotifyOutcome::Rejected(status.as_u16()))
    }
}
