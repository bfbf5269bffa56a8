//! Release and build-failure announcements posted to a chat webhook.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

const CHANGELOG_LIMIT: usize = 1000;
const ERROR_LOG_LIMIT: usize = 500;
const SHORT_COMMIT_LEN: usize = 7;

const COLOR_RELEASE: u32 = 0x00ff00;
const COLOR_FAILURE: u32 = 0xff0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Release,
    BuildFailure,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown notification type {0:?}, expected \"release\" or \"failure\"")]
pub struct UnknownNotificationKind(pub String);

impl FromStr for NotificationKind {
    type Err = UnknownNotificationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "release" => Ok(NotificationKind::Release),
            "failure" => Ok(NotificationKind::BuildFailure),
            other => Err(UnknownNotificationKind(String::from(other))),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationKind::Release => "release",
            NotificationKind::BuildFailure => "failure",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Release {
        version: String,
        changelog: String,
        download_url: String,
        commit: String,
    },
    BuildFailure {
        version: String,
        error_log: String,
    },
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub username: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmbedFooter {
    pub text: String,
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    EmbedField {
        name: String::from(name),
        value,
        inline,
    }
}

/// Longest prefix of at most `limit` characters.
fn truncate_chars(s: &str, limit: usize) -> &str {
    s.char_indices().nth(limit).map_or(s, |(end, _)| &s[..end])
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Release { .. } => NotificationKind::Release,
            Notification::BuildFailure { .. } => NotificationKind::BuildFailure,
        }
    }

    pub fn payload(&self, product: &str, now: DateTime<Utc>) -> WebhookPayload {
        let date = now.format("%Y-%m-%d %H:%M UTC").to_string();
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        match self {
            Notification::Release {
                version,
                changelog,
                download_url,
                commit,
            } => {
                let changelog = if changelog.is_empty() {
                    String::from("No changelog available")
                } else {
                    String::from(truncate_chars(changelog, CHANGELOG_LIMIT))
                };
                WebhookPayload {
                    content: String::from("**New Release Available!**"),
                    embeds: vec![Embed {
                        title: format!("{} {} Released!", product, version),
                        description: String::from("New production firmware release available"),
                        color: COLOR_RELEASE,
                        fields: vec![
                            field("Version", version.clone(), true),
                            field("Date", date, true),
                            field("Download", format!("[Release]({})", download_url), false),
                            field("Changelog", changelog, false),
                            field(
                                "Commit",
                                format!("`{}`", truncate_chars(commit, SHORT_COMMIT_LEN)),
                                true,
                            ),
                        ],
                        footer: EmbedFooter {
                            text: format!("{} • U2F/FIDO2 Security Token", product),
                        },
                        timestamp,
                    }],
                    username: format!("{} Bot", product),
                }
            }
            Notification::BuildFailure { version, error_log } => {
                let error_log = if error_log.is_empty() {
                    String::from("No error log available")
                } else {
                    format!("```\n{}\n```", truncate_chars(error_log, ERROR_LOG_LIMIT))
                };
                WebhookPayload {
                    content: String::from("**Build Failed!**"),
                    embeds: vec![Embed {
                        title: format!("{} Build Failed", product),
                        description: format!("Production build for {} failed", version),
                        color: COLOR_FAILURE,
                        fields: vec![
                            field("Version", version.clone(), true),
                            field("Date", date, true),
                            field("Error Log", error_log, false),
                        ],
                        footer: EmbedFooter {
                            text: format!("{} • Build System", product),
                        },
                        timestamp,
                    }],
                    username: format!("{} Bot", product),
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected the notification with status {0}")]
    Rejected(u16),
}

/// Destination for notifications. One delivery attempt, no retries.
pub trait NotificationSink {
    fn deliver(&self, payload: &WebhookPayload) -> Result<(), DeliveryError>;
}

pub struct DiscordWebhook {
    client: reqwest::blocking::Client,
    url: String,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;
        Ok(DiscordWebhook {
            client,
            url: url.into(),
        })
    }
}

impl NotificationSink for DiscordWebhook {
    fn deliver(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let response = self.client.post(&self.url).json(payload).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Delivers `notification` once, logging the outcome.
pub fn send<S: NotificationSink + ?Sized>(
    sink: &S,
    notification: &Notification,
    product: &str,
) -> Result<(), DeliveryError> {
    let payload = notification.payload(product, Utc::now());
    match sink.deliver(&payload) {
        Ok(()) => {
            info!(kind = %notification.kind(), "Notification sent");
            Ok(())
        }
        Err(err) => {
            error!(kind = %notification.kind(), error = %err, "Failed to send notification");
            Err(err)
        }
    }
}
