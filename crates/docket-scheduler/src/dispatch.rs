//! Notification dispatch: delivers a rendered notification to its channels.
//! Supports: in-app inbox, HTTP webhook, Telegram Bot API, SMTP e-mail.

use std::time::Duration;

use docket_core::config::NotifyConfig;
use docket_core::error::{DocketError, Result};

use crate::notify::{OutboundNotification, Recipient};

const CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// One concrete delivery destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTarget {
    /// Stored only; the recipient reads it through the API.
    InApp { recipient: String },
    /// Generic HTTP webhook: POST with JSON body.
    Webhook { url: String },
    /// Telegram Bot API: send via `sendMessage`.
    Telegram { chat_id: String },
    Email { to: String },
}

impl NotifyTarget {
    /// Value written to `send_history.send_method`.
    pub fn method(&self) -> &'static str {
        match self {
            NotifyTarget::InApp { .. } => "in_app",
            NotifyTarget::Webhook { .. } => "webhook",
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Email { .. } => "email",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            NotifyTarget::InApp { recipient } => format!("in_app:{recipient}"),
            NotifyTarget::Webhook { url } => format!("webhook:{url}"),
            NotifyTarget::Telegram { chat_id } => format!("telegram:{chat_id}"),
            NotifyTarget::Email { to } => format!("email:{to}"),
        }
    }
}

/// Sends notifications using the configured channel credentials.
pub struct Dispatcher {
    config: NotifyConfig,
    http: reqwest::Client,
}

impl Dispatcher {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config, http: reqwest::Client::new() }
    }

    /// Map recipients onto delivery targets. `handler` resolves
    /// [`Recipient::Handler`]; the broadcast webhook, when configured, is always added.
    /// Falls back to the shared in-app inbox when nothing else applies.
    pub fn targets_for(&self, recipients: &[Recipient], handler: Option<&str>) -> Vec<NotifyTarget> {
        let mut targets: Vec<NotifyTarget> = Vec::new();
        let mut push = |t: NotifyTarget| {
            if !targets.contains(&t) {
                targets.push(t);
            }
        };

        for recipient in recipients {
            match recipient {
                Recipient::User { .. } | Recipient::Role { .. } => {
                    push(NotifyTarget::InApp { recipient: recipient.describe() })
                }
                Recipient::Handler => match handler {
                    Some(h) if !h.is_empty() => {
                        push(NotifyTarget::InApp { recipient: format!("user:{h}") })
                    }
                    _ => tracing::debug!("No handler to resolve recipient 'handler'"),
                },
                Recipient::Email { address } => push(NotifyTarget::Email { to: address.clone() }),
                Recipient::Webhook { url } => push(NotifyTarget::Webhook { url: url.clone() }),
                Recipient::Telegram { chat_id } => {
                    push(NotifyTarget::Telegram { chat_id: chat_id.clone() })
                }
            }
        }

        if let Some(url) = self.config.webhook_url.as_ref().filter(|u| !u.is_empty()) {
            push(NotifyTarget::Webhook { url: url.clone() });
        }
        if targets.is_empty() {
            targets.push(NotifyTarget::InApp { recipient: "all".into() });
        }
        targets
    }

    /// Deliver to one target. Every channel enforces its own timeout.
    pub async fn dispatch(
        &self,
        notification: &OutboundNotification,
        target: &NotifyTarget,
    ) -> Result<()> {
        match target {
            NotifyTarget::InApp { recipient } => {
                tracing::debug!("📥 In-app notification #{} for {recipient}", notification.task_id);
                Ok(())
            }
            NotifyTarget::Webhook { url } => self.send_webhook(url, notification).await,
            NotifyTarget::Telegram { chat_id } => self.send_telegram(chat_id, notification).await,
            NotifyTarget::Email { to } => self.send_email(to, notification).await,
        }
    }

    async fn send_webhook(&self, url: &str, notification: &OutboundNotification) -> Result<()> {
        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "task_id": notification.task_id,
                "title": notification.title,
                "body": notification.body,
                "related": notification.related,
                "scheduled_time": notification.scheduled_time.to_rfc3339(),
            }))
            .timeout(CHANNEL_TIMEOUT)
            .send()
            .await
            .map_err(|e| DocketError::Dispatch(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook notification sent to {}: {}", url, notification.title);
            Ok(())
        } else {
            Err(DocketError::Dispatch(format!("Webhook error {}", resp.status())))
        }
    }

    async fn send_telegram(&self, chat_id: &str, notification: &OutboundNotification) -> Result<()> {
        let bot_token = self
            .config
            .telegram
            .as_ref()
            .map(|t| t.bot_token.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DocketError::Dispatch("Telegram bot is not configured".into()))?;

        let text = format!(
            "⏰ *{}*\n\n{}\n\n_{} • {}_",
            escape_markdown(&notification.title),
            escape_markdown(&notification.body),
            notification.related,
            notification.scheduled_time.format("%Y-%m-%d %H:%M UTC")
        );

        let resp = self
            .http
            .post(format!("https://api.telegram.org/bot{bot_token}/sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown"
            }))
            .timeout(CHANNEL_TIMEOUT)
            .send()
            .await
            .map_err(|e| DocketError::Dispatch(format!("Telegram send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Telegram notification sent: {}", notification.title);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(DocketError::Dispatch(format!("Telegram API error {status}: {body}")))
        }
    }

    async fn send_email(&self, to: &str, notification: &OutboundNotification) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let smtp = self
            .config
            .smtp
            .as_ref()
            .ok_or_else(|| DocketError::Dispatch("SMTP is not configured".into()))?;

        let from: Mailbox = smtp
            .from
            .parse()
            .map_err(|e| DocketError::Dispatch(format!("Invalid from: {e}")))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| DocketError::Dispatch(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(&notification.title)
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| DocketError::Dispatch(format!("Build email: {e}")))?;

        let mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| DocketError::Dispatch(format!("SMTP relay: {e}")))?
            .port(smtp.port)
            .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()))
            .timeout(Some(CHANNEL_TIMEOUT))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| DocketError::Dispatch(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email notification sent to: {to}");
        Ok(())
    }
}

/// Escape Telegram MarkdownV1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}
