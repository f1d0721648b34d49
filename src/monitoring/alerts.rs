use crate::security::SecureApiKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Trade,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Trade => "TRADE",
            Severity::Error => "ERROR",
        }
    }

    /// Attachment colour
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Info => "#3498db",
            Severity::Trade => "#2ecc71",
            Severity::Error => "#e74c3c",
        }
    }
}

/// Which part of the engine a message is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Engine,
    Trend,
    Scalp,
    Volatility,
}

impl Category {
    pub fn title(&self) -> &'static str {
        match self {
            Category::Engine => "Engine",
            Category::Trend => "Trend Strategy",
            Category::Scalp => "Scalp Strategy",
            Category::Volatility => "Volatility Strategy",
        }
    }
}

/// Fire-and-forget notification sink. Implementations must return
/// immediately and must not fail the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity, category: Category);
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity, category: Category) {
        match severity {
            Severity::Error => log::error!("[{}] {}", category.title(), message),
            _ => log::info!("[{}] [{}] {}", severity.label(), category.title(), message),
        }
    }
}

/// Posts coloured attachments to a Slack channel
pub struct SlackNotifier {
    http_client: Client,
    token: SecureApiKey,
    channel: String,
    api_url: String,
}

impl SlackNotifier {
    pub fn new(token: SecureApiKey, channel: String, api_url: String) -> Self {
        Self {
            http_client: Client::new(),
            token,
            channel,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn payload(&self, message: &str, severity: Severity, category: Category) -> Value {
        let title = format!("[{}] - {}", severity.label(), category.title());
        json!({
            "channel": self.channel,
            "text": "",
            "attachments": [{
                "color": severity.color(),
                "fallback": format!("{}: {}", title, message),
                "blocks": [{
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*{}*\n{}", title, message) }
                }]
            }]
        })
    }
}

impl Notifier for SlackNotifier {
    fn notify(&self, message: &str, severity: Severity, category: Category) {
        LogNotifier.notify(message, severity, category);

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("Slack notification dropped: no async runtime");
                return;
            }
        };

        let request = self
            .http_client
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(self.token.expose())
            .json(&self.payload(message, severity, category));

        handle.spawn(async move {
            match request.send().await {
                Ok(response) => match response.json::<Value>().await {
                    // Slack reports failures in the body with HTTP 200
                    Ok(body) if body.get("ok").and_then(Value::as_bool) == Some(false) => {
                        log::error!(
                            "Slack API error: {}",
                            body.get("error").and_then(Value::as_str).unwrap_or("unknown")
                        );
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("Slack response parse error: {}", e),
                },
                Err(e) => log::error!("Slack send error: {}", e),
            }
        });
    }
}

/// Build the configured notifier, falling back to the log
pub fn build_notifier(slack: Option<&crate::config::SlackConfig>, api_url: &str) -> Arc<dyn Notifier> {
    match slack {
        Some(cfg) => Arc::new(SlackNotifier::new(
            cfg.token.clone(),
            cfg.channel.clone(),
            api_url.to_string(),
        )),
        None => {
            log::warn!("Slack token not configured, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    }
}
