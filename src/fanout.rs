use metrics::counter;
use std::sync::Arc;

use crate::config::PushConfig;
use crate::models::{StatusEntry, Subscriber};
use crate::plugins::{ChatSender, PushMessage, PushSender};
use crate::store::SubscriberRegistry;
use crate::utils::non_critical;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTally {
    pub sent: usize,
    pub failed: usize,
}

impl ChannelTally {
    fn record(&mut self, delivered: bool) {
        if delivered {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub subscribers: usize,
    pub chat: ChannelTally,
    pub push: ChannelTally,
}

/// Delivers new entries to every subscriber of an identifier. Each
/// subscriber and each channel fails on its own.
pub struct NotificationFanout {
    registry: Arc<dyn SubscriberRegistry>,
    chat: Arc<dyn ChatSender>,
    push: Option<Arc<dyn PushSender>>,
    topic_prefix: String,
    priority: String,
}

impl NotificationFanout {
    pub fn new(
        registry: Arc<dyn SubscriberRegistry>,
        chat: Arc<dyn ChatSender>,
        push: Option<Arc<dyn PushSender>>,
        push_config: &PushConfig,
    ) -> Self {
        Self {
            registry,
            chat,
            push,
            topic_prefix: push_config.topic_prefix.clone(),
            priority: push_config.priority.clone(),
        }
    }

    pub async fn dispatch(&self, identifier: &str, new_entries: &[StatusEntry]) -> DispatchReport {
        let mut report = DispatchReport::default();
        if new_entries.is_empty() {
            return report;
        }

        let subscribers = match self.registry.list_subscribers(identifier).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                tracing::error!(identifier = %identifier, "Could not list subscribers: {}", e);
                return report;
            }
        };
        report.subscribers = subscribers.len();

        let text = format_chat_message(identifier, new_entries);
        let title = push_title(identifier);
        let body = push_body(new_entries);

        for subscriber in &subscribers {
            let delivered = self.send_chat(subscriber, &text).await;
            report.chat.record(delivered);

            if let Some(push) = &self.push {
                if let Some(delivered) = self.send_push(push.as_ref(), subscriber, &title, &body).await {
                    report.push.record(delivered);
                }
            }
        }

        tracing::info!(
            identifier = %identifier,
            subscribers = report.subscribers,
            chat_sent = report.chat.sent,
            chat_failed = report.chat.failed,
            push_sent = report.push.sent,
            push_failed = report.push.failed,
            "Dispatched {} new entries",
            new_entries.len()
        );
        report
    }

    async fn send_chat(&self, subscriber: &Subscriber, text: &str) -> bool {
        let delivered = non_critical(
            "chat delivery",
            &subscriber.subscriber_id,
            self.chat.send(&subscriber.subscriber_id, text),
        )
        .await
        .is_some();
        count(self.chat.name(), delivered);
        delivered
    }

    /// `None` when the subscriber has no push channel.
    async fn send_push(&self, push: &dyn PushSender, subscriber: &Subscriber, title: &str, body: &str) -> Option<bool> {
        let channel = non_critical(
            "push channel lookup",
            &subscriber.subscriber_id,
            self.registry.get_push_channel(&subscriber.subscriber_id),
        )
        .await
        .flatten()?;

        let message = PushMessage {
            topic: channel.topic(&self.topic_prefix),
            title: title.to_string(),
            body: body.to_string(),
            priority: self.priority.clone(),
        };
        let delivered = non_critical("push delivery", &subscriber.subscriber_id, push.push(&message))
            .await
            .is_some();
        count(push.name(), delivered);
        Some(delivered)
    }
}

fn count(channel: &str, delivered: bool) {
    let outcome = if delivered { "sent" } else { "failed" };
    counter!("notifications_total", "channel" => channel.to_string(), "outcome" => outcome).increment(1);
}

/// Backslash-escape legacy Markdown control characters. Only valid outside
/// entities: legacy Markdown has no escapes inside `*...*` or `_..._`.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn format_chat_message(identifier: &str, entries: &[StatusEntry]) -> String {
    let mut message = format!("*Application update*\n#{} has new statuses:\n", escape_markdown(identifier));
    for (i, entry) in entries.iter().enumerate() {
        let when = entry
            .timestamp()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        message.push_str(&format!("\n*{}.* {}\n_{}_", i + 1, escape_markdown(&entry.text), when));
    }
    message
}

pub fn push_title(identifier: &str) -> String {
    format!("Application update #{}", identifier)
}

pub fn push_body(entries: &[StatusEntry]) -> String {
    entries.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join("\n")
}
