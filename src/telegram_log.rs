//! Mirrors the bot's own log events into a Telegram log channel.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;
/// Batched lines are flushed early once this many are queued.
const MAX_BATCH: usize = 40;
const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

enum LogLine {
    /// WARN/ERROR, sent right away.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
    /// Only events whose target starts with this are forwarded.
    target_prefix: &'static str,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();

        tokio::spawn(async move {
            let mut batch: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    line = rx.recv() => {
                        match line {
                            Some(LogLine::Urgent(text)) => send_chunks(&bot, chat_id, &text).await,
                            Some(LogLine::Info(text)) => {
                                batch.push(text);
                                if batch.len() >= MAX_BATCH {
                                    flush(&bot, chat_id, &mut batch).await;
                                }
                            }
                            None => {
                                flush(&bot, chat_id, &mut batch).await;
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => flush(&bot, chat_id, &mut batch).await,
                }
            }
        });

        Self { tx, target_prefix: env!("CARGO_CRATE_NAME") }
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let combined = batch.join("\n");
    batch.clear();
    send_chunks(bot, chat_id, &combined).await;
}

async fn send_chunks(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text, MAX_MESSAGE_CHARS) {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            eprintln!("Failed to send log to Telegram: {e}");
            return;
        }
    }
}

/// Split on line boundaries where possible, hard-splitting overlong lines.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let mut line_chars: Vec<char> = line.chars().collect();
        while line_chars.len() > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = line_chars.split_off(limit);
            chunks.push(line_chars.into_iter().collect());
            line_chars = rest;
        }
        let len = line_chars.len();
        let separator = usize::from(!current.is_empty());
        if current_len + separator + len > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.extend(line_chars);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl MessageVisitor {
    fn render(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields.join(", "),
            (false, false) => format!("{} ({})", self.message, self.fields.join(", ")),
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO || !metadata.target().starts_with(self.target_prefix) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let text = visitor.render();

        let line = match level {
            Level::ERROR => LogLine::Urgent(format!("❌ {text}")),
            Level::WARN => LogLine::Urgent(format!("⚠️ {text}")),
            _ => LogLine::Info(text),
        };

        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_message("a\nb", 10), vec!["a\nb"]);
    }

    #[test]
    fn test_splits_on_lines() {
        assert_eq!(split_message("aaaa\nbbbb\ncc", 9), vec!["aaaa\nbbbb", "cc"]);
    }

    #[test]
    fn test_hard_splits_long_line() {
        assert_eq!(split_message("x\nabcdefg", 3), vec!["x", "abc", "def", "g"]);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let text = "ééééé";
        assert_eq!(split_message(text, 5), vec![text]);
    }

    #[test]
    fn test_visitor_render() {
        let visitor = MessageVisitor {
            message: "Renamed".into(),
            fields: vec!["user=1".into()],
        };
        assert_eq!(visitor.render(), "Renamed (user=1)");
        assert_eq!(MessageVisitor::default().render(), "");
    }
}
