//! Forced channel subscription before the bot can be used.

use std::future::Future;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::{debug, warn};

/// Callback data of the "Joined" button.
pub const CHECK_SUBSCRIPTION: &str = "check_subscription";
/// Callback data that opens the help screen.
pub const HELP: &str = "help";

pub const JOIN_PROMPT: &str =
    "<b>You haven't joined all the required channels yet. Join the update channels to continue.</b>";
pub const STILL_MISSING: &str =
    "<b>You still haven't joined all the required channels. Please join them to continue.</b>";
pub const ALL_JOINED: &str =
    "<b>You have joined all the required channels. Send /start now.</b>";

/// Membership of a user in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Joined,
    Left,
    Banned,
}

/// Where channel membership is looked up.
pub trait MembershipSource {
    fn membership(&self, channel: &str, user_id: u64) -> impl Future<Output = Result<Membership, String>> + Send;
}

/// Whether a channel username is acceptable in the config.
pub fn is_valid_channel(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Channels the user still has to join. Lookup failures count as not joined.
pub async fn not_joined<S: MembershipSource>(source: &S, channels: &[String], user_id: u64) -> Vec<String> {
    let mut missing = Vec::new();
    for channel in channels {
        match source.membership(channel, user_id).await {
            Ok(Membership::Joined) => {}
            Ok(status) => {
                debug!("User {} is {:?} in @{}", user_id, status, channel);
                missing.push(channel.clone());
            }
            Err(e) => {
                warn!("Membership lookup in @{} failed for {}: {}", channel, user_id, e);
                missing.push(channel.clone());
            }
        }
    }
    missing
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One join button per missing channel plus the recheck button.
pub fn join_keyboard(missing: &[String]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = missing
        .iter()
        .filter_map(|channel| {
            let url = reqwest::Url::parse(&format!("https://t.me/{channel}")).ok()?;
            Some(vec![InlineKeyboardButton::url(format!("• Join {} •", capitalize(channel)), url)])
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback("• Joined •", CHECK_SUBSCRIPTION)]);
    InlineKeyboardMarkup::new(rows)
}

/// Keyboard shown once every channel is joined.
pub fn joined_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("• Now click here •", HELP)]])
}
