//! File renaming bot: naming rules, persistence, media processing and the
//! Telegram surface.

pub mod commands;
pub mod database;
pub mod ffmpeg;
pub mod force_sub;
pub mod format;
pub mod inflight;
pub mod manual;
pub mod media;
pub mod naming;
pub mod pipeline;
pub mod premium;
pub mod sequence;
pub mod telegram;

pub use commands::Command;
pub use database::{Database, Setting};
pub use ffmpeg::{MetadataTags, Tools};
pub use manual::PendingRenames;
pub use media::{IncomingMedia, MediaKind};
pub use pipeline::{RenameError, Renamer};
pub use telegram::{ChatApi, TelegramClient};
