use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

use crate::renamer::ffmpeg::Tools;
use crate::renamer::force_sub::is_valid_channel;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid URL.
    InvalidUrl { url: String, reason: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidUrl { url, reason } => {
                write!(f, "invalid url '{}': {}", url, reason)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidUrl { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Owners grant and revoke premium plans.
    owner_ids: Vec<u64>,
    /// Users allowed to use `/rename` besides the owners.
    #[serde(default)]
    admin_ids: Vec<u64>,
    /// Channel usernames (without @) users must join.
    #[serde(default)]
    force_sub_channels: Vec<String>,
    /// Image shown with the join prompt.
    force_sub_image_url: Option<String>,
    /// Who to contact for premium, e.g. "@owner".
    premium_contact: Option<String>,
    /// Directory for the database, logs and work files. Defaults to current directory.
    data_dir: Option<String>,
    log_chat_id: Option<i64>,
    /// Local Bot API server (lifts the 20 MB download limit).
    api_url: Option<String>,
    ffmpeg_path: Option<String>,
    ffprobe_path: Option<String>,
    #[serde(default = "default_duplicate_window_secs")]
    duplicate_window_secs: u64,
    #[serde(default = "default_rename_reply_timeout_secs")]
    rename_reply_timeout_secs: u64,
    #[serde(default = "default_sequence_send_delay_ms")]
    sequence_send_delay_ms: u64,
    #[serde(default = "default_premium_check_interval_secs")]
    premium_check_interval_secs: u64,
}

fn default_duplicate_window_secs() -> u64 {
    10
}

fn default_rename_reply_timeout_secs() -> u64 {
    60
}

fn default_sequence_send_delay_ms() -> u64 {
    100
}

fn default_premium_check_interval_secs() -> u64 {
    60
}

pub struct Config {
    pub telegram_bot_token: String,
    pub owner_ids: HashSet<UserId>,
    pub admin_ids: HashSet<UserId>,
    pub force_sub_channels: Vec<String>,
    pub force_sub_image_url: Option<reqwest::Url>,
    pub premium_contact: String,
    /// Directory for state files (database, logs, work files).
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub api_url: Option<reqwest::Url>,
    pub tools: Tools,
    pub duplicate_window: Duration,
    pub rename_reply_timeout: Duration,
    pub sequence_send_delay: Duration,
    pub premium_check_interval: Duration,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.owner_ids.is_empty() {
            return Err(ConfigError::Validation("owner_ids must contain at least one owner ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let force_sub_channels: Vec<String> = file
            .force_sub_channels
            .into_iter()
            .map(|c| c.trim().trim_start_matches('@').to_string())
            .collect();
        if let Some(bad) = force_sub_channels.iter().find(|c| !is_valid_channel(c)) {
            return Err(ConfigError::Validation(format!(
                "invalid Telegram channel username in force_sub_channels: '{bad}'"
            )));
        }

        if file.duplicate_window_secs == 0 {
            return Err(ConfigError::Validation("duplicate_window_secs must be at least 1".into()));
        }
        if file.rename_reply_timeout_secs == 0 {
            return Err(ConfigError::Validation("rename_reply_timeout_secs must be at least 1".into()));
        }
        if file.premium_check_interval_secs == 0 {
            return Err(ConfigError::Validation("premium_check_interval_secs must be at least 1".into()));
        }

        let force_sub_image_url = file.force_sub_image_url.map(|u| parse_url(&u)).transpose()?;
        let api_url = file.api_url.map(|u| parse_url(&u)).transpose()?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let defaults = Tools::default();
        let tools = Tools {
            ffmpeg: file.ffmpeg_path.map(PathBuf::from).unwrap_or(defaults.ffmpeg),
            ffprobe: file.ffprobe_path.map(PathBuf::from).unwrap_or(defaults.ffprobe),
        };

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            owner_ids: file.owner_ids.into_iter().map(UserId).collect(),
            admin_ids: file.admin_ids.into_iter().map(UserId).collect(),
            force_sub_channels,
            force_sub_image_url,
            premium_contact: file.premium_contact.unwrap_or_else(|| "the bot owner".to_string()),
            data_dir,
            log_chat_id: file.log_chat_id.map(ChatId),
            api_url,
            tools,
            duplicate_window: Duration::from_secs(file.duplicate_window_secs),
            rename_reply_timeout: Duration::from_secs(file.rename_reply_timeout_secs),
            sequence_send_delay: Duration::from_millis(file.sequence_send_delay_ms),
            premium_check_interval: Duration::from_secs(file.premium_check_interval_secs),
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id)
    }

    /// Owners and admins may use manual rename.
    pub fn can_manual_rename(&self, user_id: UserId) -> bool {
        self.is_owner(user_id) || self.admin_ids.contains(&user_id)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("autorename.db")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }
}

fn parse_url(url: &str) -> Result<reqwest::Url, ConfigError> {
    reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUrl { url: url.to_string(), reason: e.to_string() })
}
