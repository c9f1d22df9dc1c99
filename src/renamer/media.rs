//! Incoming media descriptors.

use std::fmt;
use std::str::FromStr;

use teloxide::types::Message;

/// The Telegram media kind a file arrived as (or is sent back as).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Document,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Extension used when the original name has none.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Document => "",
            MediaKind::Video => ".mp4",
            MediaKind::Audio => ".mp3",
        }
    }

    /// Name used when Telegram did not send one.
    fn fallback_name(&self) -> &'static str {
        match self {
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Resolve the kind to upload as from a stored preference.
    ///
    /// Unset or unrecognised preferences fall back to `self`.
    pub fn with_preference(self, preference: Option<&str>) -> MediaKind {
        preference
            .and_then(|p| p.parse().ok())
            .unwrap_or(self)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "document" => Ok(MediaKind::Document),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(format!("unknown media type '{other}'")),
        }
    }
}

/// A document, video or audio file taken from a message.
#[derive(Debug, Clone)]
pub struct IncomingMedia {
    pub kind: MediaKind,
    pub file_id: String,
    pub unique_id: String,
    pub file_name: String,
    pub file_size: u64,
    /// Duration in seconds as reported by Telegram (video/audio only).
    pub duration_secs: Option<u32>,
    /// File id of the thumbnail Telegram generated for a video.
    pub thumbnail_file_id: Option<String>,
}

impl IncomingMedia {
    pub fn from_message(msg: &Message) -> Option<Self> {
        if let Some(doc) = msg.document() {
            return Some(Self {
                kind: MediaKind::Document,
                file_id: doc.file.id.0.clone(),
                unique_id: doc.file.unique_id.0.clone(),
                file_name: doc
                    .file_name
                    .clone()
                    .unwrap_or_else(|| MediaKind::Document.fallback_name().to_string()),
                file_size: doc.file.size as u64,
                duration_secs: None,
                thumbnail_file_id: None,
            });
        }
        if let Some(video) = msg.video() {
            return Some(Self {
                kind: MediaKind::Video,
                file_id: video.file.id.0.clone(),
                unique_id: video.file.unique_id.0.clone(),
                file_name: video
                    .file_name
                    .clone()
                    .unwrap_or_else(|| MediaKind::Video.fallback_name().to_string()),
                file_size: video.file.size as u64,
                duration_secs: Some(video.duration.seconds()),
                thumbnail_file_id: video.thumbnail.as_ref().map(|t| t.file.id.0.clone()),
            });
        }
        if let Some(audio) = msg.audio() {
            return Some(Self {
                kind: MediaKind::Audio,
                file_id: audio.file.id.0.clone(),
                unique_id: audio.file.unique_id.0.clone(),
                file_name: audio
                    .file_name
                    .clone()
                    .unwrap_or_else(|| MediaKind::Audio.fallback_name().to_string()),
                file_size: audio.file.size as u64,
                duration_secs: Some(audio.duration.seconds()),
                thumbnail_file_id: None,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("Video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert_eq!(" document ".parse::<MediaKind>().unwrap(), MediaKind::Document);
        assert!("photo".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_preference_fallback() {
        assert_eq!(MediaKind::Video.with_preference(None), MediaKind::Video);
        assert_eq!(MediaKind::Video.with_preference(Some("AUDIO")), MediaKind::Audio);
        assert_eq!(MediaKind::Audio.with_preference(Some("gif")), MediaKind::Audio);
    }
}
