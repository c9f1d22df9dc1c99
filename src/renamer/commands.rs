//! Bot commands and the texts and keyboards that go with them.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

use crate::renamer::database::Setting;
use crate::renamer::ffmpeg::MetadataTags;
use crate::renamer::media::MediaKind;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "start the bot.")]
    Start(String),
    #[command(description = "show this text.")]
    Help,
    #[command(description = "set the rename format, e.g. /autorename Show S{season}E{episode} [{quality}]")]
    Autorename(String),
    #[command(description = "send files as document, video or audio.")]
    SetMedia(String),
    #[command(rename = "set_caption", description = "set a caption with {filename}, {filesize} and {duration}.")]
    SetCaption(String),
    #[command(rename = "del_caption", description = "delete your caption.")]
    DelCaption,
    #[command(rename = "see_caption", description = "show your caption.")]
    SeeCaption,
    #[command(description = "show your thumbnail (send a photo to set one).")]
    ViewThumb,
    #[command(description = "delete your thumbnail.")]
    DelThumb,
    #[command(description = "set the title tag.")]
    SetTitle(String),
    #[command(description = "set the artist tag.")]
    SetArtist(String),
    #[command(description = "set the author tag.")]
    SetAuthor(String),
    #[command(description = "set the video stream title.")]
    SetVideo(String),
    #[command(description = "set the audio stream title.")]
    SetAudio(String),
    #[command(description = "set the subtitle stream title.")]
    SetSubtitle(String),
    #[command(description = "show your metadata tags.")]
    Metadata,
    #[command(description = "collect files to send back in episode order.")]
    StartSequence,
    #[command(description = "send the collected files in order.")]
    EndSequence,
    #[command(description = "top sequencers.")]
    Leaderboard,
    #[command(description = "show your premium plan.")]
    MyPlan(String),
    #[command(description = "reply to a file to rename it by hand.")]
    Rename(String),
    #[command(description = "cancel a pending rename.")]
    Cancel,
    #[command(hide)]
    AddPremium(String),
    #[command(hide)]
    RmPremium(String),
}

/// A metadata tag the user can set with its own command.
pub struct MetadataField {
    pub setting: Setting,
    pub label: &'static str,
    pub command: &'static str,
}

pub static METADATA_FIELDS: [MetadataField; 6] = [
    MetadataField { setting: Setting::Title, label: "Title", command: "/settitle" },
    MetadataField { setting: Setting::Artist, label: "Artist", command: "/setartist" },
    MetadataField { setting: Setting::Author, label: "Author", command: "/setauthor" },
    MetadataField { setting: Setting::VideoTitle, label: "Video", command: "/setvideo" },
    MetadataField { setting: Setting::AudioTitle, label: "Audio", command: "/setaudio" },
    MetadataField { setting: Setting::SubtitleTitle, label: "Subtitle", command: "/setsubtitle" },
];

impl Command {
    /// The field and value of a metadata setter command.
    pub fn metadata_update(&self) -> Option<(&'static MetadataField, &str)> {
        let (index, value) = match self {
            Command::SetTitle(v) => (0, v),
            Command::SetArtist(v) => (1, v),
            Command::SetAuthor(v) => (2, v),
            Command::SetVideo(v) => (3, v),
            Command::SetAudio(v) => (4, v),
            Command::SetSubtitle(v) => (5, v),
            _ => return None,
        };
        Some((&METADATA_FIELDS[index], value.trim()))
    }
}

pub fn start_text(first_name: &str) -> String {
    format!(
        "👋 Hello {}!\n\n\
         I rename your files automatically and can add your own caption, thumbnail and metadata.\n\n\
         Set a format with /autorename, then send me a document, video or audio file. \
         Send /help to see everything I can do.",
        html::escape(first_name)
    )
}

pub fn help_text() -> String {
    format!(
        "{}\n\n\
         <b>Format variables:</b> <code>{{season}}</code>, <code>{{episode}}</code>, <code>{{quality}}</code>\n\
         <b>Caption variables:</b> <code>{{filename}}</code>, <code>{{filesize}}</code>, <code>{{duration}}</code>",
        html::escape(&Command::descriptions().to_string())
    )
}

pub fn premium_required(contact: &str) -> String {
    format!(
        "❌ <b>Premium Feature</b> ❌\n\n\
         File renaming is a premium feature.\n\
         Contact {} to rename files.",
        html::escape(contact)
    )
}

pub const NO_FORMAT: &str = "Please set a rename format using /autorename";

pub const AUTORENAME_USAGE: &str = "<b>Please provide a rename format.</b>\n\n\
Example: <code>/autorename Overflow [S{season}E{episode}] [{quality}]</code>";

pub const CAPTION_USAGE: &str = "<b>Give a caption to set.</b>\n\n\
Variables:\n\
<code>{filename}</code> file name\n\
<code>{filesize}</code> file size\n\
<code>{duration}</code> duration\n\n\
Example: <code>/set_caption 📕 Name ➠ {filename}\n🔗 Size ➠ {filesize}\n⏰ Duration ➠ {duration}</code>";

pub fn format_set(template: &str) -> String {
    format!("✅ <b>Your auto rename format has been set to:</b>\n<code>{}</code>", html::escape(template))
}

pub fn format_current(template: &str) -> String {
    format!("<b>Your current format:</b>\n<code>{}</code>", html::escape(template))
}

pub fn caption_current(caption: &str) -> String {
    format!("<b>Your caption:</b>\n\n<code>{}</code>", html::escape(caption))
}

pub fn metadata_usage(field: &MetadataField) -> String {
    format!(
        "<b>Give the {} tag.</b>\n\nExample: <code>{} Encoded by @MyChannel</code>",
        field.label.to_lowercase(),
        field.command
    )
}

pub fn metadata_saved(field: &MetadataField, value: &str) -> String {
    format!("✅ <b>{} saved:</b> <code>{}</code>", field.label, html::escape(value))
}

/// The `/metadata` overview.
pub fn metadata_view(tags: &MetadataTags) -> String {
    let values = [
        &tags.title,
        &tags.artist,
        &tags.author,
        &tags.video_title,
        &tags.audio_title,
        &tags.subtitle_title,
    ];
    let mut text = String::from("<b>Your metadata</b>\n\n");
    for (field, value) in METADATA_FIELDS.iter().zip(values) {
        let shown = if value.is_empty() {
            "Not set".to_string()
        } else {
            format!("<code>{}</code>", html::escape(value))
        };
        text.push_str(&format!("<b>{}:</b> {}\n", field.label, shown));
    }
    text.push_str("\nEmpty tags are left untouched.");
    text
}

/// Callback data prefix of the media preference buttons.
pub const SETMEDIA_PREFIX: &str = "setmedia:";

pub const SETMEDIA_PROMPT: &str = "<b>Select your preferred media type:</b>";

pub fn setmedia_keyboard() -> InlineKeyboardMarkup {
    let row = [MediaKind::Document, MediaKind::Video, MediaKind::Audio]
        .into_iter()
        .map(|kind| {
            let label = match kind {
                MediaKind::Document => "📁 Document",
                MediaKind::Video => "🎥 Video",
                MediaKind::Audio => "🎵 Audio",
            };
            InlineKeyboardButton::callback(label, format!("{SETMEDIA_PREFIX}{kind}"))
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

/// The media kind chosen by a `setmedia:` button.
pub fn parse_setmedia(data: &str) -> Option<MediaKind> {
    data.strip_prefix(SETMEDIA_PREFIX)?.parse().ok()
}

pub fn media_set(kind: MediaKind) -> String {
    format!("✅ <b>Media preference set to:</b> {kind}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn parse(text: &str) -> Option<Command> {
        Command::parse(text, "renamer_bot").ok()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/start"), Some(Command::Start(String::new())));
        assert_eq!(parse("/help"), Some(Command::Help));
        assert_eq!(
            parse("/autorename Show S{season}E{episode}"),
            Some(Command::Autorename("Show S{season}E{episode}".into()))
        );
        assert_eq!(parse("/set_caption {filename}"), Some(Command::SetCaption("{filename}".into())));
        assert_eq!(parse("/del_caption"), Some(Command::DelCaption));
        assert_eq!(parse("/startsequence"), Some(Command::StartSequence));
        assert_eq!(parse("/addpremium 123 30d"), Some(Command::AddPremium("123 30d".into())));
        assert_eq!(parse("/myplan@renamer_bot"), Some(Command::MyPlan(String::new())));
        assert_eq!(parse("hello"), None);
        assert_eq!(parse("/unknown"), None);
    }

    #[test]
    fn test_metadata_update() {
        let cmd = Command::SetArtist("  Someone ".into());
        let (field, value) = cmd.metadata_update().unwrap();
        assert_eq!(field.setting, Setting::Artist);
        assert_eq!(value, "Someone");
        assert!(Command::Metadata.metadata_update().is_none());
    }

    #[test]
    fn test_metadata_view() {
        let tags = MetadataTags { title: "My <Show>".into(), ..Default::default() };
        let text = metadata_view(&tags);
        assert!(text.contains("<b>Title:</b> <code>My &lt;Show&gt;</code>"));
        assert!(text.contains("<b>Artist:</b> Not set"));
    }

    #[test]
    fn test_setmedia_callbacks() {
        let keyboard = setmedia_keyboard();
        let data: Vec<_> = keyboard.inline_keyboard[0]
            .iter()
            .map(|button| match &button.kind {
                InlineKeyboardButtonKind::CallbackData(data) => data.clone(),
                other => panic!("expected callback button, got {other:?}"),
            })
            .collect();
        assert_eq!(data, ["setmedia:document", "setmedia:video", "setmedia:audio"]);
        assert_eq!(parse_setmedia("setmedia:video"), Some(MediaKind::Video));
        assert_eq!(parse_setmedia("setmedia:gif"), None);
        assert_eq!(parse_setmedia("help"), None);
    }

    #[test]
    fn test_help_lists_commands() {
        let help = help_text();
        assert!(help.contains("/set_caption"));
        assert!(help.contains("/startsequence"));
        assert!(!help.contains("/addpremium"));
    }
}
