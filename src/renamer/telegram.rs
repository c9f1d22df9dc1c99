//! Telegram client using teloxide.

use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use teloxide::RequestError;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberKind, FileId, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, Recipient,
};
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use crate::renamer::force_sub::{Membership, MembershipSource};
use crate::renamer::media::MediaKind;

/// Telegram API client.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

/// An outgoing media upload.
pub struct Upload<'a> {
    pub chat_id: i64,
    pub kind: MediaKind,
    pub path: &'a Path,
    pub file_name: &'a str,
    pub caption: &'a str,
    pub thumbnail: Option<&'a Path>,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send a photo by URL with caption and keyboard.
    pub async fn send_photo_url(
        &self,
        chat_id: i64,
        url: reqwest::Url,
        caption: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<i32, RequestError> {
        self.bot
            .send_photo(ChatId(chat_id), InputFile::url(url))
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await
            .map(|msg| msg.id.0)
    }

    /// Send a photo by file id (e.g. a stored thumbnail).
    pub async fn send_photo_id(&self, chat_id: i64, file_id: &str, caption: &str) -> Result<i32, RequestError> {
        self.bot
            .send_photo(ChatId(chat_id), InputFile::file_id(FileId(file_id.to_string())))
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id.0)
    }

    /// Edit a status message. Failures are logged, not returned.
    pub async fn edit_status(&self, chat_id: i64, message_id: i32, text: &str) {
        if let Err(e) = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .parse_mode(ParseMode::Html)
            .await
        {
            warn!("Failed to edit status message {}: {}", message_id, e);
        }
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i32) {
        if let Err(e) = self.bot.delete_message(ChatId(chat_id), MessageId(message_id)).await {
            warn!("Failed to delete message {}: {}", message_id, e);
        }
    }

    /// Download a file to `dest`, counting written bytes into `progress`.
    pub async fn download_to(
        &self,
        file_id: &str,
        dest: &Path,
        progress: Arc<AtomicU64>,
    ) -> Result<(), DownloadError> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;
        let out = tokio::fs::File::create(dest).await?;
        let mut writer = CountingWriter { inner: out, written: progress };
        self.bot.download_file(&file.path, &mut writer).await?;
        tokio::io::AsyncWriteExt::flush(&mut writer).await?;
        info!("📥 Downloaded {} bytes to {:?}", writer.written.load(Ordering::Relaxed), dest);
        Ok(())
    }

    /// Upload a file as a document, video or audio.
    pub async fn send_media(&self, upload: Upload<'_>) -> Result<(), RequestError> {
        let chat_id = ChatId(upload.chat_id);
        let file = InputFile::file(upload.path).file_name(upload.file_name.to_string());
        let thumbnail = upload.thumbnail.map(InputFile::file);
        info!("📤 Sending {} {:?} to chat {}", upload.kind, upload.file_name, upload.chat_id);

        match upload.kind {
            MediaKind::Document => {
                let mut request = self.bot.send_document(chat_id, file).caption(upload.caption).parse_mode(ParseMode::Html);
                if let Some(thumb) = thumbnail {
                    request = request.thumbnail(thumb);
                }
                request.await?;
            }
            MediaKind::Video => {
                let mut request = self
                    .bot
                    .send_video(chat_id, file)
                    .caption(upload.caption)
                    .parse_mode(ParseMode::Html)
                    .supports_streaming(true);
                if let Some(thumb) = thumbnail {
                    request = request.thumbnail(thumb);
                }
                request.await?;
            }
            MediaKind::Audio => {
                let mut request = self.bot.send_audio(chat_id, file).caption(upload.caption).parse_mode(ParseMode::Html);
                if let Some(thumb) = thumbnail {
                    request = request.thumbnail(thumb);
                }
                request.await?;
            }
        }
        Ok(())
    }

    pub async fn answer_callback(&self, query: &CallbackQuery, text: Option<&str>) {
        let mut request = self.bot.answer_callback_query(query.id.clone());
        if let Some(text) = text {
            request = request.text(text);
        }
        if let Err(e) = request.await {
            warn!("Failed to answer callback query: {}", e);
        }
    }
}

/// Chat operations the update handlers run. Messages are sent as HTML.
pub trait ChatApi: MembershipSource + Sync {
    fn send_message(&self, chat_id: i64, text: &str) -> impl Future<Output = Result<i32, RequestError>> + Send;

    fn send_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> impl Future<Output = Result<i32, RequestError>> + Send;

    fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;

    fn edit_text_with_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;

    fn copy_message(
        &self,
        to_chat: i64,
        from_chat: i64,
        message_id: i32,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;
}

impl ChatApi for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32, RequestError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id.0)
    }

    async fn send_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<i32, RequestError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await
            .map(|msg| msg.id.0)
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), RequestError> {
        self.bot
            .edit_message_caption(ChatId(chat_id), MessageId(message_id))
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await
            .map(|_| ())
    }

    async fn edit_text_with_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), RequestError> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await
            .map(|_| ())
    }

    async fn copy_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Result<(), RequestError> {
        self.bot
            .copy_message(ChatId(to_chat), ChatId(from_chat), MessageId(message_id))
            .await
            .map(|_| ())
    }
}

impl MembershipSource for TelegramClient {
    async fn membership(&self, channel: &str, user_id: u64) -> Result<Membership, String> {
        let chat = Recipient::ChannelUsername(format!("@{channel}"));
        let member = self
            .bot
            .get_chat_member(chat, UserId(user_id))
            .await
            .map_err(|e| e.to_string())?;
        Ok(match member.kind {
            ChatMemberKind::Left => Membership::Left,
            ChatMemberKind::Banned(_) => Membership::Banned,
            _ => Membership::Joined,
        })
    }
}

/// Errors while fetching a file from Telegram.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0}")]
    Request(#[from] RequestError),
    #[error("{0}")]
    Download(#[from] teloxide::DownloadError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Writer that counts the bytes passing through it.
struct CountingWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written.fetch_add(*n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
