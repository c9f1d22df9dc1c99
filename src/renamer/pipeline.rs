//! The rename job: download, tag, caption, thumbnail, upload.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use teloxide::RequestError;
use teloxide::utils::html;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::renamer::database::{Database, Setting};
use crate::renamer::ffmpeg::{self, FfmpegError, Tools};
use crate::renamer::format::{UNKNOWN_DURATION, format_caption, format_hms, progress_text};
use crate::renamer::inflight::InFlight;
use crate::renamer::media::{IncomingMedia, MediaKind};
use crate::renamer::naming;
use crate::renamer::telegram::{ChatApi, DownloadError, TelegramClient, Upload};

/// Minimum time between progress edits of a status message.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

const OUTPUT_DIR: &str = "out";

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("Metadata processing failed: {0}")]
    Metadata(#[from] FfmpegError),
    #[error("Upload failed: {0}")]
    Upload(#[source] RequestError),
    #[error("Status message failed: {0}")]
    Status(#[source] RequestError),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Directory for one job, removed with everything in it on drop. The
/// renamed output lives in its own `out` folder so a user-chosen name can
/// never land on one of the job's internal files.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    async fn create(root: &Path, label: &str) -> io::Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = root.join(format!("{label}_{nanos}"));
        tokio::fs::create_dir_all(path.join(OUTPUT_DIR)).await?;
        Ok(Self { path })
    }

    /// Internal file of the job (download, thumbnail source).
    fn scratch(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// The file sent back to the user.
    fn output(&self, name: &str) -> PathBuf {
        self.path.join(OUTPUT_DIR).join(name)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            error!("Error removing {:?}: {}", self.path, e);
        }
    }
}

/// Runs rename jobs.
#[derive(Clone)]
pub struct Renamer {
    telegram: TelegramClient,
    database: Arc<Database>,
    tools: Tools,
    work_root: PathBuf,
    inflight: InFlight,
}

impl Renamer {
    pub fn new(
        telegram: TelegramClient,
        database: Arc<Database>,
        tools: Tools,
        work_root: PathBuf,
        duplicate_window: Duration,
    ) -> Self {
        Self {
            telegram,
            database,
            tools,
            work_root,
            inflight: InFlight::new(duplicate_window),
        }
    }

    /// Rename a file with the user's format template, reporting failures to
    /// the chat.
    pub async fn auto_rename(&self, chat_id: i64, user_id: i64, template: &str, media: IncomingMedia) {
        let Some(_claim) = self.inflight.claim(&media.unique_id) else {
            info!("Ignoring duplicate of {} from {}", media.unique_id, user_id);
            return;
        };

        let mut status = None;
        if let Err(e) = self.run_auto(chat_id, user_id, template, &media, &mut status).await {
            error!("Processing error: {}", e);
            if let Some(status_id) = status {
                self.telegram.edit_status(chat_id, status_id, &html::escape(&e.to_string())).await;
            }
            self.telegram
                .send_message(chat_id, &format!("Error: {}", html::escape(&e.to_string())))
                .await
                .ok();
        }
    }

    async fn run_auto(
        &self,
        chat_id: i64,
        user_id: i64,
        template: &str,
        media: &IncomingMedia,
        status: &mut Option<i32>,
    ) -> Result<(), RenameError> {
        let new_name = naming::output_file_name(template, &media.file_name, media.kind);
        info!("Renaming {:?} -> {:?} for {}", media.file_name, new_name, user_id);

        let work = WorkDir::create(&self.work_root, &format!("{user_id}_{}", media.unique_id)).await?;
        let download_path = work.scratch("source");
        let tagged_path = work.output(&new_name);

        let status_id = self
            .telegram
            .send_message(chat_id, "<b>Downloading...</b>")
            .await
            .map_err(RenameError::Status)?;
        *status = Some(status_id);

        self.download_with_progress(chat_id, status_id, media, &download_path).await?;

        self.telegram.edit_status(chat_id, status_id, "<b>Processing metadata...</b>").await;
        let tags = self.database.metadata_tags(user_id)?;
        ffmpeg::add_metadata(&self.tools, &download_path, &tagged_path, &tags).await?;

        let duration = self.duration_text(media, &tagged_path).await;

        self.telegram.edit_status(chat_id, status_id, "<b>Preparing upload...</b>").await;
        let caption = match self.database.get_setting(user_id, Setting::Caption)? {
            Some(template) => format_caption(&template, &html::escape(&new_name), media.file_size, &duration),
            None => format!("<b>{}</b>", html::escape(&new_name)),
        };
        let thumbnail = self.prepare_thumbnail(user_id, media, &work).await;

        let preference = self.database.get_setting(user_id, Setting::MediaPreference)?;
        let kind = media.kind.with_preference(preference.as_deref());
        info!("User {} media preference: {:?}, sending as {}", user_id, preference, kind);

        self.telegram.edit_status(chat_id, status_id, "<b>Uploading...</b>").await;
        self.telegram
            .send_media(Upload {
                chat_id,
                kind,
                path: &tagged_path,
                file_name: &new_name,
                caption: &caption,
                thumbnail: thumbnail.as_deref(),
            })
            .await
            .map_err(RenameError::Upload)?;

        self.telegram.delete_message(chat_id, status_id).await;
        *status = None;
        info!("✅ Sent {:?} to {}", new_name, user_id);
        Ok(())
    }

    /// Rename a file to an explicit name and send it back as a document.
    pub async fn manual_rename(&self, chat_id: i64, media: &IncomingMedia, new_name: &str) -> Result<(), RenameError> {
        let work = WorkDir::create(&self.work_root, &format!("manual_{}", media.unique_id)).await?;
        let path = work.output(new_name);

        let status_id = self
            .telegram
            .send_message(chat_id, "⏳ Downloading...")
            .await
            .map_err(RenameError::Status)?;
        self.download_with_progress(chat_id, status_id, media, &path).await?;

        self.telegram.edit_status(chat_id, status_id, "✅ Renamed! Uploading...").await;
        let caption = format!("<b>Renamed to:</b> <code>{}</code>", html::escape(new_name));
        self.telegram
            .send_media(Upload {
                chat_id,
                kind: MediaKind::Document,
                path: &path,
                file_name: new_name,
                caption: &caption,
                thumbnail: None,
            })
            .await
            .map_err(RenameError::Upload)?;
        self.telegram.delete_message(chat_id, status_id).await;
        Ok(())
    }

    async fn download_with_progress(
        &self,
        chat_id: i64,
        status_id: i32,
        media: &IncomingMedia,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        let written = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        let reporter = {
            let telegram = self.telegram.clone();
            let written = written.clone();
            let total = media.file_size;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
                interval.tick().await;
                let mut last = 0;
                loop {
                    interval.tick().await;
                    let done = written.load(Ordering::Relaxed);
                    if done != last {
                        let text = progress_text("<b>Downloading...</b>", done, total, started.elapsed());
                        telegram.edit_status(chat_id, status_id, &text).await;
                        last = done;
                    }
                }
            })
        };

        let result = self.telegram.download_to(&media.file_id, dest, written).await;
        reporter.abort();
        result
    }

    async fn duration_text(&self, media: &IncomingMedia, path: &Path) -> String {
        if media.kind == MediaKind::Document {
            return UNKNOWN_DURATION.to_string();
        }
        if let Some(secs) = media.duration_secs.filter(|s| *s > 0) {
            return format_hms(secs as u64);
        }
        ffmpeg::probe_duration(&self.tools, path)
            .await
            .map(|d| format_hms(d.as_secs()))
            .unwrap_or_else(|| UNKNOWN_DURATION.to_string())
    }

    /// The user's saved thumbnail, else the video's own, scaled to 320x320.
    async fn prepare_thumbnail(&self, user_id: i64, media: &IncomingMedia, work: &WorkDir) -> Option<PathBuf> {
        let saved = self.database.get_setting(user_id, Setting::Thumbnail).unwrap_or_else(|e| {
            warn!("Failed to read thumbnail for {}: {}", user_id, e);
            None
        });
        let file_id = saved.or_else(|| media.thumbnail_file_id.clone())?;

        let raw = work.scratch("thumb_source");
        if let Err(e) = self.telegram.download_to(&file_id, &raw, Arc::new(AtomicU64::new(0))).await {
            warn!("Thumbnail download failed: {}", e);
            return None;
        }
        let thumb = work.scratch("thumb.jpg");
        match ffmpeg::resize_thumbnail(&self.tools, &raw, &thumb).await {
            Ok(()) => Some(thumb),
            Err(e) => {
                error!("Thumbnail processing failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_work_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let work = WorkDir::create(root.path(), "job").await.unwrap();
            std::fs::write(work.scratch("source"), b"data").unwrap();
            std::fs::write(work.path.join("Show S01E01.mkv"), b"data").unwrap();
            assert!(work.path.exists());
            work.path.clone()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_work_dirs_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let a = WorkDir::create(root.path(), "job").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let b = WorkDir::create(root.path(), "job").await.unwrap();
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn test_output_names_never_hit_internal_files() {
        let root = tempfile::tempdir().unwrap();
        let work = WorkDir::create(root.path(), "job").await.unwrap();
        let outputs = [
            naming::output_file_name("thumb", "cover.jpg", MediaKind::Document),
            naming::output_file_name("source", "notes", MediaKind::Document),
            naming::output_file_name("thumb_source", "raw", MediaKind::Document),
        ];
        for name in &outputs {
            for internal in ["source", "thumb_source", "thumb.jpg"] {
                assert_ne!(work.output(name), work.scratch(internal), "{name} collides");
            }
        }

        std::fs::write(work.scratch("thumb.jpg"), b"thumbnail").unwrap();
        std::fs::write(work.output(&outputs[0]), b"renamed").unwrap();
        assert_eq!(std::fs::read(work.scratch("thumb.jpg")).unwrap(), b"thumbnail");
        assert_eq!(std::fs::read(work.output("thumb.jpg")).unwrap(), b"renamed");
    }

    #[test]
    fn test_error_messages_name_the_step() {
        let err = RenameError::Metadata(FfmpegError::Failed("bad stream".into()));
        assert_eq!(err.to_string(), "Metadata processing failed: FFmpeg error: bad stream");
    }
}
