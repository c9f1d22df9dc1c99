//! Persistent SQLite database for user settings, premium plans and sequences.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::renamer::ffmpeg::MetadataTags;
use crate::renamer::sequence::{LeaderboardEntry, SequencedFile};

/// A per-user text setting stored in the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    FormatTemplate,
    Caption,
    Thumbnail,
    MediaPreference,
    Title,
    Artist,
    Author,
    VideoTitle,
    AudioTitle,
    SubtitleTitle,
}

impl Setting {
    fn column(&self) -> &'static str {
        match self {
            Setting::FormatTemplate => "format_template",
            Setting::Caption => "caption",
            Setting::Thumbnail => "thumbnail_file_id",
            Setting::MediaPreference => "media_preference",
            Setting::Title => "meta_title",
            Setting::Artist => "meta_artist",
            Setting::Author => "meta_author",
            Setting::VideoTitle => "meta_video",
            Setting::AudioTitle => "meta_audio",
            Setting::SubtitleTitle => "meta_subtitle",
        }
    }
}

/// A user the bot has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUser {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

/// Persistent SQLite database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn new() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let db = Self::init(Connection::open(path)?)?;
        let users: i64 = db.conn().query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        info!("Loaded database from {:?} ({} users)", path, users);
        Ok(db)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT NOT NULL DEFAULT '',
                format_template TEXT,
                caption TEXT,
                thumbnail_file_id TEXT,
                media_preference TEXT,
                meta_title TEXT,
                meta_artist TEXT,
                meta_author TEXT,
                meta_video TEXT,
                meta_audio TEXT,
                meta_subtitle TEXT,
                premium_expires_at TEXT,
                files_sequenced INTEGER NOT NULL DEFAULT 0,
                first_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS active_sequences (
                user_id INTEGER PRIMARY KEY,
                started_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sequence_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                file_name TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_username ON users(LOWER(username));
            CREATE INDEX IF NOT EXISTS idx_users_premium ON users(premium_expires_at);
            CREATE INDEX IF NOT EXISTS idx_sequence_files_user ON sequence_files(user_id);
        "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    // ==================== USERS ====================

    /// Record a user, refreshing their names.
    pub fn touch_user(&self, user_id: i64, username: Option<&str>, first_name: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO users (user_id, username, first_name, first_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                username = ?2,
                first_name = ?3",
            params![user_id, username, first_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Find a user by username (exact, case-insensitive, `@` optional).
    pub fn find_user_by_username(&self, username: &str) -> rusqlite::Result<Option<KnownUser>> {
        let username = username.trim_start_matches('@');
        self.conn()
            .query_row(
                "SELECT user_id, username, first_name FROM users WHERE LOWER(username) = LOWER(?1) LIMIT 1",
                params![username],
                |row| {
                    Ok(KnownUser {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn get_user(&self, user_id: i64) -> rusqlite::Result<Option<KnownUser>> {
        self.conn()
            .query_row(
                "SELECT user_id, username, first_name FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(KnownUser {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    fn ensure_user(conn: &Connection, user_id: i64) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, first_seen) VALUES (?1, ?2)",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ==================== SETTINGS ====================

    pub fn get_setting(&self, user_id: i64, setting: Setting) -> rusqlite::Result<Option<String>> {
        let sql = format!("SELECT {} FROM users WHERE user_id = ?1", setting.column());
        let value: Option<Option<String>> = self
            .conn()
            .query_row(&sql, params![user_id], |row| row.get(0))
            .optional()?;
        Ok(value.flatten().filter(|v| !v.is_empty()))
    }

    /// Store a setting; `None` clears it.
    pub fn set_setting(&self, user_id: i64, setting: Setting, value: Option<&str>) -> rusqlite::Result<()> {
        let conn = self.conn();
        Self::ensure_user(&conn, user_id)?;
        let sql = format!("UPDATE users SET {} = ?2 WHERE user_id = ?1", setting.column());
        conn.execute(&sql, params![user_id, value])?;
        Ok(())
    }

    pub fn metadata_tags(&self, user_id: i64) -> rusqlite::Result<MetadataTags> {
        self.conn()
            .query_row(
                "SELECT meta_title, meta_artist, meta_author, meta_video, meta_audio, meta_subtitle
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(MetadataTags {
                        title: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        artist: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        author: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        video_title: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        audio_title: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        subtitle_title: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map(Option::unwrap_or_default)
    }

    // ==================== PREMIUM ====================

    pub fn set_premium(&self, user_id: i64, expires_at: DateTime<Utc>) -> rusqlite::Result<()> {
        let conn = self.conn();
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET premium_expires_at = ?2 WHERE user_id = ?1",
            params![user_id, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a plan. Returns whether the user had one.
    pub fn remove_premium(&self, user_id: i64) -> rusqlite::Result<bool> {
        let changed = self.conn().execute(
            "UPDATE users SET premium_expires_at = NULL WHERE user_id = ?1 AND premium_expires_at IS NOT NULL",
            params![user_id],
        )?;
        Ok(changed > 0)
    }

    /// Expiry of the user's plan, expired or not.
    pub fn premium_expiry(&self, user_id: i64) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT premium_expires_at FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .flatten()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Expiry of the user's plan when it is still active at `now`.
    pub fn active_premium(&self, user_id: i64, now: DateTime<Utc>) -> rusqlite::Result<Option<DateTime<Utc>>> {
        Ok(self.premium_expiry(user_id)?.filter(|expiry| *expiry > now))
    }

    /// Clear every plan that expired at or before `now`, returning the users.
    pub fn take_expired_premium(&self, now: DateTime<Utc>) -> rusqlite::Result<Vec<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let expired: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT user_id, premium_expires_at FROM users WHERE premium_expires_at IS NOT NULL")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            let mut expired = Vec::new();
            for row in rows {
                let (user_id, raw) = row?;
                let done = DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc) <= now)
                    .unwrap_or(true);
                if done {
                    expired.push(user_id);
                }
            }
            expired
        };
        for user_id in &expired {
            tx.execute("UPDATE users SET premium_expires_at = NULL WHERE user_id = ?1", params![user_id])?;
        }
        tx.commit()?;
        Ok(expired)
    }

    // ==================== SEQUENCES ====================

    /// Open a sequence. Returns false if one was already open.
    pub fn start_sequence(&self, user_id: i64) -> rusqlite::Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO active_sequences (user_id, started_at) VALUES (?1, ?2)",
            params![user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    pub fn is_in_sequence(&self, user_id: i64) -> rusqlite::Result<bool> {
        self.conn()
            .query_row(
                "SELECT 1 FROM active_sequences WHERE user_id = ?1",
                params![user_id],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
    }

    pub fn add_sequence_file(&self, user_id: i64, file: &SequencedFile) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO sequence_files (user_id, chat_id, message_id, file_name) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, file.chat_id, file.message_id, file.file_name],
        )?;
        Ok(())
    }

    /// Stored files of an open sequence, in arrival order.
    pub fn sequence_files(&self, user_id: i64) -> rusqlite::Result<Vec<SequencedFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chat_id, message_id, file_name FROM sequence_files WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(SequencedFile {
                chat_id: row.get(0)?,
                message_id: row.get(1)?,
                file_name: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Close the sequence, credit the user with `count` files and record the
    /// name shown on the leaderboard.
    pub fn finish_sequence(&self, user_id: i64, count: usize, display_name: &str) -> rusqlite::Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sequence_files WHERE user_id = ?1", params![user_id])?;
        tx.execute("DELETE FROM active_sequences WHERE user_id = ?1", params![user_id])?;
        tx.execute(
            "INSERT INTO users (user_id, first_name, files_sequenced, first_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                first_name = ?2,
                files_sequenced = files_sequenced + ?3",
            params![user_id, display_name, count as i64, Utc::now().to_rfc3339()],
        )?;
        tx.commit()
    }

    pub fn leaderboard(&self, limit: usize) -> rusqlite::Result<Vec<LeaderboardEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(NULLIF(first_name, ''), username, CAST(user_id AS TEXT)), files_sequenced
             FROM users WHERE files_sequenced > 0
             ORDER BY files_sequenced DESC, user_id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(LeaderboardEntry {
                name: row.get(0)?,
                files_sequenced: row.get(1)?,
            })
        })?;
        rows.collect()
    }
}
