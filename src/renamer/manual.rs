//! Manual rename: the user replies to a file with `/rename` and then sends
//! the new name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::renamer::media::IncomingMedia;
use crate::renamer::naming::sanitize_file_name;

/// A prompt waiting for the user's reply.
#[derive(Debug, Clone)]
pub struct PendingRename {
    pub chat_id: i64,
    pub media: IncomingMedia,
    deadline: Instant,
    token: u64,
}

/// Outstanding `/rename` prompts, one per user.
#[derive(Clone)]
pub struct PendingRenames {
    inner: Arc<Mutex<(HashMap<i64, PendingRename>, u64)>>,
    timeout: Duration,
}

impl PendingRenames {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new((HashMap::new(), 0))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a prompt, replacing any earlier one. Returns a token for
    /// [`PendingRenames::expire`].
    pub async fn insert(&self, user_id: i64, chat_id: i64, media: IncomingMedia) -> u64 {
        let mut guard = self.inner.lock().await;
        let (pending, next) = &mut *guard;
        *next += 1;
        let token = *next;
        pending.insert(
            user_id,
            PendingRename {
                chat_id,
                media,
                deadline: Instant::now() + self.timeout,
                token,
            },
        );
        token
    }

    /// Take the user's prompt if it has not timed out.
    pub async fn take(&self, user_id: i64) -> Option<PendingRename> {
        let mut guard = self.inner.lock().await;
        let pending = guard.0.remove(&user_id)?;
        (Instant::now() < pending.deadline).then_some(pending)
    }

    /// Drop the prompt identified by `token` if it is still waiting.
    /// Returns it so the caller can send a timeout notice.
    pub async fn expire(&self, user_id: i64, token: u64) -> Option<PendingRename> {
        let mut guard = self.inner.lock().await;
        if guard.0.get(&user_id).is_some_and(|p| p.token == token) {
            guard.0.remove(&user_id)
        } else {
            None
        }
    }

    pub async fn cancel(&self, user_id: i64) -> bool {
        self.inner.lock().await.0.remove(&user_id).is_some()
    }

    #[cfg(test)]
    async fn is_waiting(&self, user_id: i64) -> bool {
        self.inner.lock().await.0.contains_key(&user_id)
    }
}

pub const INVALID_NAME: &str =
    "❌ Invalid file name. Must include extension (e.g., <code>.mkv</code>, <code>.mp4</code>, <code>.zip</code>).";

/// Validate a user supplied file name.
pub fn validate_new_name(text: &str) -> Result<String, &'static str> {
    let name = text.trim();
    if !name.contains('.') || name.starts_with('.') || name.ends_with('.') {
        return Err(INVALID_NAME);
    }
    Ok(sanitize_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renamer::media::MediaKind;

    fn media() -> IncomingMedia {
        IncomingMedia {
            kind: MediaKind::Document,
            file_id: "file".into(),
            unique_id: "unique".into(),
            file_name: "old.mkv".into(),
            file_size: 10,
            duration_secs: None,
            thumbnail_file_id: None,
        }
    }

    #[test]
    fn test_validate_new_name() {
        assert_eq!(validate_new_name("  New Name.mkv \n").unwrap(), "New Name.mkv");
        assert_eq!(validate_new_name("dir/evil.mp4").unwrap(), "dir_evil.mp4");
        assert!(validate_new_name("noextension").is_err());
        assert!(validate_new_name(".mkv").is_err());
        assert!(validate_new_name("name.").is_err());
    }

    #[tokio::test]
    async fn test_take_once() {
        let pending = PendingRenames::new(Duration::from_secs(60));
        pending.insert(1, 10, media()).await;
        assert!(pending.is_waiting(1).await);
        let taken = pending.take(1).await.unwrap();
        assert_eq!(taken.chat_id, 10);
        assert!(pending.take(1).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_prompt_is_not_taken() {
        let pending = PendingRenames::new(Duration::ZERO);
        pending.insert(1, 10, media()).await;
        assert!(pending.take(1).await.is_none());
        assert!(!pending.is_waiting(1).await);
    }

    #[tokio::test]
    async fn test_expire_only_matching_token() {
        let pending = PendingRenames::new(Duration::from_secs(60));
        let first = pending.insert(1, 10, media()).await;
        let second = pending.insert(1, 10, media()).await;
        assert!(pending.expire(1, first).await.is_none());
        assert!(pending.is_waiting(1).await);
        assert!(pending.expire(1, second).await.is_some());
        assert!(!pending.is_waiting(1).await);
    }

    #[tokio::test]
    async fn test_cancel() {
        let pending = PendingRenames::new(Duration::from_secs(60));
        assert!(!pending.cancel(1).await);
        pending.insert(1, 10, media()).await;
        assert!(pending.cancel(1).await);
    }
}
