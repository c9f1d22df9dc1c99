//! Sequence mode: collect files and send them back in episode order.

use std::sync::LazyLock;

use regex::Regex;

/// A file recorded while a sequence is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedFile {
    pub chat_id: i64,
    pub message_id: i32,
    pub file_name: String,
}

static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "Ep - 06"
        r"(?i)\b(?:EP|E)\s*-\s*(\d{1,3})\b",
        // "EP06", "E 06"
        r"(?i)\b(?:EP|E)\s*(\d{1,3})\b",
        // "S1E06", "S01EP06"
        r"(?i)S(\d+)(?:E|EP)(\d+)",
        // "S 1 Ep 06"
        r"(?i)S(\d+)\s*(?:E|EP|-\s*EP)\s*(\d+)",
        // "E(06)"
        r"(?i)[(\[<{]?\s*(?:E|EP)\s*(\d+)\s*[)\]>}]?",
        // "E - 06", "- 06"
        r"(?i)(?:EP|E)?\s*-?\s*(\d{1,3})",
        // "S1 - 06"
        r"(?i)S(\d+)[^\d]*(\d+)",
        r"(\d+)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("episode pattern"))
    .collect()
});

/// Episode number used for ordering; the last capture group of the first
/// matching pattern. A number too large for `u64` gives `None`; later
/// patterns are not tried.
pub fn extract_episode_number(file_name: &str) -> Option<u64> {
    let caps = EPISODE_PATTERNS.iter().find_map(|pattern| pattern.captures(file_name))?;
    caps.iter().skip(1).flatten().last()?.as_str().parse().ok()
}

/// Stable sort by episode number; files without one keep their arrival order
/// at the end.
pub fn sort_by_episode(files: &mut [SequencedFile]) {
    files.sort_by_key(|f| extract_episode_number(&f.file_name).unwrap_or(u64::MAX));
}

/// One line of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub name: String,
    pub files_sequenced: i64,
}

/// Leaderboard text (HTML).
pub fn format_leaderboard(entries: &[LeaderboardEntry]) -> String {
    if entries.is_empty() {
        return "No data available!".to_string();
    }
    let mut text = String::from("<b>🏆 Top Users 🏆</b>\n\n");
    for (i, entry) in entries.iter().enumerate() {
        text.push_str(&format!(
            "<b>{}. {}</b> - {} files\n",
            i + 1,
            teloxide::utils::html::escape(&entry.name),
            entry.files_sequenced
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: i32, name: &str) -> SequencedFile {
        SequencedFile {
            chat_id: 1,
            message_id: id,
            file_name: name.to_string(),
        }
    }

    #[test]
    fn test_episode_dash_format() {
        assert_eq!(extract_episode_number("Show Ep - 06 [720p].mkv"), Some(6));
    }

    #[test]
    fn test_episode_compact() {
        assert_eq!(extract_episode_number("Show EP06.mkv"), Some(6));
        assert_eq!(extract_episode_number("Show E 12.mkv"), Some(12));
    }

    #[test]
    fn test_season_episode() {
        assert_eq!(extract_episode_number("Show.S01E06.mkv"), Some(6));
        assert_eq!(extract_episode_number("Show S2EP11.mkv"), Some(11));
    }

    #[test]
    fn test_plain_number() {
        assert_eq!(extract_episode_number("Show - 24.mkv"), Some(24));
    }

    #[test]
    fn test_no_number() {
        assert_eq!(extract_episode_number("Show.mkv"), None);
    }

    #[test]
    fn test_overflowing_episode_is_unnumbered() {
        assert_eq!(extract_episode_number("Show S1E99999999999999999999999.mkv"), None);

        let mut files = vec![file(1, "Show S1E99999999999999999999999.mkv"), file(2, "Show S1E02.mkv")];
        sort_by_episode(&mut files);
        let ids: Vec<i32> = files.iter().map(|f| f.message_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_sort_orders_by_episode() {
        let mut files = vec![
            file(1, "Show E03.mkv"),
            file(2, "Show E01.mkv"),
            file(3, "Show E02.mkv"),
        ];
        sort_by_episode(&mut files);
        let ids: Vec<i32> = files.iter().map(|f| f.message_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_sort_unnumbered_last_and_stable() {
        let mut files = vec![
            file(1, "extras.mkv"),
            file(2, "Show E02.mkv"),
            file(3, "bonus.mkv"),
            file(4, "Show E01.mkv"),
        ];
        sort_by_episode(&mut files);
        let ids: Vec<i32> = files.iter().map(|f| f.message_id).collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_leaderboard_empty() {
        assert_eq!(format_leaderboard(&[]), "No data available!");
    }

    #[test]
    fn test_leaderboard_lines() {
        let text = format_leaderboard(&[
            LeaderboardEntry { name: "alice".into(), files_sequenced: 40 },
            LeaderboardEntry { name: "<bob>".into(), files_sequenced: 7 },
        ]);
        assert!(text.contains("<b>1. alice</b> - 40 files"));
        assert!(text.contains("<b>2. &lt;bob&gt;</b> - 7 files"));
    }
}
