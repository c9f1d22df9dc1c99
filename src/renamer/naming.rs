//! File name parsing and format templates.
//!
//! Season, episode and quality are pulled out of the incoming file name and
//! substituted into the user's format template.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::renamer::media::MediaKind;

/// Which capture groups a season/episode pattern provides.
#[derive(Clone, Copy)]
enum Groups {
    SeasonEpisode,
    EpisodeOnly,
}

static SEASON_EPISODE_PATTERNS: LazyLock<Vec<(Regex, Groups)>> = LazyLock::new(|| {
    [
        // S01E02, S01EP02
        (r"S(\d+)(?:E|EP)(\d+)", Groups::SeasonEpisode),
        // S01 E02, S01-EP02
        (r"S(\d+)[\s-]*(?:E|EP)(\d+)", Groups::SeasonEpisode),
        (r"(?i)Season\s*(\d+)\s*Episode\s*(\d+)", Groups::SeasonEpisode),
        (r"\[S(\d+)\]\[E(\d+)\]", Groups::SeasonEpisode),
        // S01 13
        (r"S(\d+)[^\d]*(\d+)", Groups::SeasonEpisode),
        (r"(?i)(?:E|EP|Episode)\s*(\d+)", Groups::EpisodeOnly),
        (r"\b(\d+)\b", Groups::EpisodeOnly),
    ]
    .into_iter()
    .map(|(p, g)| (Regex::new(p).expect("season/episode pattern"), g))
    .collect()
});

/// How a matched quality pattern is turned into the reported label.
#[derive(Clone, Copy)]
enum QualityLabel {
    Captured,
    Fixed(&'static str),
}

static QUALITY_PATTERNS: LazyLock<Vec<(Regex, QualityLabel)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(\d{3,4}[pi])\b", QualityLabel::Captured),
        (r"(?i)\b(4k|2160p)\b", QualityLabel::Fixed("4k")),
        (r"(?i)\b(2k|1440p)\b", QualityLabel::Fixed("2k")),
        (r"(?i)\b(HDRip|HDTV)\b", QualityLabel::Captured),
        (r"(?i)\b(4kX264|4kx265)\b", QualityLabel::Captured),
        (r"(?i)\[(\d{3,4}[pi])\]", QualityLabel::Captured),
    ]
    .into_iter()
    .map(|(p, l)| (Regex::new(p).expect("quality pattern"), l))
    .collect()
});

/// Placeholder used when a season or episode could not be parsed.
pub const MISSING: &str = "XX";

/// Quality reported when nothing matched.
pub const UNKNOWN_QUALITY: &str = "Unknown";

/// Extract season and episode numbers, keeping the digits as written.
pub fn extract_season_episode(file_name: &str) -> (Option<String>, Option<String>) {
    for (pattern, groups) in SEASON_EPISODE_PATTERNS.iter() {
        let Some(caps) = pattern.captures(file_name) else {
            continue;
        };
        let (season, episode) = match groups {
            Groups::SeasonEpisode => (
                caps.get(1).map(|m| m.as_str().to_string()),
                caps.get(2).map(|m| m.as_str().to_string()),
            ),
            Groups::EpisodeOnly => (None, caps.get(1).map(|m| m.as_str().to_string())),
        };
        info!("Extracted season: {:?}, episode: {:?} from {}", season, episode, file_name);
        return (season, episode);
    }
    warn!("No season/episode pattern matched for {}", file_name);
    (None, None)
}

/// Extract a quality label such as `1080p` or `4k`.
pub fn extract_quality(file_name: &str) -> String {
    for (pattern, label) in QUALITY_PATTERNS.iter() {
        let Some(caps) = pattern.captures(file_name) else {
            continue;
        };
        let quality = match label {
            QualityLabel::Captured => caps[1].to_string(),
            QualityLabel::Fixed(s) => s.to_string(),
        };
        info!("Extracted quality: {} from {}", quality, file_name);
        return quality;
    }
    warn!("No quality pattern matched for {}", file_name);
    UNKNOWN_QUALITY.to_string()
}

/// Fill a format template.
///
/// Braced placeholders are replaced first, then the bare `Season`, `Episode`
/// and `QUALITY` words.
pub fn render_template(
    template: &str,
    season: Option<&str>,
    episode: Option<&str>,
    quality: &str,
) -> String {
    let season = season.unwrap_or(MISSING);
    let episode = episode.unwrap_or(MISSING);

    [
        ("{season}", season),
        ("{episode}", episode),
        ("{quality}", quality),
        ("Season", season),
        ("Episode", episode),
        ("QUALITY", quality),
    ]
    .into_iter()
    .fold(template.to_string(), |acc, (placeholder, value)| {
        acc.replace(placeholder, value)
    })
}

/// Extension (with the leading dot) for the renamed file.
pub fn file_extension(file_name: &str, kind: MediaKind) -> String {
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{ext}"),
        _ => kind.default_extension().to_string(),
    }
}

/// Replace anything that would break out of a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "file".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Compute the renamed file name for an incoming file.
pub fn output_file_name(template: &str, original: &str, kind: MediaKind) -> String {
    let (season, episode) = extract_season_episode(original);
    let quality = extract_quality(original);
    let stem = render_template(template, season.as_deref(), episode.as_deref(), &quality);
    sanitize_file_name(&format!("{}{}", stem, file_extension(original, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn se(name: &str) -> (Option<String>, Option<String>) {
        extract_season_episode(name)
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_standard_season_episode() {
        assert_eq!(se("Show.S01E02.720p.mkv"), (some("01"), some("02")));
        assert_eq!(se("Show S02EP11 [1080p].mkv"), (some("02"), some("11")));
    }

    #[test]
    fn test_spaced_season_episode() {
        assert_eq!(se("Show S01 E05.mkv"), (some("01"), some("05")));
        assert_eq!(se("Show S3-EP7.mkv"), (some("3"), some("7")));
    }

    #[test]
    fn test_full_words() {
        assert_eq!(se("show season 2 episode 9.mp4"), (some("2"), some("9")));
    }

    #[test]
    fn test_loose_season_then_number() {
        assert_eq!(se("Show S01 - 13.mkv"), (some("01"), some("13")));
    }

    #[test]
    fn test_episode_only() {
        assert_eq!(se("Show Episode 14.mkv"), (None, some("14")));
        assert_eq!(se("Show ep 3.mkv"), (None, some("3")));
    }

    #[test]
    fn test_standalone_number() {
        assert_eq!(se("Movie 2019 remaster.mkv"), (None, some("2019")));
    }

    #[test]
    fn test_no_numbers() {
        assert_eq!(se("readme.txt"), (None, None));
    }

    #[test]
    fn test_quality_resolution() {
        assert_eq!(extract_quality("Show S01E01 720p.mkv"), "720p");
        assert_eq!(extract_quality("Show 1080i.ts"), "1080i");
    }

    #[test]
    fn test_quality_resolution_wins_over_alias() {
        // 2160p is caught by the generic resolution rule before the 4k alias
        assert_eq!(extract_quality("Show 2160p.mkv"), "2160p");
    }

    #[test]
    fn test_quality_aliases() {
        assert_eq!(extract_quality("Show 4K.mkv"), "4k");
        assert_eq!(extract_quality("Show 2k remux.mkv"), "2k");
        assert_eq!(extract_quality("Show HDTV.mkv"), "HDTV");
        assert_eq!(extract_quality("Show.hdrip.mkv"), "hdrip");
    }

    #[test]
    fn test_quality_unknown() {
        assert_eq!(extract_quality("Show S01E01.mkv"), UNKNOWN_QUALITY);
    }

    #[test]
    fn test_render_braced_placeholders() {
        let out = render_template("My Show S{season}E{episode} [{quality}]", Some("01"), Some("04"), "720p");
        assert_eq!(out, "My Show S01E04 [720p]");
    }

    #[test]
    fn test_render_bare_words() {
        let out = render_template("Show SSeasonEEpisode QUALITY", Some("2"), Some("10"), "1080p");
        assert_eq!(out, "Show S2E10 1080p");
    }

    #[test]
    fn test_render_missing_values() {
        let out = render_template("S{season}E{episode}", None, None, "Unknown");
        assert_eq!(out, "SXXEXX");
    }

    #[test]
    fn test_extension_kept() {
        assert_eq!(file_extension("a.b.mkv", MediaKind::Document), ".mkv");
    }

    #[test]
    fn test_extension_defaults() {
        assert_eq!(file_extension("video", MediaKind::Video), ".mp4");
        assert_eq!(file_extension("audio", MediaKind::Audio), ".mp3");
        assert_eq!(file_extension("notes", MediaKind::Document), "");
        assert_eq!(file_extension(".hidden", MediaKind::Document), "");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_file_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_file_name("a\\b\nc"), "a_b_c");
        assert_eq!(sanitize_file_name(".."), "file");
    }

    #[test]
    fn test_output_file_name() {
        let name = output_file_name(
            "[AR] Show S{season}E{episode} {quality}",
            "Show.S01E07.1080p.WEB.mkv",
            MediaKind::Video,
        );
        assert_eq!(name, "[AR] Show S01E07 1080p.mkv");
    }
}
