//! ffmpeg / ffprobe integration.
//!
//! The bot never touches media streams itself: tagging, probing and
//! thumbnail scaling all shell out to the ffmpeg tools.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("failed to run {tool}: {source}")]
    Spawn { tool: String, source: io::Error },
    #[error("FFmpeg error: {0}")]
    Failed(String),
    #[error("failed to copy file: {0}")]
    Copy(io::Error),
}

/// Locations of the ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Container and stream tags written into renamed files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTags {
    pub title: String,
    pub artist: String,
    pub author: String,
    pub video_title: String,
    pub audio_title: String,
    pub subtitle_title: String,
}

impl MetadataTags {
    /// ffmpeg `-metadata` arguments; empty tags are skipped.
    pub fn to_args(&self) -> Vec<String> {
        [
            ("-metadata", "title", &self.title),
            ("-metadata", "artist", &self.artist),
            ("-metadata", "author", &self.author),
            ("-metadata:s:v", "title", &self.video_title),
            ("-metadata:s:a", "title", &self.audio_title),
            ("-metadata:s:s", "title", &self.subtitle_title),
        ]
        .into_iter()
        .filter(|(_, _, value)| !value.is_empty())
        .flat_map(|(flag, key, value)| [flag.to_string(), format!("{key}={value}")])
        .collect()
    }
}

/// Run a tool to completion, capturing stdout.
async fn run(program: &Path, args: &[&OsStr]) -> Result<Vec<u8>, FfmpegError> {
    let tool = program.display().to_string();
    debug!("Running {} {:?}", tool, args);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FfmpegError::NotFound(tool.clone()),
            _ => FfmpegError::Spawn { tool: tool.clone(), source: e },
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(FfmpegError::Failed(stderr));
    }
    Ok(output.stdout)
}

/// Smoke check: `ffmpeg -version`, returning the first line.
pub async fn check_ffmpeg(tools: &Tools) -> Result<String, FfmpegError> {
    let stdout = run(&tools.ffmpeg, &[OsStr::new("-version")]).await?;
    Ok(String::from_utf8_lossy(&stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}

/// Remux `input` into `output` with the given tags, copying every stream.
///
/// Without an ffmpeg binary the file is copied untouched. So is an output
/// without an extension, since ffmpeg picks the container from it.
pub async fn add_metadata(
    tools: &Tools,
    input: &Path,
    output: &Path,
    tags: &MetadataTags,
) -> Result<(), FfmpegError> {
    if output.extension().is_none() {
        info!("No container for {:?}, copying file without metadata", output);
        tokio::fs::copy(input, output).await.map_err(FfmpegError::Copy)?;
        return Ok(());
    }

    let tag_args = tags.to_args();
    let mut args: Vec<&OsStr> = vec![OsStr::new("-y"), OsStr::new("-i"), input.as_os_str()];
    args.extend(tag_args.iter().map(OsStr::new));
    args.extend(
        ["-map", "0", "-c", "copy", "-loglevel", "error"]
            .into_iter()
            .map(OsStr::new),
    );
    args.push(output.as_os_str());

    match run(&tools.ffmpeg, &args).await {
        Ok(_) => {
            info!("Tagged {:?}", output);
            Ok(())
        }
        Err(FfmpegError::NotFound(tool)) => {
            warn!("{} not found, copying file without metadata", tool);
            tokio::fs::copy(input, output).await.map_err(FfmpegError::Copy)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Container duration via ffprobe.
pub async fn probe_duration(tools: &Tools, path: &Path) -> Option<Duration> {
    let args: [&OsStr; 7] = [
        OsStr::new("-v"),
        OsStr::new("error"),
        OsStr::new("-show_entries"),
        OsStr::new("format=duration"),
        OsStr::new("-of"),
        OsStr::new("default=noprint_wrappers=1:nokey=1"),
        path.as_os_str(),
    ];
    match run(&tools.ffprobe, &args).await {
        Ok(stdout) => parse_probe_duration(&String::from_utf8_lossy(&stdout)),
        Err(e) => {
            warn!("Error getting duration: {}", e);
            None
        }
    }
}

fn parse_probe_duration(stdout: &str) -> Option<Duration> {
    let secs: f64 = stdout.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Scale an image to a 320x320 JPEG thumbnail.
pub async fn resize_thumbnail(tools: &Tools, input: &Path, output: &Path) -> Result<(), FfmpegError> {
    let args: [&OsStr; 10] = [
        OsStr::new("-y"),
        OsStr::new("-i"),
        input.as_os_str(),
        OsStr::new("-vf"),
        OsStr::new("scale=320:320"),
        OsStr::new("-frames:v"),
        OsStr::new("1"),
        OsStr::new("-loglevel"),
        OsStr::new("error"),
        output.as_os_str(),
    ];
    run(&tools.ffmpeg, &args).await.map(|_| ())
}
