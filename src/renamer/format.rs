//! Text formatting for captions and status messages.

use std::time::Duration;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human readable size with binary units, e.g. `1.50 MB`.
pub fn human_bytes(size: u64) -> String {
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", size, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// `H:MM:SS`, hours unbounded.
pub fn format_hms(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Duration shown in captions when it could not be determined.
pub const UNKNOWN_DURATION: &str = "00:00:00";

/// Fill `{filename}`, `{filesize}` and `{duration}` in a caption template.
pub fn format_caption(template: &str, file_name: &str, file_size: u64, duration: &str) -> String {
    template
        .replace("{filename}", file_name)
        .replace("{filesize}", &human_bytes(file_size))
        .replace("{duration}", duration)
}

const BAR_CELLS: usize = 10;

/// Progress block for a transfer status message.
pub fn progress_text(label: &str, done: u64, total: u64, elapsed: Duration) -> String {
    let fraction = if total == 0 { 0.0 } else { (done as f64 / total as f64).min(1.0) };
    let filled = (fraction * BAR_CELLS as f64).floor() as usize;
    let bar: String = "■".repeat(filled) + &"□".repeat(BAR_CELLS - filled);

    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { (done as f64 / secs) as u64 } else { 0 };
    let eta = if speed > 0 { total.saturating_sub(done) / speed } else { 0 };

    format!(
        "{label}\n\n[{bar}] {:.2}%\n{} of {}\nSpeed: {}/s\nETA: {}",
        fraction * 100.0,
        human_bytes(done),
        human_bytes(total),
        human_bytes(speed),
        format_hms(eta),
    )
}
