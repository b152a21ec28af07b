//! Utility functions for file lookup, naming and progress display

use crate::error::Result;
use std::path::Path;

/// Extensions treated as the payload of a finished job
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "avi", "wmv"];

/// Width of a full progress bar in marker characters
pub const PROGRESS_BAR_WIDTH: usize = 40;

/// Read a whole file
pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tracing::debug!(path = %path.display(), "reading file");
    Ok(tokio::fs::read(path).await?)
}

/// Check if a file name indicates a sample clip
///
/// # Examples
///
/// ```
/// use usenet_ctl::utils::is_sample;
/// use std::path::Path;
///
/// assert!(is_sample(Path::new("/downloads/Show/show-SAMPLE.mkv")));
/// assert!(!is_sample(Path::new("/downloads/Show/show.mkv")));
/// ```
#[must_use]
pub fn is_sample(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.to_lowercase().contains("sample"))
}

/// Check if a path has one of [`VIDEO_EXTENSIONS`] (case-insensitive) and is not a sample
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    let has_video_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)));
    has_video_ext && !is_sample(path)
}

/// Render a fraction in `[0, 1]` as `[====    ]`
///
/// Values outside the range are clamped; NaN renders as empty.
pub fn render_progress_bar(fraction: f64) -> String {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    let filled = ((PROGRESS_BAR_WIDTH as f64) * fraction) as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "=".repeat(filled),
        " ".repeat(PROGRESS_BAR_WIDTH - filled),
        fraction * 100.0
    )
}

/// Make a search query usable as a file name
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "download".to_string()
    } else {
        cleaned
    }
}
