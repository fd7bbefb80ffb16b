//! Output path construction for recording files.
//!
//! Folder and file layouts are described by templates with `{token}`
//! placeholders. Rendered components are sanitized for cross-platform
//! use, preserving Unicode text such as Chinese, Japanese, and Korean
//! stream titles.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, Timelike};

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Values available to naming templates for a single recording.
#[derive(Debug, Clone)]
pub struct NamingContext {
    pub room_id: u64,
    pub room_name: String,
    pub title: String,
    pub started_at: DateTime<Local>,
}

impl NamingContext {
    pub fn new(room_id: u64, room_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            room_id,
            room_name: room_name.into(),
            title: title.into(),
            started_at: Local::now(),
        }
    }

    /// Render a template, replacing every known `{token}`.
    ///
    /// Supported tokens: `{roomid}`, `{name}`, `{title}`, `{date}`
    /// (YYYYMMDD), `{time}` (HHmmss), and the individual fields `{yyyy}`,
    /// `{MM}`, `{dd}`, `{HH}`, `{mm}`, `{ss}`, `{fff}`. Unknown tokens are
    /// left as-is.
    pub fn render(&self, template: &str) -> String {
        let t = &self.started_at;
        template
            .replace("{roomid}", &self.room_id.to_string())
            .replace("{name}", &self.room_name)
            .replace("{title}", &self.title)
            .replace("{date}", &t.format("%Y%m%d").to_string())
            .replace("{time}", &t.format("%H%M%S").to_string())
            .replace("{yyyy}", &format!("{:04}", t.year()))
            .replace("{MM}", &format!("{:02}", t.month()))
            .replace("{dd}", &format!("{:02}", t.day()))
            .replace("{HH}", &format!("{:02}", t.hour()))
            .replace("{mm}", &format!("{:02}", t.minute()))
            .replace("{ss}", &format!("{:02}", t.second()))
            .replace("{fff}", &format!("{:03}", t.timestamp_subsec_millis()))
    }

    /// Build the directory for this recording under `root`.
    ///
    /// The folder template may contain `/` separators; each rendered
    /// component is sanitized independently.
    pub fn directory(&self, root: &Path, folder_template: &str) -> PathBuf {
        let mut dir = root.to_path_buf();
        for component in self.render(folder_template).split('/') {
            if component.is_empty() {
                continue;
            }
            dir.push(sanitize_filename(component));
        }
        dir
    }

    /// Build the full path of one segment file.
    ///
    /// The first segment uses the file template as-is; later segments get
    /// a `_pNNN` suffix so rotated files sort in stream order.
    pub fn segment_path(
        &self,
        root: &Path,
        folder_template: &str,
        file_template: &str,
        extension: &str,
        segment_index: u32,
    ) -> PathBuf {
        let mut stem = sanitize_filename(&self.render(file_template));
        if segment_index > 0 {
            stem.push_str(&format!("_p{segment_index:03}"));
        }
        self.directory(root, folder_template)
            .join(format!("{stem}.{extension}"))
    }
}

/// Sanitize a string for use as a single filename component.
///
/// Removes control characters, replaces Windows-invalid characters with
/// underscores, collapses separator runs (an empty template substitution
/// leaves the surrounding literal separators adjacent), trims leading
/// spaces and dots and trailing separators, prefixes Windows reserved
/// names, and falls back to "unnamed" for an empty result.
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "unnamed".to_string();
    }

    let mut replaced = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            replaced.push('_');
        } else {
            replaced.push(c);
        }
    }

    // Collapse repeats of the same separator character.
    let mut result = String::with_capacity(replaced.len());
    let mut last = None;
    for c in replaced.chars() {
        if matches!(c, '_' | '-' | ' ') && last == Some(c) {
            continue;
        }
        result.push(c);
        last = Some(c);
    }

    let trimmed = result
        .trim_start_matches(|c| c == ' ' || c == '.')
        .trim_end_matches(|c| matches!(c, ' ' | '.' | '_' | '-'));
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}
