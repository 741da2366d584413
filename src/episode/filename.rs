// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use sanitize_filename::{Options, sanitize_with_options};

use crate::feed::Episode;

/// Maximum length (in characters) for the title portion of a filename
const MAX_TITLE_LENGTH: usize = 100;

/// Sub directory of a channel directory holding rendered shownotes
pub const SHOWNOTES_DIR: &str = "shownotes";

/// Generate a filename stem (without extension) for an episode
///
/// Format: "YYYY-MM-DD - Title" or "undated - Title"
pub fn generate_filename_stem(episode: &Episode) -> String {
    let date_prefix = episode
        .pub_date
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string());

    let title = sanitize_title(&episode.title);
    let title = if title.is_empty() {
        "untitled".to_string()
    } else {
        title
    };

    format!("{} - {}", date_prefix, title)
}

/// Get the audio file extension from an episode's enclosure
///
/// Attempts to extract from URL path or MIME type, defaults to "mp3"
pub fn get_audio_extension(episode: &Episode) -> String {
    if let Some(ext) = episode
        .enclosure
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| filename.rsplit_once('.').map(|(_, ext)| ext))
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    if let Some(ref mime) = episode.enclosure.mime_type
        && let Some(ext) = mime_to_extension(mime)
    {
        return ext.to_string();
    }

    "mp3".to_string()
}

/// Generate the enclosure filename for an episode (with extension)
pub fn generate_filename(episode: &Episode) -> String {
    format!(
        "{}.{}",
        generate_filename_stem(episode),
        get_audio_extension(episode)
    )
}

/// Generate the shownotes filename for an episode
pub fn shownotes_filename(episode: &Episode) -> String {
    format!("{}.html", generate_filename_stem(episode))
}

/// Directory name for a channel, derived from its title
pub fn channel_directory_name(title: &str) -> String {
    let name = sanitize_title(title);
    if name.is_empty() {
        "Untitled Channel".to_string()
    } else {
        name
    }
}

/// Make a title safe to use as (part of) a file name
fn sanitize_title(title: &str) -> String {
    let options = Options {
        windows: true,
        truncate: false,
        replacement: " ",
    };
    let sanitized = sanitize_with_options(title, options);

    let collapsed = collapse_whitespace(&sanitized);
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());

    truncate_at_boundary(trimmed, MAX_TITLE_LENGTH)
}

/// Collapse runs of whitespace into a single space
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }

    let truncated: String = s.chars().take(max_len).collect();
    if let Some(pos) = truncated.rfind(' ')
        && pos > truncated.len() / 2
    {
        return truncated[..pos].to_string();
    }

    truncated.trim_end().to_string()
}

/// Check if a string is a valid audio file extension
fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}

/// Map MIME types to file extensions
fn mime_to_extension(mime: &str) -> Option<&'static str> {
    match mime.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}
