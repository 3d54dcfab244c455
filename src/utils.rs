//! Naming and formatting helpers shared by the packer, the blob store and the API

/// Extension used for archive entries whose filename has none
pub const DEFAULT_ENTRY_EXTENSION: &str = "mp4";

/// Longest naming hint embedded in a blob id
const MAX_HINT_LEN: usize = 48;

/// Format a byte count for display
///
/// Below 1 KiB the exact count is shown; KB and MB use one decimal, GB two.
///
/// # Examples
///
/// ```
/// use bulkzip::utils::format_size;
///
/// assert_eq!(format_size(512), "512 B");
/// assert_eq!(format_size(1536), "1.5 KB");
/// assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
/// ```
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

/// Build the name of an archive entry from the item's 1-based position and filename
///
/// The result is `NN_<base>.<ext>`: the position zero-padded to two digits,
/// the filename without its extension, and the extension (`mp4` when missing).
/// Path separators are replaced so the entry always sits at the archive root,
/// and the position prefix keeps names unique even when filenames collide.
pub fn entry_name(position: usize, filename: &str) -> String {
    let flat: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();

    let (base, ext) = match flat.rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() => (base, ext),
        _ => (flat.as_str(), DEFAULT_ENTRY_EXTENSION),
    };

    format!("{:02}_{}.{}", position, base, ext)
}

/// Reduce a naming hint to characters allowed in a blob id
///
/// Anything outside `[A-Za-z0-9_]` becomes `_`; the result is capped in length
/// and never empty.
pub fn sanitize_hint(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .take(MAX_HINT_LEN)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if cleaned.is_empty() {
        "blob".to_string()
    } else {
        cleaned
    }
}

/// Derive a filename for a registered link
///
/// Takes the last path segment with any query string or fragment removed,
/// falling back to `video_<position>.mp4` when the URL ends in a slash.
pub fn filename_from_url(url: &str, position: usize) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    match without_query.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => format!("video_{}.{}", position, DEFAULT_ENTRY_EXTENSION),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_thresholds() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024 - 1), "1024.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(2_684_354_560), "2.50 GB");
    }

    #[test]
    fn entry_name_pads_position_and_keeps_extension() {
        assert_eq!(entry_name(1, "clip.mp4"), "01_clip.mp4");
        assert_eq!(entry_name(12, "holiday.final.mov"), "12_holiday.final.mov");
        assert_eq!(entry_name(100, "a.webm"), "100_a.webm");
    }

    #[test]
    fn entry_name_defaults_extension_to_mp4() {
        assert_eq!(entry_name(3, "stream"), "03_stream.mp4");
        assert_eq!(entry_name(4, "trailing."), "04_trailing..mp4");
    }

    #[test]
    fn entry_name_flattens_path_separators() {
        assert_eq!(entry_name(2, "videos/2024/clip.mp4"), "02_videos_2024_clip.mp4");
        assert_eq!(entry_name(5, "dir\\file.mp4"), "05_dir_file.mp4");
        let escaped = entry_name(9, "../../etc/passwd");
        assert!(!escaped.contains('/'), "{escaped}");
    }

    #[test]
    fn colliding_filenames_get_distinct_entries() {
        assert_ne!(entry_name(1, "same.mp4"), entry_name(2, "same.mp4"));
    }

    #[test]
    fn sanitize_hint_keeps_word_characters() {
        assert_eq!(sanitize_hint("Ab3_x"), "Ab3_x");
        assert_eq!(sanitize_hint("a-b c/d"), "a_b_c_d");
        assert_eq!(sanitize_hint(""), "blob");
        assert_eq!(sanitize_hint(&"x".repeat(200)).len(), MAX_HINT_LEN);
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/media/clip.mp4?token=abc", 1),
            "clip.mp4"
        );
        assert_eq!(
            filename_from_url("https://cdn.example.com/a/b#frag", 2),
            "b"
        );
    }

    #[test]
    fn filename_from_url_falls_back_to_position() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/media/", 7),
            "video_7.mp4"
        );
        assert_eq!(filename_from_url("https://", 1), "video_1.mp4");
    }
}
