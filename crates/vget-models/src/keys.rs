//! Storage key layout and filename sanitization.
//!
//! All artifacts for a job live under `jobs/<job_id>/`:
//!
//! ```text
//! jobs/<job_id>/<title>.<ext>
//! jobs/<job_id>/subtitles/<title>.<lang>.srt
//! jobs/<job_id>/thumbnail.<ext>
//! ```

use crate::job::JobId;

/// Maximum length of a sanitized title, in bytes.
const MAX_TITLE_BYTES: usize = 120;

/// Sanitize a media title for use as a filename.
///
/// Strips control characters and path separators, truncates to 120 bytes on
/// a character boundary, and falls back to `video` when nothing survives.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_TITLE_BYTES));

    for c in title.chars() {
        if c.is_control() || c == '/' || c == '\\' {
            continue;
        }
        if out.len() + c.len_utf8() > MAX_TITLE_BYTES {
            break;
        }
        out.push(c);
    }

    let trimmed = out.trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Key for the primary media artifact.
pub fn video_key(job_id: &JobId, title: &str, ext: &str) -> String {
    format!("jobs/{}/{}.{}", job_id, sanitize_title(title), ext)
}

/// Key for a subtitle track.
pub fn subtitle_key(job_id: &JobId, title: &str, lang: &str) -> String {
    format!("jobs/{}/subtitles/{}.{}.srt", job_id, sanitize_title(title), lang)
}

/// Key for the thumbnail image.
pub fn thumbnail_key(job_id: &JobId, ext: &str) -> String {
    format!("jobs/{}/thumbnail.{}", job_id, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators_and_controls() {
        assert_eq!(sanitize_title("a/b\\c"), "abc");
        assert_eq!(sanitize_title("tab\there"), "tabhere");
        assert_eq!(sanitize_title("new\nline"), "newline");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_title(""), "video");
        assert_eq!(sanitize_title("///"), "video");
        assert_eq!(sanitize_title("  \t "), "video");
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(100); // 200 bytes
        let out = sanitize_title(&long);
        assert!(out.len() <= 120);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn key_layout() {
        let id = JobId::from("j-1");
        assert_eq!(video_key(&id, "My Video", "mp4"), "jobs/j-1/My Video.mp4");
        assert_eq!(
            subtitle_key(&id, "My Video", "en"),
            "jobs/j-1/subtitles/My Video.en.srt"
        );
        assert_eq!(thumbnail_key(&id, "webp"), "jobs/j-1/thumbnail.webp");
    }
}
