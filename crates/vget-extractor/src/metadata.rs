//! Metadata extraction from yt-dlp's JSON output.

use serde::Deserialize;

use vget_models::JobMetadata;

/// The subset of yt-dlp's info JSON the service keeps.
#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    upload_date: Option<String>,
    view_count: Option<u64>,
    like_count: Option<u64>,
}

/// Parse a stdout line as an info-JSON record, if it is one.
///
/// yt-dlp prints exactly one JSON object per downloaded video with
/// `--print-json`; any other line returns `None`.
pub fn parse_metadata_line(line: &str) -> Option<JobMetadata> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let info: InfoJson = serde_json::from_str(trimmed).ok()?;
    Some(JobMetadata {
        title: info.title,
        duration_seconds: info.duration,
        uploader: info.uploader,
        upload_date: info.upload_date,
        view_count: info.view_count,
        like_count: info.like_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_json() {
        let line = r#"{"id":"abc","title":"A Video","duration":212.5,"uploader":"someone","upload_date":"20240110","view_count":1000,"like_count":50,"formats":[]}"#;
        let meta = parse_metadata_line(line).unwrap();
        assert_eq!(meta.title.as_deref(), Some("A Video"));
        assert_eq!(meta.duration_seconds, Some(212.5));
        assert_eq!(meta.uploader.as_deref(), Some("someone"));
        assert_eq!(meta.upload_date.as_deref(), Some("20240110"));
        assert_eq!(meta.view_count, Some(1000));
        assert_eq!(meta.like_count, Some(50));
    }

    #[test]
    fn partial_records_still_parse() {
        let meta = parse_metadata_line(r#"{"title":"Only Title"}"#).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Only Title"));
        assert!(meta.duration_seconds.is_none());
    }

    #[test]
    fn non_json_lines_are_skipped() {
        assert!(parse_metadata_line("[download]  42.3% of 10MiB").is_none());
        assert!(parse_metadata_line("").is_none());
        assert!(parse_metadata_line("{not json").is_none());
    }
}
