//! Per-job download options.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Video heights accepted by the quality selector.
pub const SUPPORTED_HEIGHTS: [u32; 8] = [144, 240, 360, 480, 720, 1080, 1440, 2160];

/// Requested video quality.
///
/// The selector prefers the highest available rendition at or below the
/// requested height, then the closest lower one, then `worst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quality {
    #[default]
    Best,
    Worst,
    /// Preferred height in pixels; must be one of [`SUPPORTED_HEIGHTS`].
    Height(u32),
}

impl Quality {
    /// Parse a quality string (`best`, `worst`, or a supported height).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "best" => Some(Quality::Best),
            "worst" => Some(Quality::Worst),
            _ => {
                let height: u32 = s.parse().ok()?;
                SUPPORTED_HEIGHTS
                    .contains(&height)
                    .then_some(Quality::Height(height))
            }
        }
    }

    /// Requested height, if any.
    pub fn height(&self) -> Option<u32> {
        match self {
            Quality::Height(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Quality::Best => "best".to_string(),
            Quality::Worst => "worst".to_string(),
            Quality::Height(h) => h.to_string(),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl Serialize for Quality {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Quality::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "quality must be 'best', 'worst' or one of {:?}, got '{}'",
                SUPPORTED_HEIGHTS, s
            ))
        })
    }
}

impl JsonSchema for Quality {
    fn schema_name() -> String {
        "Quality".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

/// Output container for the downloaded media.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mkv => "mkv",
        }
    }

    /// Audio container used when `audio_only` is set.
    pub fn audio_ext(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mkv => "m4a",
            OutputFormat::Webm => "mp3",
        }
    }

    /// MIME type for the video container.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mkv => "video/x-matroska",
        }
    }

    /// MIME type for the audio-only container.
    pub fn audio_content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mkv => "audio/mp4",
            OutputFormat::Webm => "audio/mpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options attached to a download job at submission.
///
/// Unrecognized fields are rejected rather than ignored, so a misspelled
/// option fails the submit instead of silently doing nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobOptions {
    /// Preferred video quality
    #[serde(default)]
    pub quality: Quality,

    /// Output container
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Extract audio only (container becomes m4a/mp3)
    #[serde(default)]
    pub audio_only: bool,

    /// Download subtitle tracks
    #[serde(default)]
    pub include_subtitles: bool,

    /// Ordered BCP-47 language tags; empty means source default
    #[serde(default)]
    pub subtitle_languages: Vec<String>,

    /// Materialize a cookie file for the extractor
    #[serde(default)]
    pub use_credentials: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            quality: Quality::Best,
            output_format: OutputFormat::Mp4,
            audio_only: false,
            include_subtitles: false,
            subtitle_languages: Vec::new(),
            use_credentials: false,
        }
    }
}

impl JobOptions {
    /// File extension of the primary artifact.
    pub fn output_ext(&self) -> &'static str {
        if self.audio_only {
            self.output_format.audio_ext()
        } else {
            self.output_format.as_str()
        }
    }

    /// MIME type of the primary artifact.
    pub fn output_content_type(&self) -> &'static str {
        if self.audio_only {
            self.output_format.audio_content_type()
        } else {
            self.output_format.content_type()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_parse_accepts_supported_heights() {
        assert_eq!(Quality::parse("best"), Some(Quality::Best));
        assert_eq!(Quality::parse("worst"), Some(Quality::Worst));
        assert_eq!(Quality::parse("720"), Some(Quality::Height(720)));
        assert_eq!(Quality::parse("2160"), Some(Quality::Height(2160)));
        assert_eq!(Quality::parse("719"), None);
        assert_eq!(Quality::parse(""), None);
    }

    #[test]
    fn quality_serde_roundtrip() {
        let json = serde_json::to_string(&Quality::Height(1080)).unwrap();
        assert_eq!(json, "\"1080\"");
        let q: Quality = serde_json::from_str("\"worst\"").unwrap();
        assert_eq!(q, Quality::Worst);
        assert!(serde_json::from_str::<Quality>("\"999\"").is_err());
    }

    #[test]
    fn audio_only_changes_container() {
        let opts = JobOptions {
            audio_only: true,
            output_format: OutputFormat::Webm,
            ..Default::default()
        };
        assert_eq!(opts.output_ext(), "mp3");

        let opts = JobOptions {
            audio_only: true,
            output_format: OutputFormat::Mp4,
            ..Default::default()
        };
        assert_eq!(opts.output_ext(), "m4a");

        let opts = JobOptions::default();
        assert_eq!(opts.output_ext(), "mp4");
    }
}
