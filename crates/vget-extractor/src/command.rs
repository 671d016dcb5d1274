//! yt-dlp invocation builder.

use std::path::{Path, PathBuf};

use vget_models::{JobOptions, Quality};

/// Build the format selector for a quality request.
///
/// For an explicit height the selector prefers the best rendition at or
/// below it, then the best single file at or below it, then `worst`, which
/// matches the closest-lower-else-worst fallback chain.
pub fn format_selector(quality: Quality, audio_only: bool) -> String {
    if audio_only {
        return "bestaudio/best".to_string();
    }
    match quality {
        Quality::Best => "bestvideo+bestaudio/best".to_string(),
        Quality::Worst => "worstvideo+worstaudio/worst".to_string(),
        Quality::Height(h) => format!(
            "bestvideo[height<={h}]+bestaudio/best[height<={h}]/worst"
        ),
    }
}

/// Builder for a yt-dlp invocation.
#[derive(Debug, Clone)]
pub struct YtDlpCommand {
    url: String,
    dest_dir: PathBuf,
    options: JobOptions,
    cookie_file: Option<PathBuf>,
}

impl YtDlpCommand {
    pub fn new(url: impl Into<String>, dest_dir: impl AsRef<Path>, options: JobOptions) -> Self {
        Self {
            url: url.into(),
            dest_dir: dest_dir.as_ref().to_path_buf(),
            options,
            cookie_file: None,
        }
    }

    /// Pass a cookie jar to the extractor.
    pub fn with_cookie_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookie_file = path;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Build the argument list.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            // One progress record per line on stdout, metadata JSON after
            // the download completes.
            "--newline".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--print-json".into(),
            "--write-thumbnail".into(),
            "-o".into(),
            self.dest_dir
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
                .into_owned(),
        ];

        args.push("-f".into());
        args.push(format_selector(self.options.quality, self.options.audio_only));

        if self.options.audio_only {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push(self.options.output_format.audio_ext().into());
        } else {
            let container = self.options.output_format.as_str();
            args.push("--merge-output-format".into());
            args.push(container.into());
            args.push("--remux-video".into());
            args.push(container.into());
        }

        if self.options.include_subtitles {
            args.push("--write-subs".into());
            args.push("--convert-subs".into());
            args.push("srt".into());
            if !self.options.subtitle_languages.is_empty() {
                args.push("--sub-langs".into());
                args.push(self.options.subtitle_languages.join(","));
            }
        }

        if let Some(cookie_file) = &self.cookie_file {
            args.push("--cookies".into());
            args.push(cookie_file.to_string_lossy().into_owned());
        }

        args.push(self.url.clone());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vget_models::OutputFormat;

    fn args_of(options: JobOptions) -> Vec<String> {
        YtDlpCommand::new("https://host.example/watch?v=abc", "/tmp/scratch", options)
            .build_args()
    }

    #[test]
    fn selector_encodes_quality_fallback() {
        assert_eq!(
            format_selector(Quality::Height(720), false),
            "bestvideo[height<=720]+bestaudio/best[height<=720]/worst"
        );
        assert_eq!(format_selector(Quality::Best, false), "bestvideo+bestaudio/best");
        assert_eq!(format_selector(Quality::Worst, false), "worstvideo+worstaudio/worst");
        assert_eq!(format_selector(Quality::Height(720), true), "bestaudio/best");
    }

    #[test]
    fn default_invocation_shape() {
        let args = args_of(JobOptions::default());
        assert!(args.contains(&"--newline".to_string()));
        assert!(args.contains(&"--print-json".to_string()));
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(args.contains(&"mp4".to_string()));
        assert!(!args.contains(&"--write-subs".to_string()));
        assert!(!args.contains(&"--cookies".to_string()));
        assert_eq!(args.last().unwrap(), "https://host.example/watch?v=abc");
    }

    #[test]
    fn audio_only_extracts_audio() {
        let args = args_of(JobOptions {
            audio_only: true,
            output_format: OutputFormat::Webm,
            ..Default::default()
        });
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"--audio-format".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn subtitle_languages_are_ordered() {
        let args = args_of(JobOptions {
            include_subtitles: true,
            subtitle_languages: vec!["en".into(), "de".into()],
            ..Default::default()
        });
        assert!(args.contains(&"--write-subs".to_string()));
        assert!(args.contains(&"en,de".to_string()));
    }

    #[test]
    fn empty_subtitle_languages_use_source_default() {
        let args = args_of(JobOptions {
            include_subtitles: true,
            ..Default::default()
        });
        assert!(args.contains(&"--write-subs".to_string()));
        assert!(!args.contains(&"--sub-langs".to_string()));
    }

    #[test]
    fn cookie_file_is_passed_through() {
        let args = YtDlpCommand::new(
            "https://host.example/v",
            "/tmp/scratch",
            JobOptions {
                use_credentials: true,
                ..Default::default()
            },
        )
        .with_cookie_file(Some(PathBuf::from("/tmp/cookies-abc.txt")))
        .build_args();

        let idx = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[idx + 1], "/tmp/cookies-abc.txt");
    }
}
