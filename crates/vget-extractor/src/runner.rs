//! The extraction contract and the yt-dlp runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use vget_models::{JobMetadata, JobOptions};

use crate::command::YtDlpCommand;
use crate::error::{classify_failure, ExtractorError, ExtractorResult};
use crate::metadata::parse_metadata_line;

/// A raw progress reading from the extractor, before stage mapping.
#[derive(Debug, Clone)]
pub struct RawProgress {
    /// Percent of the transfer in [0, 100]
    pub percent: f64,
    /// The line the reading came from
    pub message: Option<String>,
}

/// One extraction request.
pub struct ExtractRequest {
    /// Canonicalized source URL
    pub url: String,
    /// Job options driving the invocation
    pub options: JobOptions,
    /// Materialized cookie jar, when credentials are in use
    pub cookie_file: Option<PathBuf>,
    /// Scratch directory the tool writes into
    pub dest_dir: PathBuf,
    /// Cancellation signal scoped to the current attempt
    pub cancel: Option<watch::Receiver<bool>>,
}

/// Files and metadata produced by a successful extraction.
#[derive(Debug)]
pub struct Extraction {
    /// The downloaded media file
    pub media_file: PathBuf,
    /// Subtitle tracks as `(language, path)` pairs
    pub subtitles: Vec<(String, PathBuf)>,
    /// Thumbnail image, when one was produced
    pub thumbnail: Option<PathBuf>,
    /// Platform metadata
    pub metadata: JobMetadata,
    /// Wall-clock duration of the invocation
    pub elapsed: Duration,
}

/// Progress callback. Invoked at least once per heartbeat interval during
/// an active transfer so stall detection upstream can work.
pub type ProgressFn<'a> = &'a (dyn Fn(RawProgress) + Send + Sync);

/// The contract the worker runs extractions through.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn run(
        &self,
        request: ExtractRequest,
        on_progress: ProgressFn<'_>,
    ) -> ExtractorResult<Extraction>;
}

/// Parse a `[download]` progress line. Percentages are clamped to [0, 100];
/// anything else on the line is carried as the message.
pub fn parse_download_line(line: &str) -> Option<RawProgress> {
    let rest = line.strip_prefix("[download]")?.trim_start();
    let percent_end = rest.find('%')?;
    let percent: f64 = rest[..percent_end].trim().parse().ok()?;
    Some(RawProgress {
        percent: percent.clamp(0.0, 100.0),
        message: Some(rest.to_string()),
    })
}

/// The yt-dlp runner.
pub struct YtDlp {
    timeout: Duration,
    heartbeat: Duration,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlp {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            heartbeat: Duration::from_secs(10),
        }
    }

    /// Wall-clock bound for one invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum `on_progress` cadence.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Kill the child and everything it spawned (yt-dlp forks ffmpeg for
    /// merges and remuxes).
    async fn kill_tree(child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        let _ = child.kill().await;
    }
}

enum Parsed {
    Progress(RawProgress),
    Metadata(JobMetadata),
}

enum Exit {
    Status(std::process::ExitStatus),
    Timeout,
    Cancelled,
}

async fn wait_cancel(cancel: Option<&mut watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone; cancellation can no longer arrive.
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl Extract for YtDlp {
    async fn run(
        &self,
        mut request: ExtractRequest,
        on_progress: ProgressFn<'_>,
    ) -> ExtractorResult<Extraction> {
        which::which("yt-dlp").map_err(|_| ExtractorError::YtDlpNotFound)?;
        tokio::fs::create_dir_all(&request.dest_dir).await?;

        let command = YtDlpCommand::new(
            request.url.clone(),
            &request.dest_dir,
            request.options.clone(),
        )
        .with_cookie_file(request.cookie_file.clone());

        let args = command.build_args();
        debug!("running yt-dlp {}", args.join(" "));
        let started = tokio::time::Instant::now();

        let mut cmd = Command::new("yt-dlp");
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, mut rx) = mpsc::channel::<Parsed>(64);

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(progress) = parse_download_line(&line) {
                    let _ = tx.send(Parsed::Progress(progress)).await;
                } else if let Some(metadata) = parse_metadata_line(&line) {
                    let _ = tx.send(Parsed::Metadata(metadata)).await;
                } else {
                    debug!("yt-dlp: {}", line);
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("yt-dlp stderr: {}", line);
                buffer.push_str(&line);
                buffer.push('\n');
            }
            buffer
        });

        let deadline = started + self.timeout;
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = RawProgress {
            percent: 0.0,
            message: None,
        };
        let mut metadata: Option<JobMetadata> = None;
        let mut lines_done = false;

        let exit = loop {
            tokio::select! {
                status = child.wait() => break Exit::Status(status?),
                parsed = rx.recv(), if !lines_done => match parsed {
                    Some(Parsed::Progress(progress)) => {
                        last = progress.clone();
                        on_progress(progress);
                    }
                    Some(Parsed::Metadata(meta)) => metadata = Some(meta),
                    None => lines_done = true,
                },
                _ = heartbeat.tick() => on_progress(last.clone()),
                _ = tokio::time::sleep_until(deadline) => break Exit::Timeout,
                _ = wait_cancel(request.cancel.as_mut()) => break Exit::Cancelled,
            }
        };

        let status = match exit {
            Exit::Status(status) => status,
            Exit::Timeout => {
                warn!("yt-dlp exceeded {}s, killing", self.timeout.as_secs());
                Self::kill_tree(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExtractorError::Timeout(self.timeout.as_secs()));
            }
            Exit::Cancelled => {
                info!("extraction cancelled, killing yt-dlp");
                Self::kill_tree(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExtractorError::Cancelled);
            }
        };

        // Drain whatever the readers still hold.
        let _ = stdout_task.await;
        while let Ok(parsed) = rx.try_recv() {
            match parsed {
                Parsed::Progress(progress) => last = progress,
                Parsed::Metadata(meta) => metadata = Some(meta),
            }
        }
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(&stderr_text, status.code()));
        }

        let (media_file, subtitles, thumbnail) =
            collect_outputs(&request.dest_dir, &request.options).await?;

        info!(
            "extraction finished in {:.1}s: {}",
            started.elapsed().as_secs_f64(),
            media_file.display()
        );

        Ok(Extraction {
            media_file,
            subtitles,
            thumbnail,
            metadata: metadata.unwrap_or_default(),
            elapsed: started.elapsed(),
        })
    }
}

const MEDIA_EXTS: &[&str] = &["mp4", "webm", "mkv", "m4a", "mp3", "opus"];
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Sort the scratch directory's contents into media, subtitles and
/// thumbnail. The media file is the largest candidate, which skips
/// leftover fragment files from merges.
async fn collect_outputs(
    dest_dir: &std::path::Path,
    options: &JobOptions,
) -> ExtractorResult<(PathBuf, Vec<(String, PathBuf)>, Option<PathBuf>)> {
    let mut media: Option<(u64, PathBuf)> = None;
    let mut subtitles = Vec::new();
    let mut thumbnail: Option<PathBuf> = None;

    let mut entries = tokio::fs::read_dir(dest_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();

        if ext == "part" {
            continue;
        }
        if ext == "srt" {
            subtitles.push((subtitle_language(&path), path));
        } else if MEDIA_EXTS.contains(&ext.as_str()) {
            let size = entry.metadata().await?.len();
            if media.as_ref().map_or(true, |(best, _)| size > *best) {
                media = Some((size, path));
            }
        } else if IMAGE_EXTS.contains(&ext.as_str()) {
            thumbnail = Some(path);
        }
    }

    let (_, media_file) = media.ok_or_else(|| {
        ExtractorError::output_missing(format!(
            "no {} file produced in {}",
            options.output_ext(),
            dest_dir.display()
        ))
    })?;

    subtitles.sort_by(|a, b| a.0.cmp(&b.0));
    Ok((media_file, subtitles, thumbnail))
}

/// Language tag of a subtitle file named `<title>.<lang>.srt`.
fn subtitle_language(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.rsplit('.').next())
        .unwrap_or("und")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines_parse_and_clamp() {
        let p = parse_download_line("[download]  42.3% of 10.55MiB at 2.01MiB/s ETA 00:05")
            .unwrap();
        assert!((p.percent - 42.3).abs() < 0.01);

        let p = parse_download_line("[download] 100.0% of 10MiB").unwrap();
        assert_eq!(p.percent, 100.0);

        let p = parse_download_line("[download] 150% of ???").unwrap();
        assert_eq!(p.percent, 100.0);
    }

    #[test]
    fn non_progress_lines_are_ignored() {
        assert!(parse_download_line("[download] Destination: video.mp4").is_none());
        assert!(parse_download_line("[info] abc: Downloading 1 format(s)").is_none());
        assert!(parse_download_line("random noise").is_none());
    }

    #[test]
    fn subtitle_language_from_filename() {
        assert_eq!(
            subtitle_language(std::path::Path::new("/x/My Video.en.srt")),
            "en"
        );
        assert_eq!(
            subtitle_language(std::path::Path::new("/x/My Video.pt-BR.srt")),
            "pt-BR"
        );
        assert_eq!(subtitle_language(std::path::Path::new("/x/noext")), "noext");
    }

    #[tokio::test]
    async fn collect_outputs_sorts_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();

        std::fs::write(base.join("My Video.mp4"), vec![0u8; 1000]).unwrap();
        std::fs::write(base.join("My Video.f137.mp4"), vec![0u8; 100]).unwrap();
        std::fs::write(base.join("My Video.en.srt"), b"1\n").unwrap();
        std::fs::write(base.join("My Video.de.srt"), b"1\n").unwrap();
        std::fs::write(base.join("My Video.webp"), b"img").unwrap();
        std::fs::write(base.join("My Video.mp4.part"), b"partial").unwrap();

        let (media, subs, thumb) = collect_outputs(base, &JobOptions::default())
            .await
            .unwrap();

        assert_eq!(media, base.join("My Video.mp4"));
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].0, "de");
        assert_eq!(subs[1].0, "en");
        assert_eq!(thumb, Some(base.join("My Video.webp")));
    }

    #[tokio::test]
    async fn collect_outputs_requires_media() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("only.srt"), b"1\n").unwrap();

        let err = collect_outputs(dir.path(), &JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::OutputMissing(_)));
    }
}
