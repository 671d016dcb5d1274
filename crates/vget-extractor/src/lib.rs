//! yt-dlp adapter for the vget backend.
//!
//! This crate provides:
//! - The [`Extract`] contract the worker runs jobs through
//! - An invocation builder encoding job options into yt-dlp arguments
//! - A runner with wall-clock timeout, cancellation and progress heartbeat
//! - Progress-line parsing and metadata extraction from `--print-json`
//! - Classification of failures into auth-required, unavailable and
//!   transient from exit status and stderr text

pub mod command;
pub mod error;
pub mod metadata;
pub mod runner;

pub use command::{format_selector, YtDlpCommand};
pub use error::{ExtractorError, ExtractorResult};
pub use metadata::parse_metadata_line;
pub use runner::{
    parse_download_line, Extract, ExtractRequest, Extraction, RawProgress, YtDlp,
};
