//! Shared data models for the vget backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle (status, attempts, timestamps)
//! - Download options (quality, container, subtitles, cookies)
//! - Extracted media metadata and stored artifacts
//! - The failure taxonomy surfaced to callers
//! - Progress events published while a job runs
//! - Storage key layout and filename sanitization
//! - Source URL canonicalization and host allow-list matching

pub mod failure;
pub mod job;
pub mod keys;
pub mod options;
pub mod progress;
pub mod urls;

pub use failure::{ErrorKind, JobFailure};
pub use job::{Artifact, Job, JobArtifacts, JobId, JobMetadata, JobStatus};
pub use keys::{sanitize_title, subtitle_key, thumbnail_key, video_key};
pub use options::{JobOptions, OutputFormat, Quality, SUPPORTED_HEIGHTS};
pub use progress::{ProgressEvent, Stage};
pub use urls::{canonicalize_url, HostPattern, UrlError};
