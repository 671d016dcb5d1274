//! Progress events published while a job runs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::JobId;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preparing,
    Extracting,
    Downloading,
    Uploading,
    Finalizing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::Extracting => "extracting",
            Stage::Downloading => "downloading",
            Stage::Uploading => "uploading",
            Stage::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single progress update for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    /// Job this event belongs to
    pub job_id: JobId,
    /// Current pipeline stage
    pub stage: Stage,
    /// Overall percent in [0, 100]
    pub percent: f64,
    /// Optional human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Event timestamp
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event stamped now, with the percent clamped to [0, 100].
    pub fn new(job_id: JobId, stage: Stage, percent: f64) -> Self {
        Self {
            job_id,
            stage,
            percent: percent.clamp(0.0, 100.0),
            message: None,
            at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped() {
        let id = JobId::new();
        assert_eq!(ProgressEvent::new(id.clone(), Stage::Downloading, 120.0).percent, 100.0);
        assert_eq!(ProgressEvent::new(id, Stage::Downloading, -3.0).percent, 0.0);
    }

    #[test]
    fn event_serde() {
        let ev = ProgressEvent::new(JobId::from("j1"), Stage::Uploading, 85.5)
            .with_message("video.mp4");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["stage"], "uploading");
        assert_eq!(json["percent"], 85.5);
    }
}
