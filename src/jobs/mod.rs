pub mod cleanup;
pub mod events;
pub mod manager;
mod pipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::api::TrackInfo;
use crate::errors::{AppError, Result};
use crate::scraper::PluginKind;

pub use events::{EventFeed, FeedItem, JobEvent};
pub use manager::{JobManager, JobSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Tracks are written under the download directory.
    #[default]
    Server,
    /// Tracks are packed into a one-shot archive handed to the requester.
    Browser,
}

impl FromStr for DownloadMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(DownloadMode::Server),
            "browser" => Ok(DownloadMode::Browser),
            other => Err(AppError::Validation(format!(
                "Unknown download mode: {}. Use server or browser",
                other
            ))),
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadMode::Server => write!(f, "server"),
            DownloadMode::Browser => write!(f, "browser"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Detecting,
    Downloading,
    Zipping,
    Streaming,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled)
    }

    /// Edges of the job state machine. Anything not listed is refused.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Detecting)
                | (Detecting, Downloading)
                | (Detecting, Error)
                | (Detecting, Cancelled)
                | (Downloading, Zipping)
                | (Downloading, Completed)
                | (Downloading, Error)
                | (Downloading, Cancelled)
                | (Zipping, Streaming)
                | (Zipping, Error)
                | (Streaming, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Detecting => "detecting",
            JobStatus::Downloading => "downloading",
            JobStatus::Zipping => "zipping",
            JobStatus::Streaming => "streaming",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl Progress {
    pub fn accounted(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_done(&self) -> bool {
        self.accounted() >= self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Success,
    Failed,
}

/// Outcome of one track, kept in the job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackReport {
    pub index: usize,
    pub name: String,
    pub url: String,
    pub status: TrackStatus,
    pub bytes: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    /// Server mode: where the tracks were written.
    pub output_dir: Option<PathBuf>,
    /// Browser mode: size of the assembled archive.
    pub archive_bytes: Option<u64>,
    pub tracks: Vec<TrackReport>,
}

impl JobResult {
    pub fn from_reports(total: usize, mut tracks: Vec<TrackReport>) -> Self {
        tracks.sort_by_key(|report| report.index);
        let successful = tracks
            .iter()
            .filter(|report| report.status == TrackStatus::Success)
            .count();
        Self {
            successful,
            failed: tracks.len() - successful,
            total,
            output_dir: None,
            archive_bytes: None,
            tracks,
        }
    }
}

/// Mutable state of one job. Only the manager and the pipeline it spawns
/// touch it, always through the job's lock. Clones are the snapshots handed
/// to callers and observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub download_mode: DownloadMode,
    pub source_url: String,
    pub requested_name: Option<String>,
    pub download_name: String,
    pub plugin_override: Option<PluginKind>,
    pub plugin: Option<PluginKind>,
    pub worker_count: usize,
    pub tracks: Vec<TrackInfo>,
    pub progress: Progress,
    pub result: Option<JobResult>,
    pub message: String,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub type JobSnapshot = Job;

impl Job {
    pub(crate) fn new(
        id: String,
        source_url: String,
        download_mode: DownloadMode,
        requested_name: Option<String>,
        download_name: String,
        plugin_override: Option<PluginKind>,
        worker_count: usize,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            download_mode,
            source_url,
            requested_name,
            download_name,
            plugin_override,
            plugin: None,
            worker_count,
            tracks: Vec::new(),
            progress: Progress::default(),
            result: None,
            message: "Job created".to_string(),
            cancel_requested: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves to a non-terminal state.
    pub(crate) fn advance(&mut self, next: JobStatus, message: impl Into<String>) -> Result<()> {
        if next.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "{} is terminal and needs a result",
                next
            )));
        }
        self.check_edge(next)?;
        self.status = next;
        self.message = message.into();
        Ok(())
    }

    /// Moves to a terminal state, recording the result at the same time.
    pub(crate) fn finish(
        &mut self,
        next: JobStatus,
        message: impl Into<String>,
        result: JobResult,
    ) -> Result<()> {
        if !next.is_terminal() {
            return Err(AppError::InvalidState(format!("{} is not terminal", next)));
        }
        self.check_edge(next)?;
        self.status = next;
        self.message = message.into();
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Fixes the track list and the progress total on entering `downloading`.
    pub(crate) fn begin_downloading(
        &mut self,
        plugin: PluginKind,
        tracks: Vec<TrackInfo>,
    ) -> Result<()> {
        let total = tracks.len();
        self.advance(
            JobStatus::Downloading,
            format!("Found {} tracks. Downloading...", total),
        )?;
        self.plugin = Some(plugin);
        self.tracks = tracks;
        self.progress = Progress {
            completed: 0,
            failed: 0,
            total,
        };
        Ok(())
    }

    pub(crate) fn record_outcome(&mut self, success: bool) -> Result<()> {
        if self.status != JobStatus::Downloading {
            return Err(AppError::InvalidState(format!(
                "progress update while {}",
                self.status
            )));
        }
        if self.progress.is_done() {
            return Err(AppError::InvalidState(
                "progress already accounts for every track".to_string(),
            ));
        }
        if success {
            self.progress.completed += 1;
        } else {
            self.progress.failed += 1;
        }
        self.message = format!(
            "Downloading: {}/{} completed, {} failed",
            self.progress.completed, self.progress.total, self.progress.failed
        );
        Ok(())
    }

    fn check_edge(&self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "cannot move job from {} to {}",
                self.status, next
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "job-1".to_string(),
            "https://example.test/book".to_string(),
            DownloadMode::Server,
            None,
            "book".to_string(),
            None,
            3,
        )
    }

    fn empty_result() -> JobResult {
        JobResult::from_reports(0, Vec::new())
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use JobStatus::*;
        let all = [
            Pending, Detecting, Downloading, Zipping, Streaming, Completed, Error, Cancelled,
        ];
        for from in [Completed, Error, Cancelled] {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        for status in all {
            assert!(!status.can_transition_to(status), "{status} revisits itself");
        }
    }

    #[test]
    fn no_shortcuts_through_the_graph() {
        use JobStatus::*;
        assert!(!Pending.can_transition_to(Downloading));
        assert!(!Pending.can_transition_to(Cancelled));
        assert!(!Detecting.can_transition_to(Zipping));
        assert!(!Zipping.can_transition_to(Completed));
        assert!(!Zipping.can_transition_to(Cancelled));
        assert!(!Streaming.can_transition_to(Error));
    }

    #[test]
    fn advance_refuses_terminal_targets() {
        let mut job = job();
        job.advance(JobStatus::Detecting, "detecting").unwrap();
        assert!(job.advance(JobStatus::Error, "boom").is_err());
        assert!(job.result.is_none());

        job.finish(JobStatus::Error, "No tracks found on page", empty_result())
            .unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.result.is_some());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn progress_never_exceeds_total() {
        let mut job = job();
        job.advance(JobStatus::Detecting, "detecting").unwrap();
        job.begin_downloading(
            PluginKind::SimpleMp3,
            vec![
                TrackInfo::new("a", "https://cdn.test/a.mp3"),
                TrackInfo::new("b", "https://cdn.test/b.mp3"),
            ],
        )
        .unwrap();

        job.record_outcome(true).unwrap();
        job.record_outcome(false).unwrap();
        assert!(job.record_outcome(true).is_err());
        assert_eq!(
            job.progress,
            Progress {
                completed: 1,
                failed: 1,
                total: 2
            }
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Downloading).unwrap(),
            "\"downloading\""
        );
        assert_eq!("Browser".parse::<DownloadMode>().unwrap(), DownloadMode::Browser);
        assert!("desktop".parse::<DownloadMode>().is_err());
    }

    #[test]
    fn result_counts_from_reports() {
        let report = |index, status| TrackReport {
            index,
            name: format!("t{index}"),
            url: String::new(),
            status,
            bytes: 0,
            error: None,
        };
        let result = JobResult::from_reports(
            5,
            vec![report(2, TrackStatus::Failed), report(0, TrackStatus::Success)],
        );
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.total, 5);
        assert_eq!(result.tracks[0].index, 0);
    }
}
