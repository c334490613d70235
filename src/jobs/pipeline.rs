use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::manager::{JobEntry, JobManager};
use super::{DownloadMode, JobResult, JobSnapshot, JobStatus, TrackReport, TrackStatus};
use crate::api::TrackInfo;
use crate::downloader::{ArchiveHandle, EntryError, FetchTarget, PoolControl, TrackOutcome, TrackTask};
use crate::errors::{AppError, Result};
use crate::utils::{ensure_dir_exists, short_id, track_file_name};

/// Background body of one job: detect, scrape, download, then persist or
/// archive. Every path ends in a terminal status or in `streaming`.
pub(crate) async fn run(manager: JobManager, entry: Arc<JobEntry>) {
    let tag = format!("[Job {}]", short_id(&entry.id));
    if let Err(e) = drive(&manager, &entry, &tag).await {
        log::error!("❌ {} Pipeline stopped: {}", tag, e);
        manager
            .fail_if_active(&entry, format!("Internal error: {}", e))
            .await;
    }
}

async fn drive(manager: &JobManager, entry: &JobEntry, tag: &str) -> Result<()> {
    let control = PoolControl::new(entry.cancel.clone());

    let job = manager
        .update(entry, |job| {
            job.advance(JobStatus::Detecting, "Detecting audio player...")
        })
        .await?;
    if control.is_cancelled() {
        return finish_empty(manager, entry, JobStatus::Cancelled, "Cancelled before detection").await;
    }

    let plugin = match job.plugin_override {
        Some(plugin) => {
            log::info!("{} Using {} plugin (override)", tag, plugin);
            plugin
        }
        None => match manager.source().detect(&job.source_url).await {
            Ok(plugin) => {
                log::info!("{} Detected {} plugin", tag, plugin);
                plugin
            }
            Err(e) => return fail_detection(manager, entry, tag, e).await,
        },
    };
    if control.is_cancelled() {
        return finish_empty(manager, entry, JobStatus::Cancelled, "Cancelled during detection").await;
    }

    let tracks = match manager.source().scrape(&job.source_url, plugin).await {
        Ok(tracks) => tracks,
        Err(e) => return fail_detection(manager, entry, tag, e).await,
    };
    if control.is_cancelled() {
        return finish_empty(manager, entry, JobStatus::Cancelled, "Cancelled during detection").await;
    }

    if tracks.is_empty() {
        log::warn!("⚠️ {} No tracks found", tag);
        let message = format!("No tracks found on page using the {} plugin", plugin);
        return finish_empty(manager, entry, JobStatus::Error, &message).await;
    }

    let job = manager
        .update(entry, |job| job.begin_downloading(plugin, tracks))
        .await?;
    log::info!("{} Downloading {} tracks with {} workers", tag, job.progress.total, job.worker_count);

    match job.download_mode {
        DownloadMode::Server => download_to_disk(manager, entry, &control, tag, &job).await,
        DownloadMode::Browser => download_to_archive(manager, entry, &control, tag, &job).await,
    }
}

fn detection_message(error: &AppError) -> String {
    match error {
        AppError::Detection(message) => format!("Detection failed: {}", message),
        AppError::Network(message) => format!("Could not load page: {}", message),
        AppError::Http(e) => format!("Could not load page: {}", e),
        other => format!("Detection failed: {}", other),
    }
}

async fn fail_detection(manager: &JobManager, entry: &JobEntry, tag: &str, error: AppError) -> Result<()> {
    log::warn!("⚠️ {} Detection failed: {}", tag, error);
    let message = detection_message(&error);
    finish_empty(manager, entry, JobStatus::Error, &message).await
}

/// Ends a job that never reached the download stage.
async fn finish_empty(manager: &JobManager, entry: &JobEntry, status: JobStatus, message: &str) -> Result<()> {
    manager
        .update(entry, |job| {
            let result = JobResult::from_reports(job.progress.total, Vec::new());
            job.finish(status, message, result)
        })
        .await
        .map(|_| ())
}

fn tasks_for(tracks: &[TrackInfo], target: impl Fn(&str) -> FetchTarget) -> Vec<TrackTask> {
    tracks
        .iter()
        .enumerate()
        .map(|(index, track)| TrackTask {
            index,
            track: track.clone(),
            target: target(&track_file_name(index, &track.name, &track.url)),
        })
        .collect()
}

/// What the supervisor saw while the pool ran.
struct Supervised {
    reports: Vec<TrackReport>,
    /// Set when the archive stopped accepting entries.
    sink_error: Option<AppError>,
}

/// Applies outcomes to the job one at a time, in arrival order. With an
/// archive, each successful body is packed and released before the next
/// outcome is taken.
async fn supervise(
    manager: &JobManager,
    entry: &JobEntry,
    control: &PoolControl,
    tag: &str,
    mut outcomes: mpsc::Receiver<TrackOutcome>,
    mut archive: Option<&mut ArchiveHandle>,
) -> Result<Supervised> {
    let mut reports = Vec::new();
    let mut sink_error: Option<AppError> = None;

    while let Some(outcome) = outcomes.recv().await {
        let entry_name = track_file_name(outcome.index, &outcome.track.name, &outcome.track.url);
        let (mut report, fetched) = outcome.into_report();

        if let (Some(archive), Some(fetched)) = (archive.as_deref_mut(), fetched) {
            let unavailable = sink_error.is_some();
            let added = match (unavailable, fetched.into_buffer()) {
                (true, _) => Err("archive unavailable".to_string()),
                (false, None) => Err("track was not buffered".to_string()),
                (false, Some(data)) => match archive.add_entry(entry_name, data).await {
                    Ok(_) => Ok(()),
                    Err(EntryError::Entry(e)) => Err(e.to_string()),
                    Err(EntryError::Sink(e)) => {
                        log::error!("❌ {} Archive failed: {}", tag, e);
                        let message = e.to_string();
                        sink_error = Some(e);
                        control.abort();
                        Err(message)
                    }
                },
            };

            if let Err(message) = added {
                report.status = TrackStatus::Failed;
                report.bytes = 0;
                report.error = Some(message);
            }
        }

        let success = report.status == TrackStatus::Success;
        manager.update(entry, |job| job.record_outcome(success)).await?;
        reports.push(report);
    }

    Ok(Supervised { reports, sink_error })
}

async fn run_pool(
    manager: &JobManager,
    entry: &JobEntry,
    control: &PoolControl,
    tag: &str,
    job: &JobSnapshot,
    tasks: Vec<TrackTask>,
    archive: Option<&mut ArchiveHandle>,
) -> Result<Supervised> {
    let (tx, rx) = mpsc::channel(1);
    let (report, supervised) = tokio::join!(
        manager.pool().run(tag, control, tasks, job.worker_count, tx),
        supervise(manager, entry, control, tag, rx, archive),
    );
    if report.skipped > 0 {
        log::info!("{} {} tracks were never dispatched", tag, report.skipped);
    }
    supervised
}

fn summary(result: &JobResult) -> String {
    if result.failed > 0 {
        format!(
            "Downloaded {} tracks successfully, {} failed",
            result.successful, result.failed
        )
    } else {
        format!("Downloaded {} tracks successfully", result.successful)
    }
}

fn cancelled_message(result: &JobResult) -> String {
    format!(
        "Download cancelled: {} of {} tracks finished",
        result.tracks.len(),
        result.total
    )
}

fn all_failed_message(result: &JobResult) -> String {
    format!("All downloads failed ({} of {} tracks)", result.failed, result.total)
}

async fn download_to_disk(
    manager: &JobManager,
    entry: &JobEntry,
    control: &PoolControl,
    tag: &str,
    job: &JobSnapshot,
) -> Result<()> {
    let output_dir: PathBuf = manager.settings().download_dir.join(&job.download_name);
    if let Err(e) = ensure_dir_exists(&output_dir).await {
        log::error!("❌ {} Cannot use {:?}: {}", tag, output_dir, e);
        let message = format!("Could not create output directory: {}", e);
        return finish_empty(manager, entry, JobStatus::Error, &message).await;
    }

    let tasks = tasks_for(&job.tracks, |file_name| FetchTarget::File(output_dir.join(file_name)));
    let supervised = run_pool(manager, entry, control, tag, job, tasks, None).await?;

    let mut result = JobResult::from_reports(job.progress.total, supervised.reports);
    result.output_dir = Some(output_dir);

    let (status, message) = if control.is_cancelled() {
        (JobStatus::Cancelled, cancelled_message(&result))
    } else if result.successful == 0 {
        (JobStatus::Error, all_failed_message(&result))
    } else {
        (JobStatus::Completed, summary(&result))
    };

    log::info!("{} {}", tag, message);
    manager
        .update(entry, |job| job.finish(status, message, result))
        .await?;
    Ok(())
}

async fn download_to_archive(
    manager: &JobManager,
    entry: &JobEntry,
    control: &PoolControl,
    tag: &str,
    job: &JobSnapshot,
) -> Result<()> {
    let mut archive = match ArchiveHandle::begin(&job.download_name, &manager.settings().archive_spool).await {
        Ok(archive) => archive,
        Err(e) => {
            let message = format!("Archive failed: {}", e);
            return finish_empty(manager, entry, JobStatus::Error, &message).await;
        }
    };

    let tasks = tasks_for(&job.tracks, |_| FetchTarget::Memory);
    let supervised = run_pool(manager, entry, control, tag, job, tasks, Some(&mut archive)).await?;
    let mut result = JobResult::from_reports(job.progress.total, supervised.reports);

    let outcome = if let Some(e) = supervised.sink_error {
        Some((JobStatus::Error, format!("Archive failed: {}", e)))
    } else if control.is_cancelled() {
        Some((JobStatus::Cancelled, cancelled_message(&result)))
    } else if result.successful == 0 {
        Some((JobStatus::Error, all_failed_message(&result)))
    } else {
        None
    };

    if let Some((status, message)) = outcome {
        log::info!("{} {}", tag, message);
        drop(archive);
        manager
            .update(entry, |job| job.finish(status, message, result))
            .await?;
        return Ok(());
    }

    manager
        .update(entry, |job| {
            job.advance(JobStatus::Zipping, format!("{}. Creating archive...", summary(&result)))
        })
        .await?;

    match archive.finalize().await {
        Ok(artifact) => {
            log::info!("📦 {} Archive ready: {} bytes", tag, artifact.total_bytes);
            result.archive_bytes = Some(artifact.total_bytes);
            manager.publish_delivery(entry, artifact, result).await
        }
        Err(e) => {
            log::error!("❌ {} Archive failed: {}", tag, e);
            let message = format!("Archive failed: {}", e);
            manager
                .update(entry, |job| job.finish(JobStatus::Error, message, result))
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_messages_tell_causes_apart() {
        assert_eq!(
            detection_message(&AppError::Detection("Could not detect any audio player on this page".into())),
            "Detection failed: Could not detect any audio player on this page"
        );
        assert_eq!(
            detection_message(&AppError::Network("HTTP 503 Service Unavailable".into())),
            "Could not load page: HTTP 503 Service Unavailable"
        );
    }

    #[test]
    fn tasks_keep_page_order_and_unique_names() {
        let tracks = vec![
            TrackInfo::new("Intro", "https://cdn.test/intro.m4a"),
            TrackInfo::new("Intro", "https://cdn.test/intro-2.mp3?sig=1"),
        ];
        let tasks = tasks_for(&tracks, |name| FetchTarget::File(PathBuf::from("/out").join(name)));
        assert_eq!(tasks[0].index, 0);
        assert_eq!(tasks[0].target, FetchTarget::File(PathBuf::from("/out/001_Intro.m4a")));
        assert_eq!(tasks[1].target, FetchTarget::File(PathBuf::from("/out/002_Intro.mp3")));
    }
}
