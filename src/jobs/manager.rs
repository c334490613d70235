use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::events::EventBus;
use super::{cleanup, pipeline};
use super::{DownloadMode, EventFeed, Job, JobEvent, JobResult, JobSnapshot, JobStatus};
use crate::api::DownloadRequest;
use crate::config::{AppConfig, CleanupConfig};
use crate::downloader::{ArchiveSpool, Artifact, Fetcher, HttpPool, WorkerPool};
use crate::errors::{AppError, Result};
use crate::scraper::{PluginKind, TrackSource, WebTrackSource};
use crate::security::InputValidator;
use crate::utils::{generate_job_id, generate_name_from_url, short_id};

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub download_dir: PathBuf,
    pub default_workers: usize,
    pub request_timeout: Duration,
    pub event_buffer: usize,
    pub block_private_hosts: bool,
    pub cleanup: CleanupConfig,
    /// Where browser-mode archives are written until they are taken.
    pub archive_spool: ArchiveSpool,
}

impl JobSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            download_dir: config.download_dir.clone(),
            default_workers: config.default_workers,
            request_timeout: config.request_timeout(),
            event_buffer: config.event_buffer,
            block_private_hosts: config.block_private_hosts,
            cleanup: config.cleanup.clone(),
            archive_spool: match &config.archive_spool_dir {
                Some(dir) => ArchiveSpool::in_dir(dir.clone()),
                None => ArchiveSpool::temp(),
            },
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Finished archive parked until the requester takes it.
pub(crate) struct Delivery {
    pub artifact: Artifact,
    pub result: JobResult,
    pub ready_at: DateTime<Utc>,
}

/// Table slot for one job. Lock order is `state` then `delivery`.
pub(crate) struct JobEntry {
    pub id: String,
    pub seq: u64,
    pub mode: DownloadMode,
    pub state: Mutex<Job>,
    pub cancel: Arc<AtomicBool>,
    pub delivery: Mutex<Option<Delivery>>,
}

struct ManagerInner {
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    sequence: AtomicU64,
    source: Arc<dyn TrackSource>,
    pool: WorkerPool,
    events: EventBus,
    settings: JobSettings,
    validator: InputValidator,
    cleanup: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owner of every job in the process. Clones share the same table.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

/// Handle that doesn't keep the manager alive.
#[derive(Clone)]
pub(crate) struct WeakJobManager {
    inner: Weak<ManagerInner>,
}

impl WeakJobManager {
    pub fn upgrade(&self) -> Option<JobManager> {
        self.inner.upgrade().map(|inner| JobManager { inner })
    }
}

impl JobManager {
    pub fn new(settings: JobSettings, source: Arc<dyn TrackSource>, fetcher: Arc<dyn Fetcher>) -> Self {
        let pool = WorkerPool::new(fetcher, settings.request_timeout);
        let events = EventBus::new(settings.event_buffer);
        let validator = InputValidator::new(settings.block_private_hosts);

        Self {
            inner: Arc::new(ManagerInner {
                jobs: RwLock::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                source,
                pool,
                events,
                settings,
                validator,
                cleanup: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Manager wired to the HTTP track source and fetcher.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http_pool = Arc::new(HttpPool::from_config(config)?);
        let source = WebTrackSource::new(
            http_pool.clone(),
            config.page_timeout(),
            config.plyr_api_url.clone(),
        );
        Ok(Self::new(
            JobSettings::from_config(config),
            Arc::new(source),
            http_pool,
        ))
    }

    pub fn settings(&self) -> &JobSettings {
        &self.inner.settings
    }

    /// Validates a submit payload and starts the job.
    pub async fn submit(&self, request: DownloadRequest) -> Result<JobSnapshot> {
        let plugin_override = match request.plugin.as_deref().map(str::trim) {
            None | Some("") | Some("auto") => None,
            Some(plugin) => Some(plugin.parse::<PluginKind>()?),
        };
        let workers = request.workers.unwrap_or(self.inner.settings.default_workers);

        let (_, snapshot) = self
            .create_job(
                &request.url,
                request.download_mode,
                plugin_override,
                workers,
                request.name.as_deref(),
            )
            .await?;
        Ok(snapshot)
    }

    /// Registers a `pending` job and spawns its pipeline. Returns as soon as
    /// the job is in the table.
    pub async fn create_job(
        &self,
        url: &str,
        mode: DownloadMode,
        plugin_override: Option<PluginKind>,
        worker_count: usize,
        display_name: Option<&str>,
    ) -> Result<(String, JobSnapshot)> {
        let validator = &self.inner.validator;
        validator.validate_workers(worker_count)?;
        let parsed = validator.validate_url(url)?;

        let requested_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let download_name = match &requested_name {
            Some(name) => {
                validator.validate_name(name)?;
                if mode == DownloadMode::Server
                    && self.inner.settings.download_dir.join(name).exists()
                {
                    return Err(AppError::Validation(format!(
                        "Directory '{}' already exists",
                        name
                    )));
                }
                name.clone()
            }
            None => generate_name_from_url(&parsed, Utc::now()),
        };

        let id = generate_job_id();
        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let job = Job::new(
            id.clone(),
            parsed.to_string(),
            mode,
            requested_name,
            download_name,
            plugin_override,
            worker_count,
        );
        let snapshot = job.clone();

        let entry = Arc::new(JobEntry {
            id: id.clone(),
            seq,
            mode,
            state: Mutex::new(job),
            cancel: Arc::new(AtomicBool::new(false)),
            delivery: Mutex::new(None),
        });

        {
            let state = entry.state.lock().await;
            self.inner.jobs.write().await.insert(id.clone(), entry.clone());
            self.emit(&state);
        }

        log::info!(
            "[Job {}] Created {} job for {} ({} workers)",
            short_id(&id),
            mode,
            snapshot.source_url,
            worker_count
        );

        tokio::spawn(pipeline::run(self.clone(), entry));
        Ok((id, snapshot))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobSnapshot> {
        let entry = self.entry(job_id).await?;
        let job = entry.state.lock().await;
        Ok(job.clone())
    }

    /// Every job, newest first.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut snapshots = Vec::new();
        for entry in self.entries().await {
            snapshots.push(entry.state.lock().await.clone());
        }
        snapshots
    }

    /// Requests cooperative cancellation. Terminal jobs and repeated calls
    /// are left alone.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let entry = self.entry(job_id).await?;
        let mut job = entry.state.lock().await;

        if job.status.is_terminal() || job.cancel_requested {
            return Ok(());
        }

        entry.cancel.store(true, Ordering::SeqCst);
        job.cancel_requested = true;
        if matches!(
            job.status,
            JobStatus::Pending | JobStatus::Detecting | JobStatus::Downloading
        ) {
            job.message = "Cancellation requested".to_string();
        }
        self.emit(&job);

        log::info!("[Job {}] Cancellation requested", short_id(job_id));
        Ok(())
    }

    /// Drops a finished job from the table. Files written in server mode stay.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let entry = self.entry(job_id).await?;
        {
            let job = entry.state.lock().await;
            if !job.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "Job {} is still {}; cancel it first",
                    job_id, job.status
                )));
            }
        }

        if !self.remove(job_id).await {
            return Err(AppError::NotFound(format!("Job {} not found", job_id)));
        }
        log::info!("[Job {}] Deleted", short_id(job_id));
        Ok(())
    }

    /// Hands over a browser-mode archive. Succeeds once per job.
    pub async fn take_artifact(&self, job_id: &str) -> Result<Artifact> {
        let entry = self.entry(job_id).await?;
        let mut job = entry.state.lock().await;

        match job.status {
            JobStatus::Streaming => {}
            JobStatus::Completed if entry.mode == DownloadMode::Browser => {
                return Err(AppError::NotFound(format!(
                    "Archive for job {} was already delivered",
                    job_id
                )));
            }
            status => {
                return Err(AppError::InvalidState(format!(
                    "Job {} has no archive ready ({})",
                    job_id, status
                )));
            }
        }

        let delivery = entry
            .delivery
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::NotFound(format!("Archive for job {} is gone", job_id)))?;

        job.finish(JobStatus::Completed, "Archive delivered", delivery.result)?;
        self.emit(&job);

        log::info!(
            "[Job {}] Archive {} delivered ({} bytes)",
            short_id(job_id),
            delivery.artifact.file_name,
            delivery.artifact.total_bytes
        );
        Ok(delivery.artifact)
    }

    /// Subscribes to changes, primed with the current job list.
    pub async fn subscribe(&self) -> EventFeed {
        let receiver = self.inner.events.subscribe();
        let jobs = self.list_jobs().await;
        EventFeed::new(jobs, receiver, self.clone())
    }

    /// Starts the periodic sweep of stale browser-mode jobs.
    pub fn start_cleanup(&self) {
        let every = Duration::from_secs(self.inner.settings.cleanup.interval_secs);
        if every.is_zero() {
            log::info!("[CLEANUP] Disabled");
            return;
        }

        let Ok(mut slot) = self.inner.cleanup.lock() else {
            log::error!("❌ [CLEANUP] Task slot poisoned");
            return;
        };
        if slot.is_none() {
            *slot = Some(cleanup::spawn(self.downgrade(), every));
        }
    }

    /// Cancels every live job and stops the cleanup task.
    pub async fn shutdown(&self) {
        for entry in self.entries().await {
            if let Err(e) = self.cancel_job(&entry.id).await {
                log::debug!("[Job {}] Not cancelled on shutdown: {}", short_id(&entry.id), e);
            }
        }

        if let Ok(mut slot) = self.inner.cleanup.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        log::info!("Job manager shut down");
    }

    pub(crate) fn downgrade(&self) -> WeakJobManager {
        WeakJobManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn source(&self) -> &dyn TrackSource {
        self.inner.source.as_ref()
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Table entries, newest first. The table lock is released on return.
    pub(crate) async fn entries(&self) -> Vec<Arc<JobEntry>> {
        let mut entries: Vec<Arc<JobEntry>> =
            self.inner.jobs.read().await.values().cloned().collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries
    }

    /// Publishes the job's current state. Callers hold the job lock so
    /// events for one job leave in the order they were produced.
    pub(crate) fn emit(&self, job: &Job) {
        self.inner.events.publish(JobEvent::Updated {
            job_id: job.id.clone(),
            snapshot: job.clone(),
        });
    }

    /// Applies `change` under the job lock and publishes the result.
    pub(crate) async fn update<F>(&self, entry: &JobEntry, change: F) -> Result<JobSnapshot>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut job = entry.state.lock().await;
        change(&mut job)?;
        self.emit(&job);
        Ok(job.clone())
    }

    /// Parks the archive and moves the job to `streaming` in one step, so an
    /// observer that sees `streaming` can always take the archive.
    pub(crate) async fn publish_delivery(
        &self,
        entry: &JobEntry,
        artifact: Artifact,
        result: JobResult,
    ) -> Result<()> {
        let mut job = entry.state.lock().await;
        let message = format!(
            "Archive ready: {} ({})",
            artifact.file_name,
            crate::utils::format_size(artifact.total_bytes)
        );
        job.advance(JobStatus::Streaming, message)?;
        *entry.delivery.lock().await = Some(Delivery {
            artifact,
            result,
            ready_at: Utc::now(),
        });
        self.emit(&job);
        Ok(())
    }

    /// Moves a job that is still running to `error`. Used when the pipeline
    /// itself breaks.
    pub(crate) async fn fail_if_active(&self, entry: &JobEntry, message: String) {
        let mut job = entry.state.lock().await;
        if !job.status.can_transition_to(JobStatus::Error) {
            return;
        }
        let result = JobResult::from_reports(job.progress.total, Vec::new());
        if job.finish(JobStatus::Error, message, result).is_ok() {
            self.emit(&job);
        }
    }

    /// Removes a job from the table and announces it. False if it was already gone.
    pub(crate) async fn remove(&self, job_id: &str) -> bool {
        let removed = self.inner.jobs.write().await.remove(job_id);
        match removed {
            Some(entry) => {
                entry.delivery.lock().await.take();
                self.inner.events.publish(JobEvent::Removed {
                    job_id: job_id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    async fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>> {
        self.inner
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }
}
