use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::manager::{JobManager, WeakJobManager};
use super::{DownloadMode, JobStatus};

fn age(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since).to_std().unwrap_or_default()
}

/// One pass over the table. Browser-mode jobs whose archive sat unclaimed
/// too long are expired, finished browser-mode jobs are dropped after the
/// retention period. Returns how many jobs were removed.
pub async fn sweep(manager: &JobManager, now: DateTime<Utc>) -> usize {
    let settings = &manager.settings().cleanup;
    let stale_after = Duration::from_secs(settings.stale_streaming_secs);
    let retain_for = Duration::from_secs(settings.delivered_retention_secs);
    let mut removed = 0;

    for entry in manager.entries().await {
        if entry.mode != DownloadMode::Browser {
            continue;
        }

        let expired = {
            let mut job = entry.state.lock().await;
            match job.status {
                JobStatus::Streaming => {
                    let mut delivery = entry.delivery.lock().await;
                    let stale = delivery
                        .as_ref()
                        .map_or(false, |d| age(d.ready_at, now) >= stale_after);
                    match delivery.take() {
                        Some(parked) if stale => {
                            if job
                                .finish(JobStatus::Completed, "Archive expired before retrieval", parked.result)
                                .is_ok()
                            {
                                manager.emit(&job);
                            }
                            log::info!("🧹 [Job {}] Archive expired before retrieval", crate::utils::short_id(&entry.id));
                            true
                        }
                        parked => {
                            *delivery = parked;
                            false
                        }
                    }
                }
                status if status.is_terminal() => job
                    .completed_at
                    .map_or(false, |done| age(done, now) >= retain_for),
                _ => false,
            }
        };

        if expired && manager.remove(&entry.id).await {
            removed += 1;
        }
    }

    removed
}

pub(crate) fn spawn(manager: WeakJobManager, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else { break };
            let removed = sweep(&manager, Utc::now()).await;
            if removed > 0 {
                log::info!("🧹 [CLEANUP] Removed {} jobs", removed);
            }
        }
    })
}
