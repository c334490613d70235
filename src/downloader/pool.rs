use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::{FetchTarget, FetchedTrack, Fetcher};
use crate::api::TrackInfo;
use crate::errors::{AppError, Result};
use crate::jobs::{TrackReport, TrackStatus};
use crate::security::MAX_WORKERS;

/// One unit of work for the pool.
#[derive(Debug, Clone)]
pub struct TrackTask {
    pub index: usize,
    pub track: TrackInfo,
    pub target: FetchTarget,
}

/// Stop signals shared between a job and its pool. `cancel` is the job's own
/// flag; `abort` is raised by the supervisor when the job can no longer use
/// further outcomes.
#[derive(Debug, Clone, Default)]
pub struct PoolControl {
    cancel: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl PoolControl {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.is_cancelled() || self.abort.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct TrackOutcome {
    pub index: usize,
    pub track: TrackInfo,
    pub result: Result<FetchedTrack>,
}

impl TrackOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Splits the outcome into its report and, on success, the fetched body.
    pub fn into_report(self) -> (TrackReport, Option<FetchedTrack>) {
        let (status, bytes, error, fetched) = match self.result {
            Ok(fetched) => (TrackStatus::Success, fetched.bytes, None, Some(fetched)),
            Err(e) => (TrackStatus::Failed, 0, Some(e.to_string()), None),
        };
        let report = TrackReport {
            index: self.index,
            name: self.track.name,
            url: self.track.url,
            status,
            bytes,
            error,
        };
        (report, fetched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks handed to a fetcher.
    pub dispatched: usize,
    /// Tasks left in the queue when the pool stopped.
    pub skipped: usize,
}

/// Bounded set of fetch workers draining one job's track queue.
pub struct WorkerPool {
    fetcher: Arc<dyn Fetcher>,
    request_timeout: Duration,
}

impl WorkerPool {
    pub fn new(fetcher: Arc<dyn Fetcher>, request_timeout: Duration) -> Self {
        Self {
            fetcher,
            request_timeout,
        }
    }

    /// Runs until the queue is empty or `control` says stop. Every dispatched
    /// task produces exactly one outcome on `outcomes`; a fetch already in
    /// flight is allowed to finish.
    pub async fn run(
        &self,
        tag: &str,
        control: &PoolControl,
        tasks: Vec<TrackTask>,
        worker_count: usize,
        outcomes: mpsc::Sender<TrackOutcome>,
    ) -> PoolReport {
        let total = tasks.len();
        let workers = worker_count.clamp(1, MAX_WORKERS).min(total);
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let dispatched = Arc::new(AtomicUsize::new(0));

        log::info!("{} Starting {} workers for {} tracks via {}", tag, workers, total, self.fetcher.get_name());

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let control = control.clone();
            let fetcher = self.fetcher.clone();
            let outcomes = outcomes.clone();
            let dispatched = dispatched.clone();
            let budget = self.fetcher.time_budget(self.request_timeout);
            let tag = tag.to_string();

            handles.push(tokio::spawn(async move {
                loop {
                    if control.is_stopped() {
                        log::debug!("{} Worker {} stopping", tag, worker_id);
                        break;
                    }

                    let next = queue.lock().await.pop_front();
                    let Some(task) = next else { break };
                    dispatched.fetch_add(1, Ordering::SeqCst);

                    log::debug!("{} Worker {} fetching #{} {}", tag, worker_id, task.index + 1, task.track.url);
                    let result = fetch_with_budget(fetcher.as_ref(), &task, budget).await;
                    if let Err(e) = &result {
                        log::warn!("⚠️ {} Track #{} failed: {}", tag, task.index + 1, e);
                    }

                    let outcome = TrackOutcome {
                        index: task.index,
                        track: task.track,
                        result,
                    };
                    if outcomes.send(outcome).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(outcomes);

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("❌ {} Worker task ended abnormally: {}", tag, e);
            }
        }

        let dispatched = dispatched.load(Ordering::SeqCst);
        PoolReport {
            dispatched,
            skipped: total.saturating_sub(dispatched),
        }
    }
}

async fn fetch_with_budget(
    fetcher: &dyn Fetcher,
    task: &TrackTask,
    budget: Duration,
) -> Result<FetchedTrack> {
    match tokio::time::timeout(budget, fetcher.fetch(&task.track, &task.target)).await {
        Ok(result) => result,
        Err(_) => {
            if let FetchTarget::File(path) = &task.target {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("⚠️ Could not remove partial file {:?}: {}", path, e);
                    }
                }
            }
            Err(AppError::Fetch(format!(
                "Timed out after {}s",
                budget.as_secs_f32()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::FetchedPayload;
    use std::collections::HashSet;

    struct ScriptedFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, track: &TrackInfo, _target: &FetchTarget) -> Result<FetchedTrack> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if track.url.contains("slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if track.url.contains("bad") {
                return Err(AppError::Fetch("HTTP error: 404 Not Found".to_string()));
            }
            Ok(FetchedTrack {
                bytes: 3,
                payload: FetchedPayload::Buffer(b"abc".to_vec()),
            })
        }

        fn get_name(&self) -> &str {
            "scripted"
        }
    }

    fn tasks(urls: &[&str]) -> Vec<TrackTask> {
        urls.iter()
            .enumerate()
            .map(|(index, url)| TrackTask {
                index,
                track: TrackInfo::new(format!("t{index}"), *url),
                target: FetchTarget::Memory,
            })
            .collect()
    }

    fn fetcher() -> Arc<ScriptedFetcher> {
        Arc::new(ScriptedFetcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn every_task_yields_one_outcome() {
        let fetcher = fetcher();
        let pool = WorkerPool::new(fetcher.clone(), Duration::from_secs(2));
        let (tx, mut rx) = mpsc::channel(16);
        let urls = ["a", "bad", "c", "d", "bad2", "f", "g"];

        let report = pool
            .run("[test]", &PoolControl::default(), tasks(&urls), 3, tx)
            .await;

        let mut seen = HashSet::new();
        let mut failures = 0;
        while let Some(outcome) = rx.recv().await {
            if !outcome.succeeded() {
                failures += 1;
            }
            assert!(seen.insert(outcome.index));
        }
        assert_eq!(seen.len(), urls.len());
        assert_eq!(failures, 2);
        assert_eq!(report, PoolReport { dispatched: 7, skipped: 0 });
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn stopped_pool_dispatches_nothing() {
        let cancel = Arc::new(AtomicBool::new(true));
        let pool = WorkerPool::new(fetcher(), Duration::from_secs(2));
        let (tx, mut rx) = mpsc::channel(16);

        let report = pool
            .run("[test]", &PoolControl::new(cancel), tasks(&["a", "b"]), 2, tx)
            .await;

        assert_eq!(report, PoolReport { dispatched: 0, skipped: 2 });
        assert!(rx.recv().await.is_none());
    }

    /// Accepts connections forever. The first request is read and left
    /// hanging; later ones get a small audio body.
    fn stall_first_server() -> String {
        use std::io::{Read as _, Write as _};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/track.mp3", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            for (n, stream) in listener.incoming().flatten().enumerate() {
                std::thread::spawn(move || {
                    let mut stream = stream;
                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf);
                    if n == 0 {
                        std::thread::sleep(Duration::from_secs(10));
                        return;
                    }
                    let _ = stream.write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: 5\r\nConnection: close\r\n\r\naudio",
                    );
                });
            }
        });
        url
    }

    #[tokio::test]
    async fn retries_run_inside_the_request_budget() {
        let url = stall_first_server();
        let http = crate::downloader::HttpPool::new(2, 1)
            .unwrap()
            .with_retry(crate::downloader::http_pool::RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(50),
            });
        let pool = WorkerPool::new(Arc::new(http), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(4);

        let report = pool
            .run("[test]", &PoolControl::default(), tasks(&[url.as_str()]), 1, tx)
            .await;

        let outcome = rx.recv().await.unwrap();
        let (report_line, fetched) = outcome.into_report();
        assert_eq!(report_line.status, TrackStatus::Success, "{:?}", report_line.error);
        assert_eq!(fetched.unwrap().into_buffer().unwrap(), b"audio".to_vec());
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn request_budget_turns_into_failure() {
        let pool = WorkerPool::new(fetcher(), Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel(4);

        pool.run("[test]", &PoolControl::default(), tasks(&["slow"]), 1, tx)
            .await;

        let outcome = rx.recv().await.unwrap();
        let (report, fetched) = outcome.into_report();
        assert_eq!(report.status, TrackStatus::Failed);
        assert!(report.error.unwrap().contains("Timed out"));
        assert!(fetched.is_none());
    }
}
