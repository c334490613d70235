use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{JobManager, JobSnapshot};

/// Change notification fanned out to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Updated { job_id: String, snapshot: JobSnapshot },
    Removed { job_id: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Updated { job_id, .. } | JobEvent::Removed { job_id } => job_id,
        }
    }
}

/// Broadcast side of the progress feed. Publishing never waits on observers.
#[derive(Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        // An error only means nobody is listening right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone)]
pub enum FeedItem {
    Event(JobEvent),
    /// The observer fell behind and missed events; this is the full current list.
    Resync(Vec<JobSnapshot>),
}

/// One observer's view of the job table: the list at subscription time,
/// then every change after it.
pub struct EventFeed {
    pub jobs: Vec<JobSnapshot>,
    receiver: broadcast::Receiver<JobEvent>,
    manager: JobManager,
}

impl EventFeed {
    pub(crate) fn new(
        jobs: Vec<JobSnapshot>,
        receiver: broadcast::Receiver<JobEvent>,
        manager: JobManager,
    ) -> Self {
        Self {
            jobs,
            receiver,
            manager,
        }
    }

    /// Next change, or a full resync if events were dropped for this observer.
    pub async fn next(&mut self) -> Option<FeedItem> {
        match self.receiver.recv().await {
            Ok(event) => Some(FeedItem::Event(event)),
            Err(RecvError::Lagged(missed)) => {
                log::warn!("⚠️ [EVENTS] Observer lagged by {} events, resyncing", missed);
                Some(FeedItem::Resync(self.resync().await))
            }
            Err(RecvError::Closed) => None,
        }
    }

    pub async fn resync(&self) -> Vec<JobSnapshot> {
        self.manager.list_jobs().await
    }
}
