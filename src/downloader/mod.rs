pub mod archive;
pub mod http_pool;
pub mod pool;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::api::TrackInfo;
use crate::errors::Result;

pub use archive::{ArchiveHandle, ArchiveSpool, Artifact, EntryError};
pub use http_pool::HttpPool;
pub use pool::{PoolControl, PoolReport, TrackOutcome, TrackTask, WorkerPool};

/// Where a fetched body ends up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchTarget {
    /// Streamed to this path. A failed fetch leaves no file behind.
    File(PathBuf),
    /// Held in memory for the archive assembler.
    Memory,
}

#[derive(Debug)]
pub enum FetchedPayload {
    File(PathBuf),
    Buffer(Vec<u8>),
}

#[derive(Debug)]
pub struct FetchedTrack {
    pub bytes: u64,
    pub payload: FetchedPayload,
}

impl FetchedTrack {
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self.payload {
            FetchedPayload::Buffer(data) => Some(data),
            FetchedPayload::File(_) => None,
        }
    }
}

/// Retrieves one track body. Implementations must not leave partial output
/// at a `File` target when they fail.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, track: &TrackInfo, target: &FetchTarget) -> Result<FetchedTrack>;
    fn get_name(&self) -> &str;

    /// Wall-clock allowance for one `fetch` call when each request may take
    /// `per_request`. Fetchers that retry must cover every attempt.
    fn time_budget(&self, per_request: Duration) -> Duration {
        per_request
    }
}
