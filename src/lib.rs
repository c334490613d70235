pub mod api;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod jobs;
pub mod scraper;
pub mod security;
pub mod utils;

pub use api::{DownloadRequest, TrackInfo};
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use jobs::{
    DownloadMode, EventFeed, FeedItem, JobEvent, JobManager, JobSettings, JobSnapshot, JobStatus,
};
pub use scraper::{PluginKind, TrackSource, WebTrackSource};
