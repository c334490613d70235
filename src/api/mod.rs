// Boundary types shared by the job core, the track sources and any front end.

use serde::{Deserialize, Serialize};

use crate::jobs::DownloadMode;

/// One downloadable audio item discovered on a source page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    pub url: String,
    /// Position on the page as reported by the scraper, 1-based.
    pub track_num: Option<u32>,
}

impl TrackInfo {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            track_num: None,
        }
    }

    pub fn with_track_num(mut self, track_num: u32) -> Self {
        self.track_num = Some(track_num);
        self
    }
}

/// Submit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub download_mode: DownloadMode,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            plugin: None,
            workers: None,
            download_mode: DownloadMode::Server,
        }
    }

    pub fn with_mode(mut self, mode: DownloadMode) -> Self {
        self.download_mode = mode;
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }
}
