pub mod players;
pub mod plyr;
pub mod simple_mp3;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::api::TrackInfo;
use crate::downloader::http_pool::HttpPool;
use crate::errors::{AppError, Result};

pub use players::{Detection, PlayerKind};

/// Track extraction strategies. Adding a site means adding a variant here and
/// a branch in [`WebTrackSource::scrape`]; the job core never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Direct media links in the page markup.
    SimpleMp3,
    /// Embedded player manifest, resolved through the player API.
    Plyr,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::SimpleMp3 => "simple_mp3",
            PluginKind::Plyr => "plyr",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PluginKind::SimpleMp3 => PlayerKind::SimpleMp3.info().name,
            PluginKind::Plyr => PlayerKind::Plyr.info().name,
        }
    }
}

impl FromStr for PluginKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "simple_mp3" => Ok(PluginKind::SimpleMp3),
            "plyr" => Ok(PluginKind::Plyr),
            other => Err(AppError::Validation(format!(
                "Unknown plugin: {}. Available plugins: simple_mp3, plyr",
                other
            ))),
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability the job core uses to turn a page URL into tracks.
///
/// `Detection` errors mean the page was reachable but held nothing usable;
/// transport failures come back as `Http`/`Network` errors. An empty track
/// list is a valid answer and left to the caller.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn detect(&self, url: &str) -> Result<PluginKind>;
    async fn scrape(&self, url: &str, plugin: PluginKind) -> Result<Vec<TrackInfo>>;
}

/// Track source that loads the page over HTTP and dispatches on [`PluginKind`].
pub struct WebTrackSource {
    http_pool: Arc<HttpPool>,
    page_timeout: Duration,
    plyr_api_url: String,
}

impl WebTrackSource {
    pub fn new(http_pool: Arc<HttpPool>, page_timeout: Duration, plyr_api_url: impl Into<String>) -> Self {
        Self {
            http_pool,
            page_timeout,
            plyr_api_url: plyr_api_url.into(),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        log::debug!("🌐 [SCRAPE] Fetching page: {}", url);
        let response = self
            .http_pool
            .get_client()
            .get(url)
            .timeout(self.page_timeout)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!("HTTP {}", response.status())));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl TrackSource for WebTrackSource {
    async fn detect(&self, url: &str) -> Result<PluginKind> {
        let html = self.fetch_page(url).await?;
        let detections = players::detect_players(&html)?;
        log::info!(
            "🔍 [SCRAPE] Players found on {}: {:?}",
            url,
            detections.iter().map(|d| d.player.info().name).collect::<Vec<_>>()
        );
        players::choose_plugin(&detections)
    }

    async fn scrape(&self, url: &str, plugin: PluginKind) -> Result<Vec<TrackInfo>> {
        let base = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
        let html = self.fetch_page(url).await?;

        let tracks = match plugin {
            PluginKind::SimpleMp3 => simple_mp3::extract_tracks(&html, &base)?,
            PluginKind::Plyr => {
                let entries = plyr::extract_manifest(&html)?;
                plyr::resolve_entries(&self.http_pool, &self.plyr_api_url, &base, entries).await
            }
        };

        log::info!("[SCRAPE] {} tracks found with {}", tracks.len(), plugin);
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_names_parse() {
        assert_eq!("simple".parse::<PluginKind>().unwrap(), PluginKind::SimpleMp3);
        assert_eq!("SIMPLE_MP3".parse::<PluginKind>().unwrap(), PluginKind::SimpleMp3);
        assert_eq!("plyr".parse::<PluginKind>().unwrap(), PluginKind::Plyr);
        assert!(matches!(
            "howler".parse::<PluginKind>(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn plugin_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PluginKind::SimpleMp3).unwrap(),
            "\"simple_mp3\""
        );
        assert_eq!(PluginKind::Plyr.to_string(), "plyr");
    }
}
