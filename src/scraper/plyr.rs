use futures_util::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

use crate::api::TrackInfo;
use crate::downloader::http_pool::HttpPool;
use crate::errors::{AppError, Result};

const TRACKS_ARRAY_PATTERN: &str =
    r"(?is)(?:var\s+)?tracks\s*=\s*(\[[^\]]*(?:\[[^\]]*\][^\]]*)*\])\s*[,;]";
const MY_POST_PATTERN: &str = r#"myPost\(['"]([^'"]+)['"]\)"#;
const SOURCE_PATTERN: &str = r#"source\s*:\s*['"]([^'"]+\.mp3)['"]"#;
const TRAILING_COMMA_PATTERN: &str = r",(\s*[}\]])";

/// Concurrent chapter lookups against the player API.
const API_CONCURRENCY: usize = 4;
const API_SERVER_TYPE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// The manifest already carries a media URL.
    Direct(String),
    /// Media URL has to be requested by chapter id.
    Api(i64),
}

/// One track declared by the embedded player configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub track_num: Option<u32>,
    pub source: EntrySource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkRequest {
    chapter_id: i64,
    server_type: u8,
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    link_mp3: Option<String>,
}

/// Reads the `tracks = [...]` manifest, then `myPost('…')` calls, then
/// `source: '….mp3'` player options.
pub fn extract_manifest(html: &str) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();

    let tracks_array = Regex::new(TRACKS_ARRAY_PATTERN)?;
    if let Some(raw) = tracks_array.captures(html).and_then(|c| c.get(1)) {
        match parse_tracks_array(raw.as_str()) {
            Ok(parsed) => entries.extend(parsed),
            Err(e) => log::warn!("⚠️ [PLYR] Could not parse tracks array: {}", e),
        }
    }

    let my_post = Regex::new(MY_POST_PATTERN)?;
    let posted = my_post
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|url| url.contains(".mp3") || url.contains("dropbox"));
    for (i, url) in posted.enumerate() {
        entries.push(ManifestEntry {
            name: format!("Chapter {}", i + 1),
            track_num: None,
            source: EntrySource::Direct(url),
        });
    }

    let source = Regex::new(SOURCE_PATTERN)?;
    let sources = source
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));
    for (i, url) in sources.enumerate() {
        entries.push(ManifestEntry {
            name: format!("Track {}", i + 1),
            track_num: None,
            source: EntrySource::Direct(url),
        });
    }

    log::info!("[PLYR] Manifest holds {} entries", entries.len());
    Ok(entries)
}

fn parse_tracks_array(raw: &str) -> Result<Vec<ManifestEntry>> {
    let trailing_comma = Regex::new(TRAILING_COMMA_PATTERN)?;
    let cleaned = trailing_comma.replace_all(raw, "$1");
    let items: Vec<Value> = serde_json::from_str(&cleaned)?;

    let mut entries = Vec::new();
    for item in items {
        let name = first_string(&item, &["name", "title", "chapter"])
            .unwrap_or_else(|| "Unknown".to_string());
        let track_num = first_number(&item, &["track_num", "track"])
            .and_then(|n| u32::try_from(n).ok())
            .or_else(|| u32::try_from(entries.len() + 1).ok());

        let direct = item
            .get("chapter_link_dropbox")
            .and_then(Value::as_str)
            .filter(|link| link.starts_with("http"));

        let source = match direct {
            Some(link) => EntrySource::Direct(link.to_string()),
            None => match first_number(&item, &["chapter_id", "chapterid", "id"]) {
                Some(id) if id != 0 => EntrySource::Api(id),
                _ => {
                    log::debug!("[PLYR] Entry '{}' has neither link nor chapter id", name);
                    continue;
                }
            },
        };

        entries.push(ManifestEntry {
            name,
            track_num,
            source,
        });
    }
    Ok(entries)
}

fn first_string(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match item.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_number(item: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match item.get(*key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Turns manifest entries into downloadable tracks. Entries whose URL can't
/// be resolved are dropped, the rest keep manifest order.
pub async fn resolve_entries(
    http_pool: &HttpPool,
    api_url: &str,
    base: &Url,
    entries: Vec<ManifestEntry>,
) -> Vec<TrackInfo> {
    let resolved: Vec<Option<TrackInfo>> = stream::iter(entries)
        .map(|entry| async move {
            let link = match &entry.source {
                EntrySource::Direct(link) => Some(link.clone()),
                EntrySource::Api(chapter_id) => {
                    match fetch_chapter_link(http_pool, api_url, *chapter_id).await {
                        Ok(link) => Some(link),
                        Err(e) => {
                            log::warn!("⚠️ [PLYR] No URL for '{}': {}", entry.name, e);
                            None
                        }
                    }
                }
            }?;

            let url = base.join(&link).ok()?;
            let mut track = TrackInfo::new(entry.name, url.to_string());
            track.track_num = entry.track_num;
            Some(track)
        })
        .buffered(API_CONCURRENCY)
        .collect()
        .await;

    let mut seen = HashSet::new();
    let mut tracks = Vec::new();
    for track in resolved.into_iter().flatten() {
        if !seen.insert(track.url.clone()) {
            continue;
        }
        let position = tracks.len() as u32 + 1;
        tracks.push(match track.track_num {
            Some(_) => track,
            None => track.with_track_num(position),
        });
    }
    tracks
}

async fn fetch_chapter_link(http_pool: &HttpPool, api_url: &str, chapter_id: i64) -> Result<String> {
    let request = LinkRequest {
        chapter_id,
        server_type: API_SERVER_TYPE,
    };

    let response = http_pool
        .get_client()
        .post(api_url)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::Network(format!(
            "Player API returned {} for chapter {}",
            response.status(),
            chapter_id
        )));
    }

    let body: LinkResponse = response.json().await?;
    body.link_mp3
        .filter(|link| !link.is_empty())
        .ok_or_else(|| AppError::Detection(format!("Player API has no link for chapter {}", chapter_id)))
}
