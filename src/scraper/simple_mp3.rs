use regex::Regex;
use std::collections::HashSet;
use url::Url;

use crate::api::TrackInfo;
use crate::errors::Result;

const ANCHOR_PATTERN: &str = r"(?is)<a\b([^>]*)>(.*?)</a>";
const TAG_WITH_TEXT_PATTERN: &str = r"(?is)<[a-z][a-z0-9]*\b([^>]*)>([^<]*)";
const HREF_PATTERN: &str = r#"(?i)(?:^|\s)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#;
const DATA_URL_PATTERN: &str = r#"(?i)(?:^|\s)data-url\s*=\s*(?:"([^"]*)"|'([^']*)')"#;
const INNER_TAG_PATTERN: &str = r"(?s)<[^>]*>";

/// A raw link as it appears in the markup, with the element's text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawLink {
    href: String,
    text: String,
}

pub fn has_mp3_links(html: &str) -> Result<bool> {
    Ok(!find_links(html)?.is_empty())
}

/// `<a href="….mp3">` links first, then any element carrying
/// `data-url="….mp3"`. Relative links resolve against `base`; duplicates
/// keep their first position.
pub fn extract_tracks(html: &str, base: &Url) -> Result<Vec<TrackInfo>> {
    let mut seen = HashSet::new();
    let mut tracks = Vec::new();

    for link in find_links(html)? {
        let resolved = match base.join(&link.href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                log::warn!("⚠️ [SIMPLE] Skipping unparsable link {}: {}", link.href, e);
                continue;
            }
        };

        if !seen.insert(resolved.clone()) {
            continue;
        }

        let track_num = tracks.len() as u32 + 1;
        let name = if link.text.is_empty() {
            format!("Track {}", track_num)
        } else {
            link.text
        };
        log::debug!("🎵 [SIMPLE] Found MP3 #{}: {}", track_num, resolved);
        tracks.push(TrackInfo::new(name, resolved).with_track_num(track_num));
    }

    log::info!("[SIMPLE] Found {} MP3 files", tracks.len());
    Ok(tracks)
}

fn find_links(html: &str) -> Result<Vec<RawLink>> {
    let anchor = Regex::new(ANCHOR_PATTERN)?;
    let tag_with_text = Regex::new(TAG_WITH_TEXT_PATTERN)?;
    let href = Regex::new(HREF_PATTERN)?;
    let data_url = Regex::new(DATA_URL_PATTERN)?;
    let inner_tag = Regex::new(INNER_TAG_PATTERN)?;

    let mut links = Vec::new();

    for captures in anchor.captures_iter(html) {
        let attrs = captures.get(1).map_or("", |m| m.as_str());
        if let Some(value) = attribute(&href, attrs).filter(|v| is_mp3(v)) {
            let inner = captures.get(2).map_or("", |m| m.as_str());
            links.push(RawLink {
                href: value,
                text: clean_text(&inner_tag.replace_all(inner, " ")),
            });
        }
    }

    for captures in tag_with_text.captures_iter(html) {
        let attrs = captures.get(1).map_or("", |m| m.as_str());
        if let Some(value) = attribute(&data_url, attrs).filter(|v| is_mp3(v)) {
            let text = captures.get(2).map_or("", |m| m.as_str());
            links.push(RawLink {
                href: value,
                text: clean_text(text),
            });
        }
    }

    Ok(links)
}

fn attribute(pattern: &Regex, attrs: &str) -> Option<String> {
    pattern.captures(attrs).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| decode_entities(m.as_str().trim()))
    })
}

fn is_mp3(value: &str) -> bool {
    value.to_ascii_lowercase().ends_with(".mp3")
}

fn clean_text(text: &str) -> String {
    decode_entities(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
