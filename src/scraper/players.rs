use serde::Serialize;

use super::{simple_mp3, PluginKind};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    Plyr,
    Howler,
    MediaElement,
    VideoJs,
    JwPlayer,
    Html5Audio,
    SoundCloud,
    Spotify,
    SimpleMp3,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub characteristics: &'static [&'static str],
}

/// One player recognised on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub player: PlayerKind,
}

const MEDIAELEMENT_MARKERS: &[&str] = &[
    "mediaelement",
    "mejsplayer",
    "mejs",
    "mejs-",
    "wp-mediaelement",
    "mediaelement-and-player",
    "mediaelementplayer",
    "mejs__",
];

impl PlayerKind {
    pub const ALL: [PlayerKind; 9] = [
        PlayerKind::Plyr,
        PlayerKind::Howler,
        PlayerKind::MediaElement,
        PlayerKind::VideoJs,
        PlayerKind::JwPlayer,
        PlayerKind::Html5Audio,
        PlayerKind::SoundCloud,
        PlayerKind::Spotify,
        PlayerKind::SimpleMp3,
    ];

    /// The strategy able to scrape this player, if there is one.
    pub fn plugin(self) -> Option<PluginKind> {
        match self {
            PlayerKind::Plyr => Some(PluginKind::Plyr),
            PlayerKind::SimpleMp3 => Some(PluginKind::SimpleMp3),
            _ => None,
        }
    }

    pub fn info(self) -> PlayerInfo {
        match self {
            PlayerKind::Plyr => PlayerInfo {
                name: "Plyr",
                description: "Modern, accessible HTML5 media player",
                characteristics: &[
                    "Often used for audiobooks and podcasts",
                    "Supports playlists and chapters",
                    "May use APIs to load track URLs",
                ],
            },
            PlayerKind::SimpleMp3 => PlayerInfo {
                name: "Simple MP3 Links",
                description: "Direct MP3 file links on the page",
                characteristics: &[
                    "Direct download links",
                    "No JavaScript required",
                    "Preserves original filenames",
                ],
            },
            PlayerKind::Howler => PlayerInfo {
                name: "Howler.js",
                description: "JavaScript audio library for the modern web",
                characteristics: &[
                    "Used by music streaming sites",
                    "Game development platforms",
                    "Often has custom player UI",
                ],
            },
            PlayerKind::MediaElement => PlayerInfo {
                name: "MediaElement.js",
                description: "HTML5 audio and video player",
                characteristics: &[
                    "WordPress default player",
                    "Educational platforms",
                    "Supports multiple formats",
                ],
            },
            PlayerKind::VideoJs => PlayerInfo {
                name: "Video.js",
                description: "Open source HTML5 video player",
                characteristics: &[
                    "Used by video platforms",
                    "Also handles audio content",
                    "Highly customizable",
                ],
            },
            PlayerKind::JwPlayer => PlayerInfo {
                name: "JW Player",
                description: "Commercial media player",
                characteristics: &["Enterprise platforms", "DRM protection common", "Complex API"],
            },
            PlayerKind::Html5Audio => PlayerInfo {
                name: "HTML5 Audio",
                description: "Native HTML5 <audio> elements",
                characteristics: &[
                    "Basic browser player",
                    "No special library needed",
                    "Simple implementation",
                ],
            },
            PlayerKind::SoundCloud => PlayerInfo {
                name: "SoundCloud",
                description: "SoundCloud embedded player",
                characteristics: &["Embedded iframe player", "Requires API access", "Stream protection"],
            },
            PlayerKind::Spotify => PlayerInfo {
                name: "Spotify",
                description: "Spotify embedded player",
                characteristics: &[
                    "Embedded iframe player",
                    "Requires authentication",
                    "DRM protected",
                ],
            },
        }
    }

    fn found_in(self, lowered: &str) -> bool {
        match self {
            PlayerKind::Plyr => lowered.contains("plyr"),
            PlayerKind::Howler => lowered.contains("howler") || lowered.contains("howl("),
            PlayerKind::MediaElement => MEDIAELEMENT_MARKERS.iter().any(|m| lowered.contains(m)),
            PlayerKind::VideoJs => lowered.contains("video-js") || lowered.contains("videojs"),
            PlayerKind::JwPlayer => lowered.contains("jwplayer") || lowered.contains("jwplatform"),
            PlayerKind::Html5Audio => lowered.contains("<audio"),
            PlayerKind::SoundCloud => {
                lowered.contains("soundcloud.com") || lowered.contains("soundcloud-widget")
            }
            PlayerKind::Spotify => lowered.contains("spotify.com/embed"),
            // needs the original markup, handled in detect_players
            PlayerKind::SimpleMp3 => false,
        }
    }
}

/// Every known player fingerprint present in the page, in priority order.
pub fn detect_players(html: &str) -> Result<Vec<Detection>> {
    let lowered = html.to_lowercase();
    let mut detections: Vec<Detection> = PlayerKind::ALL
        .iter()
        .copied()
        .filter(|player| player.found_in(&lowered))
        .map(|player| Detection { player })
        .collect();

    if simple_mp3::has_mp3_links(html)? {
        detections.push(Detection {
            player: PlayerKind::SimpleMp3,
        });
    }

    Ok(detections)
}

/// First supported detection wins.
pub fn choose_plugin(detections: &[Detection]) -> Result<PluginKind> {
    if detections.is_empty() {
        return Err(AppError::Detection(
            "Could not detect any audio player on this page".to_string(),
        ));
    }

    if let Some(plugin) = detections.iter().find_map(|d| d.player.plugin()) {
        return Ok(plugin);
    }

    let names: Vec<&str> = detections.iter().map(|d| d.player.info().name).collect();
    Err(AppError::Detection(format!(
        "Detected unsupported players: {}",
        names.join(", ")
    )))
}
