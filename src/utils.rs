use chrono::{DateTime, Utc};
use log::info;
use url::Url;
use crate::errors::Result;

/// Extensions kept as-is when naming downloaded tracks.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "opus", "webm", "wav", "flac"];

const MAX_SLUG_LEN: usize = 200;

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Drops everything but word characters, whitespace and dashes, then folds
/// whitespace/dash runs into a single dash.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
        } else if c.is_alphanumeric() || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        }
    }

    if pending_dash && !slug.is_empty() {
        slug.push('-');
    }

    slug.chars().take(MAX_SLUG_LEN).collect()
}

/// Name used for a job when the caller gave none: the last path segment,
/// else the host, else a timestamp.
pub fn generate_name_from_url(url: &Url, now: DateTime<Utc>) -> String {
    let last_segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            slugify(&decoded)
        });

    let name = match last_segment {
        Some(name) if !name.is_empty() => name,
        _ => url.host_str().unwrap_or_default().replace('.', "-"),
    };

    if name.chars().count() < 3 {
        format!("audio-download-{}", now.format("%Y%m%d-%H%M%S"))
    } else {
        name
    }
}

/// Extension for a track file, taken from its URL when it is a known audio type.
pub fn audio_extension(url: &str) -> &'static str {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_string());

    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension {
        Some(ext) => AUDIO_EXTENSIONS
            .iter()
            .find(|known| **known == ext)
            .copied()
            .unwrap_or("mp3"),
        None => "mp3",
    }
}

/// `NNN_<slug>.<ext>`; the index prefix keeps names unique and ordered.
pub fn track_file_name(index: usize, name: &str, url: &str) -> String {
    let slug = slugify(name);
    let slug = if slug.is_empty() { "track".to_string() } else { slug };
    format!("{:03}_{}.{}", index + 1, slug, audio_extension(url))
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Generates a unique ID for jobs
pub fn generate_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// First eight characters of a job id, used as a log prefix.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
