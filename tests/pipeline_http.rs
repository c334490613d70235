//! End-to-end jobs against a local HTTP server: page detection, scraping,
//! track fetching and both delivery modes.

mod common;

use std::io::Read;
use std::time::Duration;

use audio_downloader::{AppConfig, AppError, DownloadMode, JobManager, JobSnapshot, JobStatus};
use common::audio_server::{AudioServer, Route};

fn config(download_dir: &std::path::Path, base: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.download_dir = download_dir.to_path_buf();
    config.block_private_hosts = false;
    config.request_timeout_secs = 5;
    config.page_timeout_secs = 5;
    config.plyr_api_url = format!("{}api/getMp3Link", base);
    config
}

async fn wait_until(manager: &JobManager, id: &str, status: impl Fn(JobStatus) -> bool) -> JobSnapshot {
    for _ in 0..500 {
        let job = manager.get_job(id).await.unwrap();
        if status(job.status) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not settle");
}

#[tokio::test]
async fn simple_links_are_saved_to_disk() {
    let server = AudioServer::bind();
    let base = server.base_url().to_string();
    server.serve(vec![
        Route::html(
            "/book",
            r#"<html><body>
                <a href="/audio/01.mp3">Part One</a>
                <a href="audio/02.mp3">Part Two</a>
                <a href="/audio/missing.mp3">Lost Part</a>
                <a href="/about">About</a>
            </body></html>"#,
        ),
        Route::audio("/audio/01.mp3", vec![1u8; 4096]),
        Route::audio("/audio/02.mp3", vec![2u8; 2048]),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let manager = JobManager::from_config(&config(dir.path(), &base)).unwrap();
    let (id, _) = manager
        .create_job(&format!("{base}book"), DownloadMode::Server, None, 2, Some("Novel"))
        .await
        .unwrap();

    let job = wait_until(&manager, &id, |s| s.is_terminal()).await;
    assert_eq!(job.status, JobStatus::Completed, "{}", job.message);
    assert_eq!(job.message, "Downloaded 2 tracks successfully, 1 failed");
    assert_eq!(job.tracks.len(), 3);

    let result = job.result.unwrap();
    assert_eq!(result.tracks[2].status, audio_downloader::jobs::TrackStatus::Failed);
    assert!(result.tracks[2].error.as_deref().unwrap().contains("404"));

    let out = dir.path().join("Novel");
    assert_eq!(std::fs::read(out.join("001_Part-One.mp3")).unwrap(), vec![1u8; 4096]);
    assert_eq!(std::fs::read(out.join("002_Part-Two.mp3")).unwrap(), vec![2u8; 2048]);
    assert!(!out.join("003_Lost-Part.mp3").exists());
}

#[tokio::test]
async fn plyr_manifest_is_archived_for_the_browser() {
    let server = AudioServer::bind();
    let base = server.base_url().to_string();
    let page = format!(
        r#"<html><head><link rel="stylesheet" href="/css/plyr.css"></head><body>
            <audio id="player" controls></audio>
            <script>
            var tracks = [
                {{"track": 1, "name": "Welcome", "chapter_link_dropbox": "{base}audio/welcome.mp3", "chapter_id": "0",}},
                {{"track": 2, "name": "Chapter 1", "chapter_link_dropbox": "", "chapter_id": "7",}},
            ];
            </script>
        </body></html>"#
    );
    server.serve(vec![
        Route::html("/listen/galaxy-book", page),
        Route::audio("/audio/welcome.mp3", b"welcome-bytes".to_vec()),
        Route::audio("/audio/ch1.mp3", vec![9u8; 30_000]),
        Route::json(
            "/api/getMp3Link",
            format!(r#"{{"link_mp3": "{base}audio/ch1.mp3"}}"#),
        ),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let manager = JobManager::from_config(&config(dir.path(), &base)).unwrap();
    let (id, snapshot) = manager
        .create_job(&format!("{base}listen/galaxy-book"), DownloadMode::Browser, None, 3, None)
        .await
        .unwrap();
    assert_eq!(snapshot.download_name, "galaxy-book");

    let job = wait_until(&manager, &id, |s| s == JobStatus::Streaming || s.is_terminal()).await;
    assert_eq!(job.status, JobStatus::Streaming, "{}", job.message);
    assert_eq!(job.plugin, Some(audio_downloader::PluginKind::Plyr));

    let artifact = manager.take_artifact(&id).await.unwrap();
    assert_eq!(artifact.file_name, "galaxy-book.zip");
    assert_eq!(artifact.entries, 2);

    let mut archive = zip::ZipArchive::new(artifact.into_file()).unwrap();
    let mut welcome = String::new();
    archive
        .by_name("001_Welcome.mp3")
        .unwrap()
        .read_to_string(&mut welcome)
        .unwrap();
    assert_eq!(welcome, "welcome-bytes");
    assert_eq!(archive.by_name("002_Chapter-1.mp3").unwrap().size(), 30_000);

    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(matches!(manager.take_artifact(&id).await, Err(AppError::NotFound(_))));
    // nothing is written to the download directory in browser mode
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unusable_pages_end_in_error() {
    let server = AudioServer::bind();
    let base = server.base_url().to_string();
    server.serve(vec![Route::html("/plain", "<html><body><p>No audio here</p></body></html>")]);

    let dir = tempfile::tempdir().unwrap();
    let manager = JobManager::from_config(&config(dir.path(), &base)).unwrap();

    let (plain, _) = manager
        .create_job(&format!("{base}plain"), DownloadMode::Server, None, 1, None)
        .await
        .unwrap();
    let (missing, _) = manager
        .create_job(&format!("{base}gone"), DownloadMode::Browser, None, 1, None)
        .await
        .unwrap();

    let job = wait_until(&manager, &plain, |s| s.is_terminal()).await;
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(
        job.message,
        "Detection failed: Could not detect any audio player on this page"
    );

    let job = wait_until(&manager, &missing, |s| s.is_terminal()).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.message.starts_with("Could not load page"), "{}", job.message);
    assert!(job.message.contains("404"), "{}", job.message);
}
