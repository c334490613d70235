use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use audio_downloader::downloader::HttpPool;
use audio_downloader::scraper::PlayerKind;
use audio_downloader::security::InputValidator;
use audio_downloader::utils::format_size;
use audio_downloader::{
    AppConfig, DownloadMode, DownloadRequest, FeedItem, JobEvent, JobManager, JobSnapshot,
    JobStatus, TrackSource, WebTrackSource,
};

#[derive(Parser)]
#[command(name = "audio-downloader", version, about = "Download every audio track linked from a web page")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Allow page URLs that point at local or private addresses
    #[arg(long, global = true)]
    allow_private_hosts: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape a page and download its tracks
    Download(DownloadArgs),
    /// Show which extraction strategy a page needs and what it finds
    Detect { url: String },
    /// List the audio players that detection recognises
    Players,
}

#[derive(Args)]
struct DownloadArgs {
    url: String,

    /// Name for the output folder or archive
    #[arg(short, long)]
    name: Option<String>,

    /// Force a strategy: simple_mp3 or plyr
    #[arg(short, long)]
    plugin: Option<String>,

    /// Concurrent downloads (1-20)
    #[arg(short, long)]
    workers: Option<usize>,

    /// server writes tracks to the download directory, browser builds a zip
    #[arg(short, long, default_value = "server")]
    mode: String,

    /// Where to write the zip in browser mode
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the configured download directory
    #[arg(long)]
    download_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => match AppConfig::load() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                config
            }
            Err(e) => {
                log::error!("Failed to load configuration: {}", e);
                AppConfig::default()
            }
        },
    };
    if cli.allow_private_hosts {
        config.block_private_hosts = false;
    }

    match cli.command {
        Command::Players => list_players(),
        Command::Detect { url } => detect(&config, &url).await,
        Command::Download(args) => download(config, args).await,
    }
}

fn list_players() -> anyhow::Result<()> {
    for player in PlayerKind::ALL {
        let info = player.info();
        let support = match player.plugin() {
            Some(plugin) => format!("supported ({})", plugin),
            None => "not supported".to_string(),
        };
        println!("{} - {} [{}]", info.name, info.description, support);
        for line in info.characteristics {
            println!("    • {}", line);
        }
    }
    Ok(())
}

async fn detect(config: &AppConfig, url: &str) -> anyhow::Result<()> {
    let url = InputValidator::new(config.block_private_hosts).validate_url(url)?;
    let http_pool = Arc::new(HttpPool::from_config(config)?);
    let source = WebTrackSource::new(http_pool, config.page_timeout(), config.plyr_api_url.clone());

    let plugin = source.detect(url.as_str()).await?;
    println!("Strategy: {} ({})", plugin.display_name(), plugin);

    let tracks = source.scrape(url.as_str(), plugin).await?;
    println!("Tracks found: {}", tracks.len());
    for (i, track) in tracks.iter().enumerate() {
        println!("  {:>3}. {} <{}>", i + 1, track.name, track.url);
    }
    Ok(())
}

async fn download(mut config: AppConfig, args: DownloadArgs) -> anyhow::Result<()> {
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
    }
    let mode: DownloadMode = args.mode.parse()?;

    let manager = JobManager::from_config(&config)?;
    manager.start_cleanup();
    let mut feed = manager.subscribe().await;

    let mut request = DownloadRequest::new(args.url).with_mode(mode);
    request.name = args.name;
    request.plugin = args.plugin;
    request.workers = args.workers;

    let job = manager.submit(request).await?;
    let job_id = job.id.clone();
    info!("Started job {} as '{}'", job_id, job.download_name);

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(job.message.clone());

    let mut latest = job;
    let mut interrupted = false;

    while !(latest.status.is_terminal() || latest.status == JobStatus::Streaming) {
        tokio::select! {
            item = feed.next() => {
                let update = match item {
                    Some(FeedItem::Event(event)) if event.job_id() != job_id => None,
                    Some(FeedItem::Event(JobEvent::Updated { snapshot, .. })) => Some(snapshot),
                    Some(FeedItem::Event(JobEvent::Removed { .. })) => bail!("Job was removed before it finished"),
                    Some(FeedItem::Resync(jobs)) => jobs.into_iter().find(|j| j.id == job_id),
                    None => bail!("Job feed closed unexpectedly"),
                };
                if let Some(snapshot) = update {
                    render(&bar, &snapshot);
                    latest = snapshot;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                bar.println("Cancelling after in-flight tracks finish...");
                manager.cancel_job(&job_id).await?;
            }
        }
    }

    if latest.status == JobStatus::Streaming {
        let artifact = manager.take_artifact(&job_id).await?;
        let path = args
            .output
            .unwrap_or_else(|| PathBuf::from(&artifact.file_name));
        let written = artifact
            .persist(&path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        latest = manager.get_job(&job_id).await?;
        bar.finish_with_message(format!("Saved {} ({})", path.display(), format_size(written)));
    } else {
        bar.finish_with_message(latest.message.clone());
    }

    manager.shutdown().await;
    report(&latest);

    match latest.status {
        JobStatus::Completed => Ok(()),
        JobStatus::Cancelled => bail!("Download cancelled"),
        _ => bail!("{}", latest.message),
    }
}

fn render(bar: &ProgressBar, job: &JobSnapshot) {
    if job.progress.total > 0 {
        bar.set_length(job.progress.total as u64);
        bar.set_position(job.progress.accounted() as u64);
    }
    bar.set_message(job.message.clone());
    bar.tick();
}

fn report(job: &JobSnapshot) {
    let Some(result) = &job.result else { return };
    println!(
        "{}: {} of {} tracks downloaded, {} failed",
        job.download_name, result.successful, result.total, result.failed
    );
    if let Some(dir) = &result.output_dir {
        println!("Saved to {}", dir.display());
    }
    for track in result.tracks.iter().filter(|t| t.error.is_some()) {
        println!(
            "  ✗ {} ({})",
            track.name,
            track.error.as_deref().unwrap_or_default()
        );
    }
}
