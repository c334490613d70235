use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::{FetchTarget, FetchedPayload, FetchedTrack, Fetcher};
use crate::api::TrackInfo;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Shared HTTP client for page loads, player API calls and track bodies.
pub struct HttpPool {
    client: Client,
    retry: RetryPolicy,
}

impl HttpPool {
    pub fn new(max_connections: usize, timeout_seconds: u64) -> Result<Self> {
        let client = Self::builder(
            max_connections,
            Duration::from_secs(timeout_seconds),
            Duration::from_secs(15),
            DEFAULT_USER_AGENT,
        )
        .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut builder = Self::builder(
            crate::security::MAX_WORKERS,
            config.request_timeout(),
            config.connect_timeout(),
            &config.user_agent,
        );

        if let Some(proxy_url) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            log::info!("🌐 [HTTP] Using proxy {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts.max(1),
                backoff: Duration::from_millis(config.retry.backoff_ms),
            },
        })
    }

    fn builder(
        max_connections: usize,
        timeout: Duration,
        connect_timeout: Duration,
        user_agent: &str,
    ) -> ClientBuilder {
        ClientBuilder::new()
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    async fn fetch_with_retry(&self, url: &str, target: &FetchTarget) -> Result<FetchedTrack> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.try_fetch(url, target).await {
                Ok(fetched) => {
                    log::debug!("✅ [HTTP] {} ({} bytes) on attempt {}", url, fetched.bytes, attempt);
                    return Ok(fetched);
                }
                Err(e) if attempt < max_attempts => {
                    log::warn!("⚠️ [HTTP] Attempt {} of {} failed for {}: {}", attempt, max_attempts, url, e);
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Fetch(format!("No attempts made for {}", url)))
    }

    async fn try_fetch(&self, url: &str, target: &FetchTarget) -> Result<FetchedTrack> {
        let response = self
            .client
            .get(url)
            .header("Accept", "audio/webm,audio/*,*/*;q=0.9")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Fetch(format!("HTTP error: {}", response.status())));
        }

        match target {
            FetchTarget::Memory => {
                let data = read_body(response).await?;
                Ok(FetchedTrack {
                    bytes: data.len() as u64,
                    payload: FetchedPayload::Buffer(data),
                })
            }
            FetchTarget::File(path) => match write_body(response, path).await {
                Ok(bytes) => Ok(FetchedTrack {
                    bytes,
                    payload: FetchedPayload::File(path.clone()),
                }),
                Err(e) => {
                    if let Err(remove_err) = tokio::fs::remove_file(path).await {
                        if remove_err.kind() != std::io::ErrorKind::NotFound {
                            log::warn!("⚠️ [HTTP] Could not remove partial file {:?}: {}", path, remove_err);
                        }
                    }
                    Err(e)
                }
            },
        }
    }
}

async fn read_body(response: Response) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

async fn write_body(response: Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[async_trait::async_trait]
impl Fetcher for HttpPool {
    async fn fetch(&self, track: &TrackInfo, target: &FetchTarget) -> Result<FetchedTrack> {
        self.fetch_with_retry(&track.url, target).await
    }

    fn get_name(&self) -> &str {
        "http"
    }

    fn time_budget(&self, per_request: Duration) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        per_request * attempts + self.retry.backoff * (attempts - 1)
    }
}
