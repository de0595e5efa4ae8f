use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HarvestConfig;
use crate::error::DownloadError;
use crate::naming;

const ACCEPT_IMAGES: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// A cookie the page session holds for the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// One planned fetch. `ordinal` is the 1-based position in the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub ordinal: usize,
    pub destination: PathBuf,
}

impl DownloadTask {
    pub fn plan(urls: &[String], out_dir: &Path) -> Vec<DownloadTask> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| DownloadTask {
                url: url.clone(),
                ordinal: i + 1,
                destination: out_dir.join(naming::task_filename(url, i + 1)),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DownloadResult {
    Success { url: String, filename: String },
    Failure { url: String, error: String },
}

impl DownloadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadResult::Success { .. })
    }
}

/// Headers shared by every fetch for one site.
#[derive(Debug, Clone, Default)]
struct SiteHeaders {
    referer: Option<HeaderValue>,
    cookie: Option<HeaderValue>,
}

impl SiteHeaders {
    fn new(page: &Url, cookies: &[Cookie]) -> Self {
        let origin = page.origin();
        let referer = if origin.is_tuple() {
            HeaderValue::from_str(&format!("{}/", origin.ascii_serialization())).ok()
        } else {
            None
        };
        let cookie = if cookies.is_empty() {
            None
        } else {
            let joined = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            match HeaderValue::from_str(&joined) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Dropping cookie header for {}: {}", page, e);
                    None
                }
            }
        };
        Self { referer, cookie }
    }
}

/// Bounded-parallel fetch-and-store for one site's candidate list.
pub struct Downloader {
    client: Client,
    concurrency: usize,
    timeout: Duration,
}

impl Downloader {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_IMAGES));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));

        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.download_timeout());
        builder = match &config.proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str()).context("Invalid proxy URL")?),
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build().context("Failed to build HTTP client")?,
            concurrency: config.max_concurrent_downloads.max(1),
            timeout: config.download_timeout(),
        })
    }

    /// Download every URL into `out_dir`, at most `concurrency` at a time.
    /// Returns one result per URL, in list order. Never fails as a whole.
    pub async fn download_all(
        &self,
        urls: &[String],
        out_dir: &Path,
        page: &Url,
        cookies: &[Cookie],
    ) -> Vec<DownloadResult> {
        let tasks = DownloadTask::plan(urls, out_dir);
        let headers = SiteHeaders::new(page, cookies);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let pb = ProgressBar::new(tasks.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        // Permits are taken here, in list order, before each task is spawned.
        let mut running: Vec<(String, Result<JoinHandle<DownloadResult>, DownloadError>)> =
            Vec::with_capacity(tasks.len());
        for task in tasks {
            let url = task.url.clone();
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    running.push((url, Err(DownloadError::Aborted(e.to_string()))));
                    continue;
                }
            };
            let client = self.client.clone();
            let headers = headers.clone();
            let timeout = self.timeout;
            let pb = pb.clone();

            let handle = tokio::spawn(async move {
                let result = run_task(&client, &task, &headers, timeout).await;
                drop(permit);
                pb.inc(1);
                result
            });
            running.push((url, Ok(handle)));
        }

        let mut results = Vec::with_capacity(running.len());
        for (url, handle) in running {
            let result = match handle {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => DownloadResult::Failure {
                        url,
                        error: DownloadError::Aborted(e.to_string()).to_string(),
                    },
                },
                Err(e) => DownloadResult::Failure { url, error: e.to_string() },
            };
            results.push(result);
        }

        pb.finish_and_clear();
        let ok = results.iter().filter(|r| r.is_success()).count();
        info!("Downloaded {}/{} into {}", ok, results.len(), out_dir.display());
        results
    }
}

async fn run_task(
    client: &Client,
    task: &DownloadTask,
    headers: &SiteHeaders,
    timeout: Duration,
) -> DownloadResult {
    match fetch_to_file(client, task, headers, timeout).await {
        Ok(path) => {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!("Saved {} -> {}", task.url, filename);
            DownloadResult::Success {
                url: task.url.clone(),
                filename,
            }
        }
        Err(e) => {
            debug!("Failed {}: {}", task.url, e);
            DownloadResult::Failure {
                url: task.url.clone(),
                error: e.to_string(),
            }
        }
    }
}

/// Fetch one URL and stream its body to disk. Returns the path written.
async fn fetch_to_file(
    client: &Client,
    task: &DownloadTask,
    headers: &SiteHeaders,
    timeout: Duration,
) -> Result<PathBuf, DownloadError> {
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            DownloadError::Timeout(timeout)
        } else {
            DownloadError::Request(e)
        }
    };

    let mut request = client.get(&task.url);
    if let Some(referer) = &headers.referer {
        request = request.header(header::REFERER, referer.clone());
    }
    if let Some(cookie) = &headers.cookie {
        request = request.header(header::COOKIE, cookie.clone());
    }

    let response = request.send().await.map_err(classify)?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status(status));
    }

    let destination = with_inferred_extension(&task.destination, &response);
    if let Some(dir) = destination.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| DownloadError::Io { path: dir.to_path_buf(), source })?;
    }

    let io_err = |source| DownloadError::Io { path: destination.clone(), source };
    let mut file = tokio::fs::File::create(&destination).await.map_err(io_err)?;

    let mut stream = response.bytes_stream();
    let written: Result<(), DownloadError> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(rm) = tokio::fs::remove_file(&destination).await {
            debug!("Could not remove partial {}: {}", destination.display(), rm);
        }
        return Err(e);
    }
    Ok(destination)
}

/// Append an extension from the response content type when the planned name has none.
fn with_inferred_extension(planned: &Path, response: &reqwest::Response) -> PathBuf {
    let name = match planned.file_name().and_then(|n| n.to_str()) {
        Some(n) if !naming::has_extension(n) => n,
        _ => return planned.to_path_buf(),
    };
    let ext = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(naming::extension_for_content_type);
    match ext {
        Some(ext) => planned.with_file_name(format!("{}.{}", name, ext)),
        None => planned.to_path_buf(),
    }
}
