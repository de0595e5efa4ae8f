use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::aggregate::AggregateStats;
use crate::config::HarvestConfig;
use crate::download::DownloadResult;
use crate::signals::SignalStats;

pub const SITE_SUMMARY_FILE: &str = "summary.json";
pub const RUN_SUMMARY_FILE: &str = "overall-summary.json";

// ── Per site ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub url: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub target: String,
    pub folder_name: String,
    pub timestamp: DateTime<Utc>,
    pub resolution_filter: String,
    /// Candidates that reached the downloader; `downloaded + failed`.
    pub total_candidates: usize,
    pub filtered_by_size: usize,
    pub filtered_as_tracker: usize,
    pub signals: SignalStats,
    pub downloaded: usize,
    pub failed: usize,
    pub files: Vec<FileEntry>,
    pub failures: Vec<FailureEntry>,
}

impl SiteSummary {
    pub fn new(
        target: &Url,
        folder_name: &str,
        config: &HarvestConfig,
        signals: SignalStats,
        stats: &AggregateStats,
        results: &[DownloadResult],
    ) -> Self {
        let mut files = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                DownloadResult::Success { url, filename } => files.push(FileEntry {
                    url: url.clone(),
                    file: filename.clone(),
                }),
                DownloadResult::Failure { url, error } => failures.push(FailureEntry {
                    url: url.clone(),
                    error: error.clone(),
                }),
            }
        }

        Self {
            target: target.to_string(),
            folder_name: folder_name.to_string(),
            timestamp: Utc::now(),
            resolution_filter: config.resolution_filter(),
            total_candidates: results.len(),
            filtered_by_size: stats.filtered_by_size,
            filtered_as_tracker: stats.filtered_as_tracker,
            signals,
            downloaded: files.len(),
            failed: failures.len(),
            files,
            failures,
        }
    }

    /// Write `summary.json` into `dir`, replacing any previous one.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        write_json(&dir.join(SITE_SUMMARY_FILE), self)
    }
}

// ── Per run ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteOutcome {
    pub folder_name: String,
    pub target: String,
    pub success: bool,
    pub downloaded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SiteOutcome {
    pub fn failed(folder_name: &str, target: &Url, message: impl Into<String>) -> Self {
        Self {
            folder_name: folder_name.to_string(),
            target: target.to_string(),
            success: false,
            downloaded: 0,
            failed: 0,
            message: Some(message.into()),
        }
    }

    pub fn completed(folder_name: &str, target: &Url, summary: &SiteSummary) -> Self {
        Self {
            folder_name: folder_name.to_string(),
            target: target.to_string(),
            success: true,
            downloaded: summary.downloaded,
            failed: summary.failed,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub resolution_filter: String,
    pub total_sites: usize,
    pub successful_sites: usize,
    pub failed_sites: usize,
    pub total_images_downloaded: usize,
    pub per_site_results: Vec<SiteOutcome>,
}

impl RunSummary {
    pub fn new(config: &HarvestConfig, outcomes: Vec<SiteOutcome>) -> Self {
        let successful = outcomes.iter().filter(|o| o.success).count();
        Self {
            timestamp: Utc::now(),
            resolution_filter: config.resolution_filter(),
            total_sites: outcomes.len(),
            successful_sites: successful,
            failed_sites: outcomes.len() - successful,
            total_images_downloaded: outcomes.iter().map(|o| o.downloaded).sum(),
            per_site_results: outcomes,
        }
    }

    pub fn write(&self, base: &Path) -> Result<PathBuf> {
        write_json(&base.join(RUN_SUMMARY_FILE), self)
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Sites:      {} total, {} ok, {} failed", self.total_sites, self.successful_sites, self.failed_sites);
        println!("Downloaded: {} images", self.total_images_downloaded);
        println!("Filter:     {}", self.resolution_filter);

        let (ok, failed): (Vec<_>, Vec<_>) = self.per_site_results.iter().partition(|o| o.success);
        if !ok.is_empty() {
            println!("\n--- Successful ---");
            for o in ok {
                println!("  {}: {} downloaded, {} failed", o.folder_name, o.downloaded, o.failed);
            }
        }
        if !failed.is_empty() {
            println!("\n--- Failed ---");
            for o in failed {
                println!("  {}: {}", o.folder_name, o.message.as_deref().unwrap_or("unknown error"));
            }
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize summary")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(path.to_path_buf())
}
