use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Problems with the site list. Any of these aborts the run before the first site.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("input is missing the `{0}` column (expected: url, folder_name)")]
    MissingColumn(&'static str),
    #[error("row {row}: missing {field}")]
    MissingField { row: usize, field: &'static str },
    #[error("row {row}: `{url}` is not an absolute http(s) URL")]
    InvalidUrl { row: usize, url: String },
    #[error("no records found in input")]
    Empty,
}

/// Why a single download failed. Rendered into the failure record, never propagated.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download task aborted: {0}")]
    Aborted(String),
}
