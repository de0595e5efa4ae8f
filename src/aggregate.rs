use indexmap::IndexMap;
use serde::Serialize;
use tracing::trace;
use url::Url;

use crate::signals::{Candidate, Dimensions};

const TRACKER_MARKERS: &[&str] = &["track", "analytics", "beacon", "pixel", "1x1"];
const AD_HOSTS: &[&str] = &[
    "doubleclick",
    "googleads",
    "googlesyndication",
    "adservice",
    "adnxs",
    "amazon-adsystem",
];

/// Minimum accepted size. Known sizes strictly below either edge are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThreshold {
    pub min_width: u32,
    pub min_height: u32,
}

impl SizeThreshold {
    /// Unknown sizes always pass.
    pub fn accepts(&self, dims: Option<Dimensions>) -> bool {
        match dims {
            Some(d) => d.width >= self.min_width && d.height >= self.min_height,
            None => true,
        }
    }
}

/// URL → last observed size, iterated in first-seen order.
///
/// A repeated URL keeps its original position while its size is overwritten
/// by the newer observation, unknown included.
#[derive(Debug, Default)]
pub struct CandidateSet {
    entries: IndexMap<String, Option<Dimensions>>,
    observed: usize,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, candidate: Candidate) {
        self.observed += 1;
        if let Some(prev) = self.entries.insert(candidate.url, candidate.dimensions) {
            if prev != candidate.dimensions {
                trace!("Size revised by {:?}: {:?} -> {:?}", candidate.signal, prev, candidate.dimensions);
            }
        }
    }

    /// Apply the size and tracker filters and emit the surviving URLs.
    pub fn finish(self, threshold: SizeThreshold) -> Aggregation {
        let mut stats = AggregateStats {
            observed: self.observed,
            unique: self.entries.len(),
            ..Default::default()
        };
        let mut urls = Vec::with_capacity(self.entries.len());
        for (url, dims) in self.entries {
            if !threshold.accepts(dims) {
                stats.filtered_by_size += 1;
                continue;
            }
            if is_tracker(&url) {
                stats.filtered_as_tracker += 1;
                continue;
            }
            urls.push(url);
        }
        stats.emitted = urls.len();
        Aggregation { urls, stats }
    }
}

impl Extend<Candidate> for CandidateSet {
    fn extend<I: IntoIterator<Item = Candidate>>(&mut self, iter: I) {
        for c in iter {
            self.insert(c);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Candidates fed in, duplicates included.
    pub observed: usize,
    pub unique: usize,
    pub filtered_by_size: usize,
    pub filtered_as_tracker: usize,
    pub emitted: usize,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Final candidate list; position + 1 is the download ordinal.
    pub urls: Vec<String>,
    pub stats: AggregateStats,
}

/// Fold a page's candidates (in sweep order) into the final ordered list.
pub fn aggregate<I>(candidates: I, threshold: SizeThreshold) -> Aggregation
where
    I: IntoIterator<Item = Candidate>,
{
    let mut set = CandidateSet::new();
    set.extend(candidates);
    set.finish(threshold)
}

/// Tracking pixels and ad-network assets: a path segment containing a marker
/// word, or a host belonging to an ad server.
pub fn is_tracker(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    if AD_HOSTS.iter().any(|h| host.contains(h)) {
        return true;
    }
    parsed
        .path_segments()
        .into_iter()
        .flatten()
        .map(|seg| seg.to_ascii_lowercase())
        .any(|seg| TRACKER_MARKERS.iter().any(|m| seg.contains(m)))
}
