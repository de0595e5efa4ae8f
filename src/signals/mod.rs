pub mod network;
pub mod structured;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

static CSS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(\s*['"]?(.*?)['"]?\s*\)"#).unwrap());

/// Heuristic through which a candidate was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalKind {
    DomAttribute,
    Srcset,
    Background,
    MetaTag,
    StructuredData,
    NetworkObservation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One discovered media URL, already absolute. `dimensions` is `None` when the
/// signal carries no size information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub dimensions: Option<Dimensions>,
    pub signal: SignalKind,
}

// ── Raw records produced by the in-page extraction pass ──

/// An attribute value read off an `<img>` or `<source>` element, with the
/// element's measured size (0 when unmeasured).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ElementObservation {
    pub attr: String,
    pub value: String,
    pub width: u32,
    pub height: u32,
}

/// A style declaration that may carry `url(...)` terms, with the rendered box size.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StyleObservation {
    pub style: String,
    pub width: u32,
    pub height: u32,
    pub computed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetaObservation {
    pub selector: String,
    pub value: String,
}

/// A category that threw inside the page. The category's partial output is kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionFault {
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawExtraction {
    pub base_uri: Option<String>,
    pub title: Option<String>,
    pub images: Vec<ElementObservation>,
    pub sources: Vec<ElementObservation>,
    pub backgrounds: Vec<StyleObservation>,
    pub meta: Vec<MetaObservation>,
    pub structured_data: Vec<String>,
    pub faults: Vec<ExtractionFault>,
}

/// Everything the renderer learned about one page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Where the page was navigated to; used as base when the page reports none.
    pub target: Url,
    pub extraction: RawExtraction,
    /// Classified media URLs from the network observer, in arrival order.
    pub network: Vec<String>,
}

impl PageSnapshot {
    pub fn base_url(&self) -> Url {
        self.extraction
            .base_uri
            .as_deref()
            .and_then(|b| Url::parse(b).ok())
            .unwrap_or_else(|| self.target.clone())
    }
}

/// Raw observation counts, for reporting only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalStats {
    pub dom_attribute: usize,
    pub srcset: usize,
    pub background: usize,
    pub meta_tag: usize,
    pub structured_data: usize,
    pub network_observation: usize,
    /// Observations that did not normalize to an http(s) URL.
    pub rejected: usize,
    /// Categories or blocks that faulted during extraction.
    pub faults: usize,
}

impl SignalStats {
    fn bump(&mut self, kind: SignalKind) {
        match kind {
            SignalKind::DomAttribute => self.dom_attribute += 1,
            SignalKind::Srcset => self.srcset += 1,
            SignalKind::Background => self.background += 1,
            SignalKind::MetaTag => self.meta_tag += 1,
            SignalKind::StructuredData => self.structured_data += 1,
            SignalKind::NetworkObservation => self.network_observation += 1,
        }
    }
}

/// Turn one raw URL string into a candidate, or nothing if it is empty, a
/// `data:` URI, cannot be made absolute, or is not http(s).
pub fn normalize(
    base: &Url,
    raw: &str,
    dimensions: Option<Dimensions>,
    signal: SignalKind,
) -> Option<Candidate> {
    let cleaned = raw.trim();
    if cleaned.is_empty() || cleaned == "about:blank" || starts_with_ignore_case(cleaned, "data:") {
        return None;
    }
    let absolute = base.join(cleaned).ok()?;
    if !matches!(absolute.scheme(), "http" | "https") {
        return None;
    }
    Some(Candidate {
        url: absolute.to_string(),
        dimensions,
        signal,
    })
}

/// Split a responsive source set into its URLs, dropping width/density
/// descriptors. URLs are whitespace-delimited runs, so a `data:` URI with
/// embedded commas stays in one piece.
pub fn split_srcset(srcset: &str) -> Vec<&str> {
    let mut urls = Vec::new();
    let mut rest = srcset;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let token = &rest[..end];
        rest = &rest[end..];

        let url = token.trim_end_matches(',');
        if !url.is_empty() {
            urls.push(url);
        }
        if token.ends_with(',') {
            continue;
        }
        // Skip descriptors up to the next comma outside parentheses.
        let mut depth = 0usize;
        let mut cut = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    cut = i + 1;
                    break;
                }
                _ => {}
            }
        }
        rest = &rest[cut..];
    }
    urls
}

/// Every `url(...)` term in a CSS declaration.
pub fn css_urls(style: &str) -> Vec<&str> {
    CSS_URL_RE
        .captures_iter(style)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Normalize every observation of a page into candidates, in the fixed sweep
/// order: image elements, picture/source elements, backgrounds, metadata,
/// structured data, network.
pub fn collect_candidates(snapshot: &PageSnapshot) -> (Vec<Candidate>, SignalStats) {
    let base = snapshot.base_url();
    let ex = &snapshot.extraction;
    let mut stats = SignalStats::default();
    let mut out = Vec::new();
    debug!("Sweeping \"{}\" (base {})", ex.title.as_deref().unwrap_or(""), base);

    for fault in &ex.faults {
        warn!("Extraction fault in {}: {}", fault.category, fault.message);
        stats.faults += 1;
    }

    let mut push = |raw: &str, dims: Option<Dimensions>, kind: SignalKind, stats: &mut SignalStats| {
        stats.bump(kind);
        match normalize(&base, raw, dims, kind) {
            Some(c) => out.push(c),
            None => stats.rejected += 1,
        }
    };

    // ── Image elements, then picture/source elements ──
    for obs in ex.images.iter().chain(&ex.sources) {
        let dims = Some(Dimensions::new(obs.width, obs.height));
        if obs.attr.to_ascii_lowercase().contains("srcset") {
            for url in split_srcset(&obs.value) {
                push(url, dims, SignalKind::Srcset, &mut stats);
            }
        } else {
            push(&obs.value, dims, SignalKind::DomAttribute, &mut stats);
        }
    }

    // ── Backgrounds ──
    for obs in &ex.backgrounds {
        if obs.width == 0 || obs.height == 0 {
            continue;
        }
        let dims = Some(Dimensions::new(obs.width, obs.height));
        let origin = if obs.computed { "computed" } else { "inline" };
        for url in css_urls(&obs.style) {
            trace!("{} background {}x{}: {}", origin, obs.width, obs.height, url);
            push(url, dims, SignalKind::Background, &mut stats);
        }
    }

    // ── Page metadata ──
    for obs in &ex.meta {
        trace!("{} -> {}", obs.selector, obs.value);
        push(&obs.value, None, SignalKind::MetaTag, &mut stats);
    }

    // ── Structured data, each block isolated ──
    for (i, block) in ex.structured_data.iter().enumerate() {
        match structured::image_urls(block) {
            Ok(urls) => {
                for url in urls {
                    push(&url, None, SignalKind::StructuredData, &mut stats);
                }
            }
            Err(e) => {
                debug!("Skipping malformed linked-data block #{}: {}", i, e);
                stats.faults += 1;
            }
        }
    }

    // ── Network observations ──
    for url in &snapshot.network {
        push(url, None, SignalKind::NetworkObservation, &mut stats);
    }

    (out, stats)
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}
