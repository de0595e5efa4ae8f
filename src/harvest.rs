use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::aggregate::{self, Aggregation, SizeThreshold};
use crate::config::HarvestConfig;
use crate::download::{Cookie, Downloader};
use crate::input::Site;
use crate::naming;
use crate::render::{PageRenderer, RenderedPage};
use crate::report::{RunSummary, SiteOutcome, SiteSummary};
use crate::signals::{self, SignalStats};

pub const NO_IMAGES_MESSAGE: &str = "No images found meeting resolution criteria";
const DEBUG_SCREENSHOT: &str = "debug-screenshot.png";

/// Harvest every site in order, one page at a time, then write the run summary.
/// A failing site becomes a failed outcome; only setup and the final write abort.
pub async fn run<R: PageRenderer>(
    renderer: &R,
    config: &HarvestConfig,
    sites: &[Site],
    base_dir: &Path,
) -> Result<RunSummary> {
    tokio::fs::create_dir_all(base_dir)
        .await
        .with_context(|| format!("Failed to create {}", base_dir.display()))?;
    let downloader = Downloader::new(config)?;

    let mut outcomes = Vec::with_capacity(sites.len());
    for (i, site) in sites.iter().enumerate() {
        info!("[{}/{}] {} -> {}", i + 1, sites.len(), site.url, site.folder_name);
        let outcome = process_site(renderer, &downloader, config, site, base_dir).await;
        match &outcome.message {
            None => println!(
                "{}: {} downloaded, {} failed",
                outcome.folder_name, outcome.downloaded, outcome.failed
            ),
            Some(msg) => println!("{}: {}", outcome.folder_name, msg),
        }
        outcomes.push(outcome);

        if i + 1 < sites.len() && !config.site_pause().is_zero() {
            debug!("Pausing {}s before next site", config.site_pause_secs);
            tokio::time::sleep(config.site_pause()).await;
        }
    }

    let summary = RunSummary::new(config, outcomes);
    summary.write(base_dir)?;
    Ok(summary)
}

/// Fault boundary for one site.
pub async fn process_site<R: PageRenderer>(
    renderer: &R,
    downloader: &Downloader,
    config: &HarvestConfig,
    site: &Site,
    base_dir: &Path,
) -> SiteOutcome {
    let folder = naming::sanitize_folder_name(&site.folder_name);
    match harvest_site(renderer, downloader, config, site, &folder, base_dir).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Site {} failed: {:#}", site.url, e);
            SiteOutcome::failed(&folder, &site.url, format!("{:#}", e))
        }
    }
}

enum Inspection {
    Empty {
        signals: SignalStats,
        aggregation: Aggregation,
    },
    Ready {
        signals: SignalStats,
        aggregation: Aggregation,
        cookies: Vec<Cookie>,
        referer: url::Url,
    },
}

async fn harvest_site<R: PageRenderer>(
    renderer: &R,
    downloader: &Downloader,
    config: &HarvestConfig,
    site: &Site,
    folder: &str,
    base_dir: &Path,
) -> Result<SiteOutcome> {
    let site_dir = base_dir.join(folder);
    tokio::fs::create_dir_all(&site_dir)
        .await
        .with_context(|| format!("Failed to create {}", site_dir.display()))?;

    let mut page = renderer.open(&site.url).await?;
    let inspected = inspect(&mut page, config, &site_dir).await;
    if let Err(e) = page.close().await {
        debug!("Closing page for {}: {:#}", site.url, e);
    }

    match inspected? {
        Inspection::Empty { signals, aggregation } => {
            warn!("No candidates on {}", site.url);
            SiteSummary::new(&site.url, folder, config, signals, &aggregation.stats, &[])
                .write(&site_dir)?;
            Ok(SiteOutcome::failed(folder, &site.url, NO_IMAGES_MESSAGE))
        }
        Inspection::Ready {
            signals,
            aggregation,
            cookies,
            referer,
        } => {
            info!("Downloading {} images for {}", aggregation.urls.len(), folder);
            let results = downloader
                .download_all(&aggregation.urls, &site_dir, &referer, &cookies)
                .await;
            let summary =
                SiteSummary::new(&site.url, folder, config, signals, &aggregation.stats, &results);
            summary.write(&site_dir)?;
            Ok(SiteOutcome::completed(folder, &site.url, &summary))
        }
    }
}

async fn inspect<P: RenderedPage>(
    page: &mut P,
    config: &HarvestConfig,
    site_dir: &Path,
) -> Result<Inspection> {
    let snapshot = page.snapshot().await?;
    let (candidates, signals) = signals::collect_candidates(&snapshot);
    let threshold = SizeThreshold {
        min_width: config.min_width,
        min_height: config.min_height,
    };
    let aggregation = aggregate::aggregate(candidates, threshold);
    info!(
        "{} candidates ({} seen, {} too small, {} trackers)",
        aggregation.stats.emitted,
        aggregation.stats.unique,
        aggregation.stats.filtered_by_size,
        aggregation.stats.filtered_as_tracker
    );

    if aggregation.urls.is_empty() {
        if config.debug_screenshot {
            let path = site_dir.join(DEBUG_SCREENSHOT);
            match page.screenshot(&path).await {
                Ok(()) => info!("Saved {}", path.display()),
                Err(e) => warn!("Screenshot failed: {:#}", e),
            }
        }
        return Ok(Inspection::Empty { signals, aggregation });
    }

    let cookies = match page.cookies().await {
        Ok(c) => c,
        Err(e) => {
            warn!("Could not read cookies: {:#}", e);
            Vec::new()
        }
    };
    Ok(Inspection::Ready {
        signals,
        aggregation,
        cookies,
        // The navigated page, not `<base href>`, which may point at a CDN.
        referer: snapshot.target.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{ElementObservation, RawExtraction};
    use crate::test_support::{Route, ScriptedRenderer, TestServer};
    use url::Url;

    fn config() -> HarvestConfig {
        HarvestConfig {
            site_pause_secs: 0,
            download_timeout_secs: 5,
            ..Default::default()
        }
    }

    fn site(url: &str, folder: &str) -> Site {
        Site {
            url: Url::parse(url).unwrap(),
            folder_name: folder.into(),
        }
    }

    fn img(src: String) -> ElementObservation {
        ElementObservation {
            attr: "src".into(),
            value: src,
            width: 800,
            height: 600,
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn downloads_candidates_and_isolates_failures() {
        let server = TestServer::start(vec![
            ("/a.jpg", Route::image(b"aaa")),
            ("/c.jpg", Route::image(b"ccc")),
        ])
        .await;
        let extraction = RawExtraction {
            images: vec![
                img(server.url("/a.jpg")),
                img(server.url("/missing.jpg")),
                img(server.url("/c.jpg")),
            ],
            ..Default::default()
        };
        let renderer =
            ScriptedRenderer::default().with_page("https://shop.example.com/", extraction, vec![]);
        let out = tempfile::tempdir().unwrap();

        let summary = run(
            &renderer,
            &config(),
            &[site("https://shop.example.com/", "Shop")],
            out.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.successful_sites, 1);
        assert_eq!(summary.total_images_downloaded, 2);
        let outcome = &summary.per_site_results[0];
        assert!(outcome.success);
        assert_eq!((outcome.downloaded, outcome.failed), (2, 1));

        let dir = out.path().join("Shop");
        assert_eq!(std::fs::read(dir.join("0001-a.jpg")).unwrap(), b"aaa");
        assert_eq!(std::fs::read(dir.join("0003-c.jpg")).unwrap(), b"ccc");
        assert!(!dir.join("0002-missing.jpg").exists());

        let site_json = read_json(&dir.join("summary.json"));
        assert_eq!(site_json["totalCandidates"], 3);
        assert_eq!(site_json["downloaded"], 2);
        assert_eq!(site_json["failed"], 1);
        assert_eq!(site_json["signals"]["domAttribute"], 3);

        // Cookies from the page session travel with the image requests.
        let reqs = server.requests();
        assert!(reqs.iter().all(|r| r.header("cookie").as_deref() == Some("sid=1")));
        assert!(reqs
            .iter()
            .all(|r| r.header("referer").as_deref() == Some("https://shop.example.com/")));
    }

    #[tokio::test]
    async fn empty_page_is_unsuccessful_with_screenshot() {
        let renderer = ScriptedRenderer::default().with_page(
            "https://blank.example.com/",
            RawExtraction::default(),
            vec![],
        );
        let out = tempfile::tempdir().unwrap();

        let summary = run(
            &renderer,
            &config(),
            &[site("https://blank.example.com/", "Blank")],
            out.path(),
        )
        .await
        .unwrap();

        let outcome = &summary.per_site_results[0];
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some(NO_IMAGES_MESSAGE));

        let dir = out.path().join("Blank");
        assert!(dir.join(DEBUG_SCREENSHOT).exists());
        assert_eq!(renderer.screenshots.lock().unwrap().len(), 1);
        let site_json = read_json(&dir.join("summary.json"));
        assert_eq!(site_json["totalCandidates"], 0);
        assert_eq!(site_json["downloaded"], 0);
    }

    #[tokio::test]
    async fn screenshot_can_be_disabled() {
        let renderer = ScriptedRenderer::default().with_page(
            "https://blank.example.com/",
            RawExtraction::default(),
            vec![],
        );
        let out = tempfile::tempdir().unwrap();
        let cfg = HarvestConfig {
            debug_screenshot: false,
            ..config()
        };

        run(&renderer, &cfg, &[site("https://blank.example.com/", "Blank")], out.path())
            .await
            .unwrap();
        assert!(!out.path().join("Blank").join(DEBUG_SCREENSHOT).exists());
    }

    #[tokio::test]
    async fn failing_site_does_not_stop_the_run() {
        let server = TestServer::start(vec![("/hero.png", Route::image(b"png"))]).await;
        let extraction = RawExtraction {
            images: vec![img(server.url("/hero.png"))],
            ..Default::default()
        };
        let renderer =
            ScriptedRenderer::default().with_page("https://ok.example.com/", extraction, vec![]);
        let out = tempfile::tempdir().unwrap();

        let summary = run(
            &renderer,
            &config(),
            &[
                site("https://unreachable.example.com/", "Gone"),
                site("https://ok.example.com/", "Ok/Site"),
            ],
            out.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_sites, 2);
        assert_eq!(summary.failed_sites, 1);
        assert_eq!(summary.successful_sites, 1);
        assert!(summary.per_site_results[0]
            .message
            .as_deref()
            .unwrap()
            .contains("ERR_NAME_NOT_RESOLVED"));

        let overall = read_json(&out.path().join("overall-summary.json"));
        assert_eq!(overall["totalSites"], 2);
        assert_eq!(overall["totalImagesDownloaded"], 1);
        assert_eq!(overall["perSiteResults"][1]["folderName"], "Ok-Site");
        assert!(out.path().join("Ok-Site").join("0001-hero.png").exists());
    }

    #[tokio::test]
    async fn network_observations_are_downloaded_after_dom_hits() {
        let server = TestServer::start(vec![
            ("/dom.jpg", Route::image(b"d")),
            ("/xhr.webp", Route::image(b"x").with_content_type("image/webp")),
        ])
        .await;
        let extraction = RawExtraction {
            images: vec![img(server.url("/dom.jpg"))],
            ..Default::default()
        };
        let renderer = ScriptedRenderer::default().with_page(
            "https://gallery.example.com/",
            extraction,
            vec![server.url("/xhr.webp"), server.url("/dom.jpg")],
        );
        let out = tempfile::tempdir().unwrap();

        let summary = run(
            &renderer,
            &config(),
            &[site("https://gallery.example.com/", "Gallery")],
            out.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_images_downloaded, 2);
        let dir = out.path().join("Gallery");
        assert!(dir.join("0001-dom.jpg").exists());
        assert!(dir.join("0002-xhr.webp").exists());
    }

    #[tokio::test]
    async fn referer_is_the_page_even_with_foreign_base_href() {
        let server = TestServer::start(vec![("/hero.jpg", Route::image(b"h"))]).await;
        let extraction = RawExtraction {
            base_uri: Some("https://static.cdn.net/assets/".into()),
            images: vec![img(server.url("/hero.jpg"))],
            ..Default::default()
        };
        let renderer =
            ScriptedRenderer::default().with_page("https://shop.example.com/sale", extraction, vec![]);
        let out = tempfile::tempdir().unwrap();

        run(&renderer, &config(), &[site("https://shop.example.com/sale", "Sale")], out.path())
            .await
            .unwrap();

        let reqs = server.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].path, "/hero.jpg");
        assert_eq!(reqs[0].header("referer").as_deref(), Some("https://shop.example.com/"));
    }
}
