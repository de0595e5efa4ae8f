mod aggregate;
mod config;
mod download;
mod error;
mod harvest;
mod input;
mod naming;
mod render;
mod report;
mod signals;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use config::HarvestConfig;
use render::ChromeRenderer;

#[derive(Parser)]
#[command(
    name = "img_harvest",
    about = "Render pages in Chromium and download every image they show"
)]
struct Cli {
    /// CSV with `url` and `folder_name` columns
    input: PathBuf,

    /// Base directory for per-site folders
    #[arg(default_value = "./downloads")]
    output: PathBuf,

    /// TOML file overriding the built-in settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let config = HarvestConfig::load(cli.config.as_deref())?;
    let sites = input::load_sites(&cli.input)
        .with_context(|| format!("Cannot use input {}", cli.input.display()))?;

    println!(
        "Harvesting {} sites into {} (min {}, {} parallel downloads)",
        sites.len(),
        cli.output.display(),
        config.resolution_filter(),
        config.max_concurrent_downloads
    );

    let renderer = ChromeRenderer::launch(&config).await?;
    let result = harvest::run(&renderer, &config, &sites, &cli.output).await;
    renderer.shutdown().await;
    info!("Browser closed");

    let summary = result?;
    summary.print();

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
