use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use library::{Catalog, CatalogCache};
use metadata::LoftyTagReader;
use providers::{build_providers, Aggregator, HttpImageFetcher};
use reqwest::Client;
use scanner::{
    config_path_from_env, load_or_create_config, resolve_library_root, resolve_path,
    FolderPipeline, FolderWalker, PipelineSettings, WalkControl,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }

    let mut args = env::args().skip(1);
    let library_root = match args.next() {
        Some(path) => PathBuf::from(path),
        None => resolve_library_root(&config_path, &config.library_root)
            .ok_or("library_root not set and no path argument")?,
    };
    let index_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| resolve_path(&config_path, &config.index_path));

    let catalog = Catalog::open(&index_path)?;
    let cache = Arc::new(CatalogCache::new());

    let client = Client::builder()
        .user_agent(concat!("roadie-scanner/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let sources = build_providers(&client, &config.provider_settings());
    info!("{} metadata providers configured", sources.len());
    let aggregator = Aggregator::new(
        sources,
        Arc::new(HttpImageFetcher::new(client.clone(), config.provider_timeout())),
        config.aggregate_settings(),
    );

    let pipeline = FolderPipeline::new(
        catalog.clone(),
        cache,
        Arc::new(LoftyTagReader),
        library_root,
        Some(aggregator),
        PipelineSettings {
            enrich_new_entities: config.enrich_new_entities,
            thumbnail_width: config.thumbnail_width,
            thumbnail_height: config.thumbnail_height,
        },
    );
    let walker = FolderWalker::new(pipeline, config.delete_empty_folders);

    let control = WalkControl::new();
    let on_signal = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current folder");
            on_signal.cancel();
        }
    });

    let report = walker.walk(&control).await?;
    for error in &report.errors {
        warn!("{}", error);
    }
    let stats = catalog.stats()?;

    println!(
        "Scanned {} folders: {} new, {} updated, {} unchanged, {} missing, {} incomplete tracks",
        report.folders,
        report.tracks_new,
        report.tracks_updated,
        report.tracks_unchanged,
        report.tracks_missing,
        report.tracks_incomplete
    );
    println!(
        "Catalog: {} artists, {} releases, {} media, {} tracks",
        stats.artists, stats.releases, stats.media, stats.tracks
    );
    if report.cancelled {
        println!("Scan was cancelled before finishing");
    }

    Ok(())
}
