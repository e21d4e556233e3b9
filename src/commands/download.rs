use anyhow::{Context, Result};
use citydir::{
    config::Config,
    pipeline::{load_manifest, save_manifest, DownloadStats, Downloader, PipelineError, Stage},
};
use tracing::info;

/// Fetch every archive listed in the manifest into `<data_dir>/download`
pub async fn download_archives(config: &Config) -> Result<DownloadStats> {
    let manifest = config.pipeline.manifest.as_ref().ok_or_else(|| PipelineError::Configuration {
        stage: Stage::Download,
        message: "pipeline.manifest is not set".to_string(),
    })?;

    let volumes = load_manifest(manifest, Stage::Download)?;
    info!("Loaded {} volumes from {}", volumes.len(), manifest.display());

    let dir = config.pipeline.stage_dir(Stage::Download.as_str());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create download directory: {}", dir.display()))?;

    // The parse stage reads the manifest from here
    save_manifest(&volumes, &dir, Stage::Download)?;

    let downloader = Downloader::new(&config.download, &dir)?;
    let stats = downloader.download_all(&volumes).await?;

    stats.print_summary();
    Ok(stats)
}
