use anyhow::{Context, Result};
use citydir::{
    config::Config,
    pipeline::{load_manifest, ParseStage, ParseStats, Stage, LINES_FILENAME, MANIFEST_FILENAME},
    types::VolumeManifest,
};
use std::sync::Arc;
use tracing::info;

/// Parse downloaded archives into `<data_dir>/parse/lines.ndjson`
pub async fn parse_volumes(config: &Config) -> Result<ParseStats> {
    let archive_dir = config.pipeline.stage_dir(Stage::Download.as_str());
    let volumes = volumes_for_parse(config)?;

    let output = config
        .pipeline
        .stage_dir(Stage::Parse.as_str())
        .join(LINES_FILENAME);

    let stats = ParseStage::new(config)
        .run(&volumes, &archive_dir, &output)
        .await?;

    info!("Wrote {}", output.display());
    stats.print_summary();
    Ok(stats)
}

/// Manifest saved by the download stage, else the configured one
fn volumes_for_parse(config: &Config) -> Result<Vec<Arc<VolumeManifest>>> {
    let saved = config
        .pipeline
        .stage_dir(Stage::Download.as_str())
        .join(MANIFEST_FILENAME);

    let path = if saved.is_file() {
        saved
    } else {
        config
            .pipeline
            .manifest
            .clone()
            .with_context(|| {
                format!(
                    "No manifest found: {} does not exist and pipeline.manifest is not set",
                    saved.display()
                )
            })?
    };

    Ok(load_manifest(&path, Stage::Parse)?)
}
