use anyhow::{Context, Result};
use citydir::{
    config::Config,
    pipeline::{NdjsonSink, Stage, TransformStage, TransformStats, LINES_FILENAME, OBJECTS_FILENAME},
};
use tracing::info;

/// Resolve parsed lines into graph objects in `<data_dir>/transform/objects.ndjson`
pub async fn transform_lines(config: &Config) -> Result<TransformStats> {
    let input = config
        .pipeline
        .stage_dir(Stage::Parse.as_str())
        .join(LINES_FILENAME);
    if !input.exists() {
        anyhow::bail!(
            "Parsed lines not found: {}. Run `citydir parse` first",
            input.display()
        );
    }

    let stage = TransformStage::from_config(config)?;

    let dir = config.pipeline.stage_dir(Stage::Transform.as_str());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create transform directory: {}", dir.display()))?;
    let output = dir.join(OBJECTS_FILENAME);

    let mut sink = NdjsonSink::create(&output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let stats = stage.run(&input, &mut sink).await?;

    info!("Wrote {} objects to {}", sink.written(), output.display());
    stats.print_summary();
    Ok(stats)
}
