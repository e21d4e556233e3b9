use super::{download::download_archives, parse::parse_volumes, transform::transform_lines};
use anyhow::Result;
use citydir::{config::Config, pipeline::Stage};
use tracing::info;

/// Stages `run` executes, in order
pub fn stages(skip_download: bool) -> Vec<Stage> {
    Stage::ALL
        .into_iter()
        .filter(|stage| !(skip_download && *stage == Stage::Download))
        .collect()
}

/// Run the stages in order, stopping at the first failure.
///
/// The configuration must already have been validated for these stages.
pub async fn run_pipeline(config: &Config, stages: &[Stage]) -> Result<()> {
    for stage in stages {
        info!("Starting {} stage", stage);
        match stage {
            Stage::Download => {
                download_archives(config).await?;
            }
            Stage::Parse => {
                parse_volumes(config).await?;
            }
            Stage::Transform => {
                transform_lines(config).await?;
            }
        }
    }

    info!("Pipeline finished");
    Ok(())
}
