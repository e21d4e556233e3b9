//! Configuration for citydir

mod logging;
mod pipeline;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use pipeline::{DownloadConfig, ParserConfig, PipelineConfig, ResolverConfig};

use crate::pipeline::Stage;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default user agent for archive downloads
pub const DEFAULT_USER_AGENT: &str = "citydir/0.1 (historical city directory ingest)";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory, manifest and volume filters
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Archive download configuration
    #[serde(default)]
    pub download: DownloadConfig,
    /// External entry parser configuration
    #[serde(default)]
    pub parser: ParserConfig,
    /// Street resolver configuration
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate the general settings.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate settings every stage relies on.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let errors = self.general_errors();
        report(errors)
    }

    /// Validate everything the given stages need before any of them starts
    pub fn validate_for(&self, stages: &[Stage]) -> Result<()> {
        let mut errors = self.general_errors();

        for stage in stages {
            match stage {
                Stage::Download => {
                    if self.download.base_url.as_deref().map_or(true, str::is_empty) {
                        errors.push("download.base_url must be set".to_string());
                    }
                    if self.pipeline.manifest.is_none() {
                        errors.push("pipeline.manifest must be set".to_string());
                    }
                }
                Stage::Parse => {
                    if !self.parser.is_configured() {
                        errors.push("both parser.path and parser.training must be set".to_string());
                    }
                }
                Stage::Transform => {
                    if self.resolver.streets.is_none() {
                        errors.push("resolver.streets must be set".to_string());
                    }
                }
            }
        }

        report(errors)
    }

    fn general_errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = Vec::new();

        if self.pipeline.data_dir.as_os_str().is_empty() {
            errors.push("pipeline.data_dir must not be empty".to_string());
        }
        if let (Some(min), Some(max)) = (self.pipeline.min_year, self.pipeline.max_year) {
            if min > max {
                errors.push(format!("pipeline.min_year ({}) is after max_year ({})", min, max));
            }
        }
        if self.pipeline.log_every_pages == 0 || self.pipeline.log_every_lines == 0 {
            errors.push("progress log intervals must be positive".to_string());
        }
        if self.pipeline.line_buffer == 0 {
            errors.push("pipeline.line_buffer must be positive".to_string());
        }
        if self.download.max_concurrent == 0 {
            errors.push("download.max_concurrent must be positive".to_string());
        }
        if self.parser.result_buffer == 0 {
            errors.push("parser.result_buffer must be positive".to_string());
        }
        if self.resolver.max_edit_distance > 2 {
            errors.push("resolver.max_edit_distance must be <= 2".to_string());
        }
        if self.resolver.lookup_concurrency == 0 {
            errors.push("resolver.lookup_concurrency must be positive".to_string());
        }

        errors
    }
}

fn report(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
    }
}
