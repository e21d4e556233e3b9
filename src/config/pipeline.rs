//! Pipeline, download, parser and resolver configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where stage outputs live and which volumes to process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory; each stage writes to its own subdirectory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Manifest JSON listing the volumes (copied into the download directory)
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Skip volumes published before this year
    #[serde(default)]
    pub min_year: Option<i32>,
    /// Skip volumes published after this year
    #[serde(default)]
    pub max_year: Option<i32>,
    /// Log progress every N pages during parsing
    #[serde(default = "default_log_every_pages")]
    pub log_every_pages: u64,
    /// Log progress every N lines during transform
    #[serde(default = "default_log_every_lines")]
    pub log_every_lines: u64,
    /// Lines buffered between extraction and the entry parser
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".citydir")
}

fn default_log_every_pages() -> u64 {
    100
}

fn default_log_every_lines() -> u64 {
    10_000
}

fn default_line_buffer() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            manifest: None,
            min_year: None,
            max_year: None,
            log_every_pages: default_log_every_pages(),
            log_every_lines: default_log_every_lines(),
            line_buffer: default_line_buffer(),
        }
    }
}

impl PipelineConfig {
    /// Output directory of a stage
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.data_dir.join(stage)
    }
}

/// Archive download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base URL the `<uuid>.tar.gz` archives are fetched from
    #[serde(default)]
    pub base_url: Option<String>,
    /// Maximum concurrent downloads
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-archive request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_user_agent() -> String {
    super::DEFAULT_USER_AGENT.to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// External entry parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Directory holding the parser's `parse.py`
    #[serde(default)]
    pub path: PathBuf,
    /// Training data file passed with `--training`
    #[serde(default)]
    pub training: PathBuf,
    /// Interpreter used to run `parse.py`
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Parsed records buffered ahead of the writer
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_result_buffer() -> usize {
    crate::parser::DEFAULT_RESULT_BUFFER
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            training: PathBuf::new(),
            interpreter: default_interpreter(),
            result_buffer: default_result_buffer(),
        }
    }
}

impl ParserConfig {
    /// Whether both the parser directory and its training data are configured
    pub fn is_configured(&self) -> bool {
        !is_empty(&self.path) && !is_empty(&self.training)
    }
}

/// Street resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Text file with one raw street name per line
    #[serde(default)]
    pub streets: Option<PathBuf>,
    /// Largest accepted edit distance between query and street name
    #[serde(default = "default_max_edit_distance")]
    pub max_edit_distance: usize,
    /// Concurrent address lookups during transform
    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,
}

fn default_max_edit_distance() -> usize {
    2
}

fn default_lookup_concurrency() -> usize {
    8
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            streets: None,
            max_edit_distance: default_max_edit_distance(),
            lookup_concurrency: default_lookup_concurrency(),
        }
    }
}

fn is_empty(path: &Path) -> bool {
    path.as_os_str().is_empty()
}
