//! Download → Parse → Transform orchestration
//!
//! Each stage reads the previous stage's persisted output from the data
//! directory, so stages can be rerun individually:
//!
//! ```text
//! <data_dir>/download/   <uuid>.tar.gz, directories.json
//! <data_dir>/parse/      lines.ndjson
//! <data_dir>/transform/  objects.ndjson
//! ```
//!
//! Failure policy: anything that breaks the stream (unreadable archive,
//! parser desync, index failure, write failure) aborts the stage with a
//! [`PipelineError`] naming the stage and record. Bad individual records and
//! unresolved addresses are logged and skipped.

pub mod download;
pub mod graph;
pub mod manifest;
pub mod parse;
pub mod progress;
pub mod sink;
pub mod transform;

pub use download::{DownloadError, DownloadStats, Downloader};
pub use graph::{
    GeocodedAddress, Geocoder, Geometry, GraphObject, LogEntry, PersonData, PersonObject, Relation,
};
pub use manifest::{load_manifest, save_manifest, year_filter, MANIFEST_FILENAME};
pub use parse::{ParseStage, ParseStats, LINES_FILENAME};
pub use progress::ProgressCounter;
pub use sink::{GraphSink, NdjsonSink, SinkError, OBJECTS_FILENAME};
pub use transform::{TransformStage, TransformStats};

use crate::archive::ArchiveError;
use crate::parser::BridgeError;
use crate::resolver::ResolverError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Parse,
    Transform,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Download, Stage::Parse, Stage::Transform];

    /// Name of the stage, also its output directory under the data directory
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Parse => "parse",
            Stage::Transform => "transform",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "download" => Ok(Stage::Download),
            "parse" => Ok(Stage::Parse),
            "transform" => Ok(Stage::Transform),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// Fatal pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage}: configuration error: {message}")]
    Configuration { stage: Stage, message: String },

    #[error("parse: failed to read archive of volume {volume}: {source}")]
    Archive {
        volume: String,
        #[source]
        source: ArchiveError,
    },

    #[error("parse: {0}")]
    ParserStart(#[source] BridgeError),

    #[error("parse: entry parser failed at record {record}: {source}")]
    Bridge {
        record: String,
        #[source]
        source: BridgeError,
    },

    #[error("transform: street resolution failed for record {record}: {source}")]
    Resolver {
        record: String,
        #[source]
        source: ResolverError,
    },

    #[error("{stage}: failed to write output for record {record}: {source}")]
    Sink {
        stage: Stage,
        record: String,
        #[source]
        source: SinkError,
    },

    #[error("{stage}: I/O error on {path}: {source}")]
    Io {
        stage: Stage,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: invalid manifest {path}: {source}")]
    Manifest {
        stage: Stage,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("download: {0}")]
    Download(#[from] DownloadError),

    #[error("{stage}: worker task failed: {message}")]
    Task { stage: Stage, message: String },
}

impl PipelineError {
    /// Stage the error was raised in
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Configuration { stage, .. }
            | PipelineError::Sink { stage, .. }
            | PipelineError::Io { stage, .. }
            | PipelineError::Manifest { stage, .. }
            | PipelineError::Task { stage, .. } => *stage,
            PipelineError::Archive { .. }
            | PipelineError::ParserStart(_)
            | PipelineError::Bridge { .. } => Stage::Parse,
            PipelineError::Download(_) => Stage::Download,
            PipelineError::Resolver { .. } => Stage::Transform,
        }
    }

    pub(crate) fn io(stage: Stage, path: &std::path::Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            stage,
            path: path.display().to_string(),
            source,
        }
    }
}
