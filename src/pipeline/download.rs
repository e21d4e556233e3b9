//! Volume archive downloads
//!
//! Fetches `<base_url>/<uuid>.tar.gz` for every manifest entry with a bounded
//! number of requests in flight. A failed download is not fatal: whatever was
//! written is renamed to `<uuid>.xml` (the archive host answers errors with an
//! XML document) so the parse stage treats the volume as missing.
//!
//! Bodies are streamed to `<uuid>.tar.gz.part` and renamed into place only
//! once complete, so an interrupted run never leaves a truncated archive
//! that later runs would take as present.

use super::{PipelineError, Stage};
use crate::config::DownloadConfig;
use crate::types::VolumeManifest;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Download statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: usize,
    /// Archives already present from an earlier run
    pub existing: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl DownloadStats {
    pub fn print_summary(&self) {
        println!("\nDownload Summary");
        println!("================");
        println!("Archives downloaded: {}", self.downloaded);
        println!("Already present:     {}", self.existing);
        println!("Failed:              {}", self.failed);
        println!("Bytes downloaded:    {} MB", self.bytes / 1_000_000);
    }
}

enum Outcome {
    Downloaded(u64),
    Existing,
    Failed,
}

/// Concurrent archive downloader
pub struct Downloader {
    client: reqwest::Client,
    base_url: String,
    dir: PathBuf,
    max_concurrent: usize,
}

impl Downloader {
    pub fn new(config: &DownloadConfig, dir: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let base_url = config
            .base_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PipelineError::Configuration {
                stage: Stage::Download,
                message: "download.base_url is not set".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(DownloadError::Request)?;

        Ok(Self {
            client,
            base_url,
            dir: dir.as_ref().to_path_buf(),
            max_concurrent: config.max_concurrent.max(1),
        })
    }

    /// Archive URL of a volume
    pub fn url_for(&self, uuid: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/{}", base, crate::types::archive_filename(uuid))
    }

    /// Download every volume, returning once all of them have finished
    pub async fn download_all(
        &self,
        volumes: &[Arc<VolumeManifest>],
    ) -> Result<DownloadStats, PipelineError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::io(Stage::Download, &self.dir, e))?;

        info!(
            "Downloading {} archives to {} ({} at a time)",
            volumes.len(),
            self.dir.display(),
            self.max_concurrent
        );

        let outcomes: Vec<Outcome> = stream::iter(volumes.iter())
            .map(|volume| self.download_volume(volume))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut stats = DownloadStats::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Downloaded(bytes) => {
                    stats.downloaded += 1;
                    stats.bytes += bytes;
                }
                Outcome::Existing => stats.existing += 1,
                Outcome::Failed => stats.failed += 1,
            }
        }

        info!(
            "Downloads finished: {} downloaded, {} present, {} failed",
            stats.downloaded, stats.existing, stats.failed
        );
        Ok(stats)
    }

    async fn download_volume(&self, volume: &VolumeManifest) -> Outcome {
        let path = self.dir.join(volume.archive_filename());

        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.len() > 0 {
                debug!("Archive {} already present", path.display());
                return Outcome::Existing;
            }
        }

        let url = self.url_for(&volume.uuid);
        let part = partial_path(&path);
        let fetched = match self.fetch(&url, &part).await {
            Ok(bytes) => tokio::fs::rename(&part, &path)
                .await
                .map(|()| bytes)
                .map_err(DownloadError::from),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(bytes) => {
                debug!("Downloaded {} ({} bytes)", url, bytes);
                Outcome::Downloaded(bytes)
            }
            Err(e) => {
                warn!("Failed to download volume {}: {}", volume.uuid, e);
                self.quarantine(&part, &volume.uuid).await;
                Outcome::Failed
            }
        }
    }

    /// Stream the response body to `path`; non-success statuses are still
    /// written, then reported as errors
    async fn fetch(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        let mut writer = BufWriter::new(File::create(path).await?);
        let mut body = response.bytes_stream();
        let mut bytes: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            bytes += chunk.len() as u64;
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;

        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(bytes)
    }

    /// Move a failed download's partial file out of the way as `<uuid>.xml`
    async fn quarantine(&self, path: &Path, uuid: &str) {
        if tokio::fs::metadata(path).await.is_err() {
            return;
        }
        let target = self.dir.join(format!("{}.xml", uuid));
        if let Err(e) = tokio::fs::rename(path, &target).await {
            warn!("Failed to rename {} to {}: {}", path.display(), target.display(), e);
        }
    }
}

/// Where an archive is written while its download is in progress
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
