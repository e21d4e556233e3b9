//! Volume manifest loading and filtering

use super::{PipelineError, Stage};
use crate::types::VolumeManifest;
use std::path::Path;
use std::sync::Arc;

/// Manifest copy kept next to the downloaded archives
pub const MANIFEST_FILENAME: &str = "directories.json";

/// Load a manifest JSON array
pub fn load_manifest(path: &Path, stage: Stage) -> Result<Vec<Arc<VolumeManifest>>, PipelineError> {
    let json = std::fs::read_to_string(path).map_err(|e| PipelineError::io(stage, path, e))?;
    let volumes: Vec<VolumeManifest> =
        serde_json::from_str(&json).map_err(|source| PipelineError::Manifest {
            stage,
            path: path.display().to_string(),
            source,
        })?;

    Ok(volumes.into_iter().map(Arc::new).collect())
}

/// Write the manifest into `dir` as [`MANIFEST_FILENAME`]
pub fn save_manifest(
    volumes: &[Arc<VolumeManifest>],
    dir: &Path,
    stage: Stage,
) -> Result<(), PipelineError> {
    let path = dir.join(MANIFEST_FILENAME);
    let plain: Vec<&VolumeManifest> = volumes.iter().map(|v| v.as_ref()).collect();
    let json = serde_json::to_string_pretty(&plain).map_err(|source| PipelineError::Manifest {
        stage,
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(&path, json).map_err(|e| PipelineError::io(stage, &path, e))
}

/// Whether a volume lies entirely within the configured year bounds
pub fn year_filter(volume: &VolumeManifest, min_year: Option<i32>, max_year: Option<i32>) -> bool {
    min_year.map_or(true, |min| volume.year.min() >= min)
        && max_year.map_or(true, |max| volume.year.max() <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Year;
    use tempfile::TempDir;

    fn volume(year: Year) -> VolumeManifest {
        VolumeManifest {
            uuid: "v".to_string(),
            year,
            start_page: 1,
            end_page: 2,
            column_count: 2,
        }
    }

    #[test]
    fn test_year_filter() {
        let range = volume(Year::Range(1850, 1851));

        assert!(year_filter(&range, None, None));
        assert!(year_filter(&range, Some(1850), Some(1851)));
        assert!(!year_filter(&range, Some(1851), None));
        assert!(!year_filter(&range, None, Some(1850)));
        assert!(year_filter(&volume(Year::Single(1900)), Some(1899), None));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let volumes = vec![
            Arc::new(volume(Year::Single(1854))),
            Arc::new(volume(Year::Range(1850, 1851))),
        ];

        save_manifest(&volumes, temp_dir.path(), Stage::Download).unwrap();
        let loaded = load_manifest(&temp_dir.path().join(MANIFEST_FILENAME), Stage::Parse).unwrap();

        assert_eq!(loaded, volumes);
    }

    #[test]
    fn test_invalid_manifest_names_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, r#"[{"uuid":"x"}]"#).unwrap();

        let err = load_manifest(&path, Stage::Download).unwrap_err();
        assert!(matches!(err, PipelineError::Manifest { .. }));
        assert!(err.to_string().contains("bad.json"));
    }
}
