//! Parse stage: archives → column-ordered lines → entry parser → `lines.ndjson`
//!
//! Extraction and column detection are synchronous and run on a blocking
//! thread. Lines reach the async side through a bounded channel, so a slow
//! parser eventually pauses decompression. One parser process serves every
//! volume of the run; volumes are fed one after another, never interleaved.

use super::manifest::year_filter;
use super::progress::ProgressCounter;
use super::{PipelineError, Stage};
use crate::archive::{PageSource, TarballSource};
use crate::columns::{ColumnDetector, ColumnOptions, DetectedPage, HocrColumnDetector};
use crate::config::Config;
use crate::parser::{BridgeError, EntryParserBridge, ParserCommand};
use crate::types::{LineRecord, PageRecord, VolumeManifest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Output file of the parse stage
pub const LINES_FILENAME: &str = "lines.ndjson";

/// Parse statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Volumes fed to the parser
    pub volumes: usize,
    /// Volumes outside the configured years
    pub volumes_filtered: usize,
    /// Volumes whose archive was not downloaded
    pub volumes_missing: usize,
    /// Pages read from archives
    pub pages: u64,
    /// Pages outside the volume's entry range
    pub pages_out_of_range: u64,
    /// Pages the column detector could not read
    pub pages_malformed: u64,
    /// Lines dropped for lack of a column
    pub lines_unassigned: u64,
    /// Parsed entries written
    pub entries: u64,
}

impl ParseStats {
    pub fn print_summary(&self) {
        println!("\nParse Summary");
        println!("=============");
        println!("Volumes parsed:      {}", self.volumes);
        println!("Volumes filtered:    {}", self.volumes_filtered);
        println!("Volumes missing:     {}", self.volumes_missing);
        println!("Pages read:          {}", self.pages);
        println!("Pages out of range:  {}", self.pages_out_of_range);
        println!("Pages malformed:     {}", self.pages_malformed);
        println!("Lines unassigned:    {}", self.lines_unassigned);
        println!("Entries written:     {}", self.entries);
    }
}

type LineMessage = Result<LineRecord, PipelineError>;

/// Runs the parse stage
pub struct ParseStage {
    detector: Arc<dyn ColumnDetector>,
    command: ParserCommand,
    result_buffer: usize,
    line_buffer: usize,
    log_every_pages: u64,
    min_year: Option<i32>,
    max_year: Option<i32>,
}

impl ParseStage {
    /// Stage with the hOCR column detector and the configured parser command
    pub fn new(config: &Config) -> Self {
        Self {
            detector: Arc::new(HocrColumnDetector::new()),
            command: ParserCommand::from_config(&config.parser),
            result_buffer: config.parser.result_buffer,
            line_buffer: config.pipeline.line_buffer,
            log_every_pages: config.pipeline.log_every_pages,
            min_year: config.pipeline.min_year,
            max_year: config.pipeline.max_year,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ColumnDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_command(mut self, command: ParserCommand) -> Self {
        self.command = command;
        self
    }

    /// Parse every selected volume found in `archive_dir` into `output`
    pub async fn run(
        &self,
        volumes: &[Arc<VolumeManifest>],
        archive_dir: &Path,
        output: &Path,
    ) -> Result<ParseStats, PipelineError> {
        let mut stats = ParseStats::default();
        let selected = self.select_volumes(volumes, archive_dir, &mut stats);
        stats.volumes = selected.len();

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(Stage::Parse, parent, e))?;
        }
        let file = File::create(output)
            .await
            .map_err(|e| PipelineError::io(Stage::Parse, output, e))?;
        let mut writer = BufWriter::new(file);

        if selected.is_empty() {
            warn!("No volumes to parse");
            writer
                .flush()
                .await
                .map_err(|e| PipelineError::io(Stage::Parse, output, e))?;
            return Ok(stats);
        }

        info!("Parsing {} volumes into {}", selected.len(), output.display());

        let mut bridge = EntryParserBridge::spawn(&self.command, self.result_buffer)
            .map_err(PipelineError::ParserStart)?;
        let mut results = bridge.results().ok_or_else(|| PipelineError::Task {
            stage: Stage::Parse,
            message: "entry parser results already taken".to_string(),
        })?;

        let (tx, mut rx) = mpsc::channel::<LineMessage>(self.line_buffer.max(1));
        let detector = self.detector.clone();
        let log_every = self.log_every_pages;
        let producer =
            tokio::task::spawn_blocking(move || extract_lines(selected, detector.as_ref(), &tx, log_every));

        let feed = async {
            while let Some(message) = rx.recv().await {
                let record = message?;
                let record_id = record.record_id();
                bridge
                    .submit(record)
                    .await
                    .map_err(|source| PipelineError::Bridge {
                        record: record_id,
                        source,
                    })?;
            }
            bridge.finish().await.map_err(|source| PipelineError::Bridge {
                record: "end of input".to_string(),
                source,
            })?;
            Ok::<_, PipelineError>(())
        };

        let collect = async {
            let mut written: u64 = 0;
            let mut last_id: Option<String> = None;

            while let Some(result) = results.next().await {
                let parsed = result.map_err(|source| PipelineError::Bridge {
                    record: after(&last_id),
                    source,
                })?;

                let record_id = parsed.line.record_id();
                let mut line = serde_json::to_vec(&parsed).map_err(|e| PipelineError::Bridge {
                    record: record_id.clone(),
                    source: BridgeError::Io(e.into()),
                })?;
                line.push(b'\n');
                writer
                    .write_all(&line)
                    .await
                    .map_err(|e| PipelineError::io(Stage::Parse, output, e))?;

                written += 1;
                last_id = Some(record_id);
            }

            writer
                .flush()
                .await
                .map_err(|e| PipelineError::io(Stage::Parse, output, e))?;
            Ok::<_, PipelineError>((written, last_id))
        };

        let ((), (written, last_id)) = tokio::try_join!(feed, collect)?;

        let submitted = bridge.submitted();
        bridge.wait().await.map_err(|source| PipelineError::Bridge {
            record: after(&last_id),
            source,
        })?;

        if written != submitted {
            return Err(PipelineError::Bridge {
                record: after(&last_id),
                source: BridgeError::Correlation(format!(
                    "{} records submitted but {} replies received",
                    submitted, written
                )),
            });
        }

        let extracted = producer.await.map_err(|e| PipelineError::Task {
            stage: Stage::Parse,
            message: e.to_string(),
        })?;

        stats.pages = extracted.pages;
        stats.pages_out_of_range = extracted.pages_out_of_range;
        stats.pages_malformed = extracted.pages_malformed;
        stats.lines_unassigned = extracted.lines_unassigned;
        stats.entries = written;

        info!(
            "Parsed {} entries from {} pages of {} volumes",
            stats.entries, stats.pages, stats.volumes
        );
        Ok(stats)
    }

    /// Apply the year filter and drop volumes without an archive
    fn select_volumes(
        &self,
        volumes: &[Arc<VolumeManifest>],
        archive_dir: &Path,
        stats: &mut ParseStats,
    ) -> Vec<(Arc<VolumeManifest>, PathBuf)> {
        let mut selected = Vec::new();

        for volume in volumes {
            if !year_filter(volume, self.min_year, self.max_year) {
                debug!("Skipping volume {} ({}): outside year range", volume.uuid, volume.year);
                stats.volumes_filtered += 1;
                continue;
            }

            let path = archive_dir.join(volume.archive_filename());
            if !path.is_file() {
                warn!("Skipping volume {} ({}): {} not found", volume.uuid, volume.year, path.display());
                stats.volumes_missing += 1;
                continue;
            }

            selected.push((volume.clone(), path));
        }

        selected
    }
}

fn after(last_id: &Option<String>) -> String {
    match last_id {
        Some(id) => format!("after {}", id),
        None => "before the first reply".to_string(),
    }
}

/// Counters kept by the extraction thread
#[derive(Debug, Default)]
struct ExtractStats {
    pages: u64,
    pages_out_of_range: u64,
    pages_malformed: u64,
    lines_unassigned: u64,
}

/// Read every selected archive and send its lines, in order.
///
/// Stops early when the receiving side has gone away; archive errors are
/// forwarded so the feeder aborts the run.
fn extract_lines(
    volumes: Vec<(Arc<VolumeManifest>, PathBuf)>,
    detector: &dyn ColumnDetector,
    tx: &mpsc::Sender<LineMessage>,
    log_every_pages: u64,
) -> ExtractStats {
    let mut stats = ExtractStats::default();
    let mut progress = ProgressCounter::new("pages", log_every_pages);

    for (volume, path) in volumes {
        info!("Reading volume {} ({})", volume.uuid, volume.year);

        let mut source = match TarballSource::open(&path, volume.clone()) {
            Ok(source) => source,
            Err(source) => {
                let _ = tx.blocking_send(Err(PipelineError::Archive {
                    volume: volume.uuid.clone(),
                    source,
                }));
                return stats;
            }
        };

        let options = ColumnOptions {
            column_count: volume.column_count,
        };

        for page in source.iter_pages() {
            let page = match page {
                Ok(page) => page,
                Err(source) => {
                    let _ = tx.blocking_send(Err(PipelineError::Archive {
                        volume: volume.uuid.clone(),
                        source,
                    }));
                    return stats;
                }
            };

            stats.pages += 1;
            progress.tick();

            if !volume.contains_page(page.page_num) {
                stats.pages_out_of_range += 1;
                continue;
            }

            let detected = match detector.detect(&page.raw_text, &options) {
                Ok(detected) => detected,
                Err(e) => {
                    warn!(
                        "Skipping page {} of volume {}: {}",
                        page.page_num, volume.uuid, e
                    );
                    stats.pages_malformed += 1;
                    continue;
                }
            };

            let (records, unassigned) = line_records(&page, detected);
            stats.lines_unassigned += unassigned;

            for record in records {
                if tx.blocking_send(Ok(record)).is_err() {
                    debug!("Line consumer stopped; ending extraction");
                    return stats;
                }
            }
        }
    }

    stats
}

/// Line records of one page, in reading order. Returns the records and the
/// number of lines dropped for lack of a column.
pub fn line_records(page: &PageRecord, detected: Vec<DetectedPage>) -> (Vec<LineRecord>, u64) {
    let mut records = Vec::new();
    let mut unassigned = 0;

    for line in detected.into_iter().flat_map(|p| p.lines) {
        if line.column_index.is_none() {
            unassigned += 1;
            continue;
        }

        let text = collapse_dots(line.text.trim());
        if text.is_empty() {
            continue;
        }

        records.push(LineRecord {
            uuid: page.volume.uuid.clone(),
            year: page.volume.year,
            image_id: page.image_id.clone(),
            page_uuid: page.page_uuid.clone(),
            page_num: page.page_num,
            bbox: line.bbox,
            text,
        });
    }

    (records, unassigned)
}

/// Collapse runs of `.` (OCR leader dots) into a single `.`
pub fn collapse_dots(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_dot = false;
    for c in text.chars() {
        if c == '.' && previous_dot {
            continue;
        }
        previous_dot = c == '.';
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::DetectedLine;
    use crate::types::Year;

    fn page() -> PageRecord {
        PageRecord {
            volume: Arc::new(VolumeManifest {
                uuid: "vol".to_string(),
                year: Year::Range(1850, 1851),
                start_page: 21,
                end_page: 560,
                column_count: 2,
            }),
            raw_text: String::new(),
            page_num: 25,
            image_id: "56886389".to_string(),
            page_uuid: "c6725860".to_string(),
        }
    }

    fn detected(column_index: Option<usize>, y: u32, text: &str) -> DetectedLine {
        DetectedLine {
            column_index,
            bbox: [100, y, 900, y + 30],
            text: text.to_string(),
        }
    }

    #[test]
    fn test_collapse_dots() {
        assert_eq!(collapse_dots("Smith John.... carpenter"), "Smith John. carpenter");
        assert_eq!(collapse_dots("a.b..c...d"), "a.b.c.d");
        assert_eq!(collapse_dots("no dots"), "no dots");
        assert_eq!(collapse_dots("...."), ".");
    }

    #[test]
    fn test_line_records_drop_unassigned() {
        let pages = vec![DetectedPage {
            lines: vec![
                detected(Some(0), 100, "Smith John, carpenter..... 123 Broadway"),
                detected(Some(1), 100, "   "),
                detected(None, 20, "SMI"),
            ],
        }];

        let (records, unassigned) = line_records(&page(), pages);

        assert_eq!(unassigned, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Smith John, carpenter. 123 Broadway");
        assert_eq!(records[0].record_id(), "1850-1851.25.100-100-900-130");
        assert_eq!(records[0].image_id, "56886389");
    }

    #[test]
    fn test_select_volumes_filters_years_and_missing_archives() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("present.tar.gz"), b"").unwrap();
        std::fs::write(temp_dir.path().join("old.tar.gz"), b"").unwrap();

        let volume = |uuid: &str, year: Year| {
            Arc::new(VolumeManifest {
                uuid: uuid.to_string(),
                year,
                start_page: 1,
                end_page: 2,
                column_count: 2,
            })
        };
        let volumes = vec![
            volume("present", Year::Single(1854)),
            volume("old", Year::Single(1790)),
            volume("absent", Year::Single(1854)),
        ];

        let mut config = Config::default();
        config.pipeline.min_year = Some(1800);
        let stage = ParseStage::new(&config);

        let mut stats = ParseStats::default();
        let selected = stage.select_volumes(&volumes, temp_dir.path(), &mut stats);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0.uuid, "present");
        assert_eq!(stats.volumes_filtered, 1);
        assert_eq!(stats.volumes_missing, 1);
    }

    #[tokio::test]
    async fn test_no_volumes_writes_empty_output() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("parse").join(LINES_FILENAME);
        let stage = ParseStage::new(&Config::default());

        let stats = stage.run(&[], temp_dir.path(), &output).await.unwrap();

        assert_eq!(stats, ParseStats::default());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    }
}
