//! Core record types shared by every pipeline stage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pixel rectangle `[x0, y0, x1, y1]` of a detected text line
pub type BoundingBox = [u32; 4];

// ============================================================================
// Volume metadata
// ============================================================================

/// Publication year of a directory volume: a single year or a `[start, end]` range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Year {
    Single(i32),
    Range(i32, i32),
}

impl Year {
    /// First year covered by the volume
    pub fn min(&self) -> i32 {
        match *self {
            Year::Single(year) => year,
            Year::Range(start, _) => start,
        }
    }

    /// Last year covered by the volume
    pub fn max(&self) -> i32 {
        match *self {
            Year::Single(year) => year,
            Year::Range(_, end) => end,
        }
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Year::Single(year) => write!(f, "{}", year),
            Year::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

/// One entry of the volume manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeManifest {
    /// Volume identifier, also the archive file stem
    pub uuid: String,
    pub year: Year,
    /// First page holding directory entries (inclusive)
    pub start_page: u32,
    /// Last page holding directory entries (inclusive)
    pub end_page: u32,
    /// Number of text columns per page
    pub column_count: usize,
}

impl VolumeManifest {
    /// File name of the volume's page archive
    pub fn archive_filename(&self) -> String {
        archive_filename(&self.uuid)
    }

    /// Whether a page number falls inside the volume's declared entry range
    pub fn contains_page(&self, page_num: u32) -> bool {
        page_num >= self.start_page && page_num <= self.end_page
    }

    /// Number of pages in the declared entry range
    pub fn page_span(&self) -> u32 {
        self.end_page.saturating_sub(self.start_page)
    }
}

/// File name of the page archive for a volume uuid
pub fn archive_filename(uuid: &str) -> String {
    format!("{}.tar.gz", uuid)
}

// ============================================================================
// Page and line records
// ============================================================================

/// One OCR page pulled out of a volume archive
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub volume: Arc<VolumeManifest>,
    /// Raw hOCR text of the page
    pub raw_text: String,
    pub page_num: u32,
    pub image_id: String,
    pub page_uuid: String,
}

/// A single directory line, as sent to the entry parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRecord {
    /// Volume uuid
    pub uuid: String,
    pub year: Year,
    pub image_id: String,
    pub page_uuid: String,
    pub page_num: u32,
    pub bbox: BoundingBox,
    pub text: String,
}

impl LineRecord {
    /// Stable identity of the line: `<year>.<pageNum>.<x0-y0-x1-y1>`
    pub fn record_id(&self) -> String {
        let bbox = self
            .bbox
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("-");
        format!("{}.{}.{}", self.year, self.page_num, bbox)
    }
}

// ============================================================================
// Entry parser output
// ============================================================================

/// Role of a subject within a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Primary,
    Secondary,
    #[serde(other)]
    Other,
}

/// A person named by a directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "type")]
    pub kind: SubjectKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
}

/// A free-text address fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub value: String,
}

/// Structure returned by the entry parser for one line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFields {
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl ParsedFields {
    /// The subject a Person object is named after: the first primary one, else the first one
    pub fn main_subject(&self) -> Option<&Subject> {
        self.subjects
            .iter()
            .find(|s| s.kind == SubjectKind::Primary)
            .or_else(|| self.subjects.first())
    }
}

/// A line record merged with its parsed structure; one line of `lines.ndjson`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLine {
    #[serde(flatten)]
    pub line: LineRecord,
    pub parsed: ParsedFields,
}
