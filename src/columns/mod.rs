//! Column detection for multi-column directory pages
//!
//! Directory pages are typeset in several columns. OCR reports lines in
//! whatever order it found them; a [`ColumnDetector`] assigns each line to a
//! column and reflows the page so lines read column by column, top to bottom.

mod hocr;

pub use hocr::HocrColumnDetector;

use crate::types::BoundingBox;
use thiserror::Error;

/// Per-volume detection options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOptions {
    /// Number of text columns on each page
    pub column_count: usize,
}

/// A text line with its column assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedLine {
    /// `None` for lines that could not be placed in a single column
    pub column_index: Option<usize>,
    pub bbox: BoundingBox,
    pub text: String,
}

/// Lines of one page in reading order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedPage {
    pub lines: Vec<DetectedLine>,
}

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("Malformed hOCR: {0}")]
    Markup(#[from] quick_xml::Error),
}

/// Splits raw page markup into column-ordered lines
pub trait ColumnDetector: Send + Sync {
    fn detect(&self, hocr: &str, options: &ColumnOptions) -> Result<Vec<DetectedPage>, ColumnError>;
}
