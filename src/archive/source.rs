//! Core types and traits for reading volume page archives

use crate::types::PageRecord;
use thiserror::Error;

/// File suffix of page entries inside a volume archive
pub const PAGE_SUFFIX: &str = ".hocr";

/// Trait for sources that yield the OCR pages of one volume
pub trait PageSource: Send {
    /// Iterate over the pages of the volume, in archive order.
    ///
    /// The iterator is lazy and can only be consumed once. After it yields an
    /// error it yields nothing further.
    fn iter_pages(&mut self) -> Box<dyn Iterator<Item = Result<PageRecord, ArchiveError>> + '_>;

    /// Get the source name for display
    fn source_name(&self) -> &str;
}

/// Identifiers encoded in a page entry's file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageName {
    pub page_num: u32,
    pub image_id: String,
    pub page_uuid: String,
}

impl PageName {
    /// Parse `<pageNum>.<imageId>.<pageUuid>.<suffix>.hocr`, ignoring any directory prefix.
    ///
    /// Example: `25.56886389.c6725860-7ce9-0134-fb06-00505686a51c.processed.hocr`
    pub fn parse(entry_name: &str) -> Option<Self> {
        let file_name = entry_name.rsplit('/').next()?;
        if !file_name.ends_with(PAGE_SUFFIX) {
            return None;
        }

        let mut parts = file_name.split('.');
        let page_num = parts.next()?.parse().ok()?;
        let image_id = parts.next().filter(|s| !s.is_empty())?;
        let page_uuid = parts.next().filter(|s| !s.is_empty())?;

        // The uuid must be followed by at least the .hocr suffix
        parts.next()?;

        Some(Self {
            page_num,
            image_id: image_id.to_string(),
            page_uuid: page_uuid.to_string(),
        })
    }
}

/// Errors that can occur while reading an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to open archive {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt archive {archive}: {source}")]
    Corrupt {
        archive: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read entry {entry} in {archive}: {source}")]
    Entry {
        archive: String,
        entry: String,
        #[source]
        source: std::io::Error,
    },
}
