//! Volume archive extraction
//!
//! Each directory volume ships as a `<uuid>.tar.gz` archive holding one hOCR
//! file per scanned page. This module streams such an archive into an ordered
//! sequence of [`PageRecord`](crate::types::PageRecord)s without ever
//! buffering the whole file.
//!
//! # Example Usage
//!
//! ```no_run
//! use citydir::archive::{PageSource, TarballSource};
//! use citydir::types::{VolumeManifest, Year};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let volume = Arc::new(VolumeManifest {
//!     uuid: "0c2e6f50".to_string(),
//!     year: Year::Range(1850, 1851),
//!     start_page: 21,
//!     end_page: 560,
//!     column_count: 2,
//! });
//!
//! let mut source = TarballSource::open("0c2e6f50.tar.gz", volume)?;
//! for page in source.iter_pages() {
//!     let page = page?;
//!     println!("page {} ({} bytes)", page.page_num, page.raw_text.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The iterator is pull-driven: nothing is decompressed until the consumer
//! asks for the next page, so a slow consumer pauses reading.

pub mod source;
pub mod tarball;

pub use source::{ArchiveError, PageName, PageSource, PAGE_SUFFIX};
pub use tarball::TarballSource;
