//! citydir: historical city directory ingestion
//!
//! Turns scanned, OCR-annotated city directory volumes into person/address
//! graph objects:
//! - Streaming extraction of hOCR pages from `.tar.gz` volume archives
//! - Column detection and reflow of multi-column directory pages
//! - A strictly ordered bridge to a long-lived external entry parser
//! - Fuzzy resolution of address fragments against a canonical street list
//! - Download → Parse → Transform orchestration with persisted stage outputs

pub mod archive;
pub mod columns;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
