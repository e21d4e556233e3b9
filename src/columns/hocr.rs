//! hOCR column detector
//!
//! Reads `ocr_page`, `ocr_line` and `ocrx_word` elements and their
//! `title="bbox x0 y0 x1 y1"` properties, then splits the page's text area
//! into equal-width columns.

use super::{ColumnDetector, ColumnError, ColumnOptions, DetectedLine, DetectedPage};
use crate::types::BoundingBox;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::trace;

/// Share of a column's width a line may overhang into its neighbour
const COLUMN_TOLERANCE: f64 = 0.1;

/// hOCR classes treated as text lines
const LINE_CLASSES: &[&str] = &["ocr_line", "ocr_header", "ocr_caption", "ocr_textfloat"];

/// Equal-width column detector over hOCR markup
#[derive(Debug, Clone, Copy, Default)]
pub struct HocrColumnDetector;

impl HocrColumnDetector {
    pub fn new() -> Self {
        Self
    }
}

impl ColumnDetector for HocrColumnDetector {
    fn detect(&self, hocr: &str, options: &ColumnOptions) -> Result<Vec<DetectedPage>, ColumnError> {
        let pages = read_pages(hocr)?;
        Ok(pages
            .into_iter()
            .map(|page| layout(page, options.column_count.max(1)))
            .collect())
    }
}

/// A page as read from the markup, before column assignment
#[derive(Debug, Default)]
struct RawPage {
    bbox: Option<BoundingBox>,
    lines: Vec<(BoundingBox, String)>,
}

/// Line currently being read
struct OpenLine {
    depth: usize,
    bbox: Option<BoundingBox>,
    words: Vec<String>,
    /// Word span currently open: its depth and text so far
    word: Option<(usize, String)>,
}

impl OpenLine {
    fn push_text(&mut self, text: &str) {
        match &mut self.word {
            Some((_, word)) => word.push_str(text),
            None => {
                let text = text.trim();
                if !text.is_empty() {
                    self.words.push(text.to_string());
                }
            }
        }
    }

    fn close_word(&mut self) {
        if let Some((_, word)) = self.word.take() {
            let word = word.trim();
            if !word.is_empty() {
                self.words.push(word.to_string());
            }
        }
    }
}

fn read_pages(hocr: &str) -> Result<Vec<RawPage>, ColumnError> {
    let mut reader = Reader::from_str(hocr);
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut pages: Vec<RawPage> = Vec::new();
    let mut line: Option<OpenLine> = None;
    let mut depth: usize = 0;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                depth += 1;
                let classes = attribute(e, b"class").unwrap_or_default();
                let bbox = attribute(e, b"title").and_then(|title| parse_bbox(&title));

                for class in classes.split_whitespace() {
                    if class == "ocr_page" {
                        pages.push(RawPage {
                            bbox,
                            lines: Vec::new(),
                        });
                    } else if LINE_CLASSES.contains(&class) {
                        if line.is_none() {
                            line = Some(OpenLine {
                                depth,
                                bbox,
                                words: Vec::new(),
                                word: None,
                            });
                        }
                    } else if class == "ocrx_word" {
                        if let Some(open) = line.as_mut() {
                            open.close_word();
                            open.word = Some((depth, String::new()));
                        }
                    }
                }
            }
            Event::Text(ref e) => {
                if let Some(open) = line.as_mut() {
                    match e.unescape() {
                        Ok(text) => open.push_text(&text),
                        // HTML entities such as &nbsp; are not XML; keep them verbatim
                        Err(_) => open.push_text(&String::from_utf8_lossy(e)),
                    }
                }
            }
            Event::End(_) => {
                if let Some(open) = line.as_mut() {
                    if matches!(open.word, Some((word_depth, _)) if word_depth == depth) {
                        open.close_word();
                    }
                    if open.depth == depth {
                        if let Some(finished) = line.take() {
                            finish_line(&mut pages, finished);
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(pages)
}

fn finish_line(pages: &mut Vec<RawPage>, mut line: OpenLine) {
    line.close_word();
    let Some(bbox) = line.bbox else {
        trace!("Skipping hOCR line without bbox");
        return;
    };
    if line.words.is_empty() {
        return;
    }

    if pages.is_empty() {
        pages.push(RawPage::default());
    }
    if let Some(page) = pages.last_mut() {
        page.lines.push((bbox, line.words.join(" ")));
    }
}

/// Attribute value by name, lossily decoded
fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Extract `bbox x0 y0 x1 y1` from an hOCR title property list
fn parse_bbox(title: &str) -> Option<BoundingBox> {
    let property = title
        .split(';')
        .map(str::trim)
        .find(|p| p.starts_with("bbox "))?;

    let coords: Vec<u32> = property
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;

    match coords.as_slice() {
        [x0, y0, x1, y1] => Some([*x0, *y0, *x1, *y1]),
        _ => None,
    }
}

/// Assign columns and reflow: assigned lines column by column, top to bottom,
/// then unassigned lines top to bottom.
fn layout(page: RawPage, column_count: usize) -> DetectedPage {
    if page.lines.is_empty() {
        return DetectedPage::default();
    }

    let (left, right) = match page.bbox {
        Some([x0, _, x1, _]) if x1 > x0 => (x0, x1),
        _ => {
            let left = page.lines.iter().map(|(b, _)| b[0]).min().unwrap_or(0);
            let right = page.lines.iter().map(|(b, _)| b[2]).max().unwrap_or(0);
            (left, right)
        }
    };

    let width = (right.saturating_sub(left)).max(1) as f64 / column_count as f64;
    let tolerance = width * COLUMN_TOLERANCE;
    let column_of = |x: f64| {
        let column = ((x - left as f64) / width).floor();
        column.clamp(0.0, (column_count - 1) as f64) as usize
    };

    let mut lines: Vec<DetectedLine> = page
        .lines
        .into_iter()
        .map(|(bbox, text)| {
            let (x0, x1) = (bbox[0] as f64, bbox[2] as f64);
            let (start, end) = if x1 - x0 > 2.0 * tolerance {
                (x0 + tolerance, x1 - tolerance)
            } else {
                let center = (x0 + x1) / 2.0;
                (center, center)
            };

            let first = column_of(start);
            let column_index = (first == column_of(end)).then_some(first);
            DetectedLine {
                column_index,
                bbox,
                text,
            }
        })
        .collect();

    lines.sort_by_key(|line| match line.column_index {
        Some(column) => (0, column, line.bbox[1], line.bbox[0]),
        None => (1, 0, line.bbox[1], line.bbox[0]),
    });

    DetectedPage { lines }
}
