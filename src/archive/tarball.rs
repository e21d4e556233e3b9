//! Streaming reader for gzip-compressed tar archives of hOCR pages

use super::source::{ArchiveError, PageName, PageSource};
use crate::types::{PageRecord, VolumeManifest};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on the buffer reserved from an entry's declared size
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Byte stream under the tar reader (gzip or already decompressed)
enum ArchiveStream<R: BufRead> {
    Gzip(GzDecoder<R>),
    Plain(R),
}

impl<R: BufRead> ArchiveStream<R> {
    /// Sniff the gzip magic bytes without consuming them
    fn detect(mut reader: R) -> std::io::Result<Self> {
        let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        if is_gzip {
            Ok(ArchiveStream::Gzip(GzDecoder::new(reader)))
        } else {
            Ok(ArchiveStream::Plain(reader))
        }
    }
}

impl<R: BufRead> Read for ArchiveStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ArchiveStream::Gzip(decoder) => decoder.read(buf),
            ArchiveStream::Plain(reader) => reader.read(buf),
        }
    }
}

/// Page source over one volume's `.tar.gz` archive.
///
/// Entries are decompressed and demultiplexed on demand; only the entry
/// currently being read is held in memory.
pub struct TarballSource<R: BufRead> {
    name: String,
    volume: Arc<VolumeManifest>,
    archive: tar::Archive<ArchiveStream<R>>,
}

impl TarballSource<BufReader<File>> {
    /// Open a volume archive from disk
    pub fn open(path: impl AsRef<Path>, volume: Arc<VolumeManifest>) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let file = File::open(path).map_err(|source| ArchiveError::Open {
            path: name.clone(),
            source,
        })?;
        let reader = BufReader::with_capacity(1024 * 1024, file); // 1MB buffer

        Self::from_reader(reader, volume, name)
    }
}

impl<R: BufRead + Send> TarballSource<R> {
    /// Wrap an arbitrary byte stream holding a (possibly gzipped) tar archive
    pub fn from_reader(
        reader: R,
        volume: Arc<VolumeManifest>,
        name: impl Into<String>,
    ) -> Result<Self, ArchiveError> {
        let name = name.into();
        let stream = ArchiveStream::detect(reader).map_err(|source| ArchiveError::Corrupt {
            archive: name.clone(),
            source,
        })?;

        Ok(Self {
            name,
            volume,
            archive: tar::Archive::new(stream),
        })
    }

    /// Volume this archive belongs to
    pub fn volume(&self) -> &Arc<VolumeManifest> {
        &self.volume
    }
}

impl<R: BufRead + Send> PageSource for TarballSource<R> {
    fn iter_pages(&mut self) -> Box<dyn Iterator<Item = Result<PageRecord, ArchiveError>> + '_> {
        let entries = self.archive.entries().map_err(|source| ArchiveError::Corrupt {
            archive: self.name.clone(),
            source,
        });

        Box::new(TarballPages {
            archive_name: &self.name,
            volume: &self.volume,
            entries: Some(entries),
        })
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

/// Iterator over the page entries of one archive
struct TarballPages<'a, R: BufRead> {
    archive_name: &'a str,
    volume: &'a Arc<VolumeManifest>,
    /// `None` once exhausted or after an error has been yielded
    entries: Option<Result<tar::Entries<'a, ArchiveStream<R>>, ArchiveError>>,
}

impl<'a, R: BufRead> TarballPages<'a, R> {
    fn read_page(
        &self,
        mut entry: tar::Entry<'a, ArchiveStream<R>>,
        entry_name: String,
        page: PageName,
    ) -> Result<PageRecord, ArchiveError> {
        let mut bytes = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ArchiveError::Entry {
                archive: self.archive_name.to_string(),
                entry: entry_name,
                source,
            })?;

        Ok(PageRecord {
            volume: Arc::clone(self.volume),
            raw_text: String::from_utf8_lossy(&bytes).into_owned(),
            page_num: page.page_num,
            image_id: page.image_id,
            page_uuid: page.page_uuid,
        })
    }
}

impl<'a, R: BufRead> Iterator for TarballPages<'a, R> {
    type Item = Result<PageRecord, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if matches!(self.entries, Some(Err(_))) {
                // Opening the entry stream failed; yield that error once
                return match self.entries.take() {
                    Some(Err(e)) => Some(Err(e)),
                    _ => None,
                };
            }

            let entries = match self.entries.as_mut()? {
                Ok(entries) => entries,
                Err(_) => return None,
            };

            let entry = match entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(source)) => {
                    self.entries = None;
                    return Some(Err(ArchiveError::Corrupt {
                        archive: self.archive_name.to_string(),
                        source,
                    }));
                }
                None => {
                    self.entries = None;
                    return None;
                }
            };

            let entry_name = match entry.path() {
                Ok(path) => path.to_string_lossy().into_owned(),
                Err(source) => {
                    self.entries = None;
                    return Some(Err(ArchiveError::Corrupt {
                        archive: self.archive_name.to_string(),
                        source,
                    }));
                }
            };

            if !entry_name.ends_with(super::PAGE_SUFFIX) {
                continue;
            }

            let Some(page) = PageName::parse(&entry_name) else {
                warn!("Skipping page with unexpected file name: {}", entry_name);
                continue;
            };

            debug!("Reading page {} from {}", page.page_num, self.archive_name);
            let result = self.read_page(entry, entry_name, page);
            if result.is_err() {
                self.entries = None;
            }
            return Some(result);
        }
    }
}
