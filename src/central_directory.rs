//! Default `CentralDirectoryParser` built on the `zip` crate.
use zip::ZipArchive;

use crate::archive_slice::{ArchiveSlice, SliceReader};
use crate::config::ScanSpec;
use crate::errors::{Error, ErrorKind, Result};
use crate::logical_archive::{CentralDirectoryParser, FastEntry};

#[derive(Default)]
pub struct ZipCentralDirectoryParser;

impl CentralDirectoryParser for ZipCentralDirectoryParser {
    fn parse(&self, slice: &ArchiveSlice, _spec: &ScanSpec) -> Result<Vec<FastEntry>> {
        let reader = SliceReader::new(slice)?;
        let path_for_errors = slice
            .physical
            .canonical_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<in-memory archive>".to_string());

        let mut archive = ZipArchive::new(reader)
            .map_err(|e| Error::with_chain(e, ErrorKind::ParseCentralDirectory(path_for_errors.clone())))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| Error::with_chain(e, ErrorKind::ParseCentralDirectory(path_for_errors.clone())))?;
            entries.push(FastEntry {
                name: entry.name().to_string(),
                offset: entry.data_start(),
                compressed_size: entry.compressed_size(),
                uncompressed_size: entry.size(),
                is_deflated: entry.compression() != zip::CompressionMethod::Stored,
            });
        }
        Ok(entries)
    }
}
