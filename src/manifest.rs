//! The manifest-parser external collaborator: given an archive file, returns its
//! `Class-Path:` header value, if any.
use std::io::Read;

use crate::archive_slice::{ArchiveSlice, SliceReader};
use crate::errors::{Error, ErrorKind, Result};

pub trait ManifestParser: Send + Sync {
    /// Returns the raw, space-delimited `Class-Path` header value of the archive's
    /// manifest, or `None` if the archive has no manifest or no such header.
    fn class_path(&self, slice: &ArchiveSlice) -> Result<Option<String>>;
}

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

#[derive(Default)]
pub struct JarManifestParser;

impl ManifestParser for JarManifestParser {
    fn class_path(&self, slice: &ArchiveSlice) -> Result<Option<String>> {
        let reader = SliceReader::new(slice)?;
        let path_for_errors = slice
            .physical
            .canonical_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<in-memory archive>".to_string());

        let mut archive = match zip::ZipArchive::new(reader) {
            Ok(a) => a,
            Err(_) => return Ok(None),
        };

        let mut manifest_file = match archive.by_name(MANIFEST_PATH) {
            Ok(f) => f,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(Error::with_chain(e, ErrorKind::ParseManifest(path_for_errors))),
        };

        let mut contents = String::new();
        manifest_file
            .read_to_string(&mut contents)
            .map_err(|e| Error::with_chain(e, ErrorKind::ParseManifest(path_for_errors.clone())))?;

        Ok(extract_class_path(&contents))
    }
}

/// Unfolds the manifest's 72-column continuation format (a continuation line starts with
/// a single space, and its leading space is removed before concatenation) and extracts the
/// `Class-Path:` header value.
fn extract_class_path(manifest: &str) -> Option<String> {
    let unfolded = unfold_continuations(manifest);
    for line in unfolded.lines() {
        if let Some(value) = line.strip_prefix("Class-Path:") {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn unfold_continuations(manifest: &str) -> String {
    let mut out = String::with_capacity(manifest.len());
    for line in manifest.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix(' ') {
            out.push_str(rest);
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
    }
    out
}
