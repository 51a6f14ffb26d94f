//! Coordinates `PhysicalArchive`/`ArchiveSlice`/`LogicalArchive` factories; owns temp
//! files, pooled resources, and the mmap-release counter.
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use log::{debug, warn};

use crate::archive_slice::ArchiveSlice;
use crate::config::ScanSpec;
use crate::errors::{Error, ErrorKind, Result};
use crate::logical_archive::{CentralDirectoryParser, FastEntry, LogicalArchive};
use crate::manifest::ManifestParser;
use crate::physical_archive::PhysicalArchive;
use crate::recycler::Recycler;
use crate::remote::{download_remote, remote_dest_path};
use crate::singleton_map::SingletonMap;
use crate::util;

/// Deflated nested entries at or above this size are extracted to a temp file rather
/// than inflated directly into memory.
pub const LARGE_ENTRY_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Given a module-path reference, opens a reader for it. Pooled through the handler's
/// recycler mechanism just like the inflater.
pub trait ModuleReaderFactory: Send + Sync {
    fn open(&self, module_ref: &str) -> Result<File>;
}

#[derive(Default)]
pub struct FileModuleReaderFactory;

impl ModuleReaderFactory for FileModuleReaderFactory {
    fn open(&self, module_ref: &str) -> Result<File> {
        File::open(module_ref).map_err(|e| Error::with_chain(e, ErrorKind::NotFound(module_ref.to_string())))
    }
}

pub struct NestedArchiveHandler {
    spec: ScanSpec,
    cd_parser: Arc<dyn CentralDirectoryParser>,
    manifest_parser: Arc<dyn ManifestParser>,
    module_reader_factory: Arc<dyn ModuleReaderFactory>,

    canonical_physicals: SingletonMap<PathBuf, Arc<PhysicalArchive>>,
    additional_physicals: Mutex<Vec<Arc<PhysicalArchive>>>,
    slice_to_archive: SingletonMap<ArchiveSlice, Arc<LogicalArchive>>,
    nested_path_archives: SingletonMap<String, (Arc<LogicalArchive>, String)>,
    fast_entry_to_slice: SingletonMap<(usize, String), ArchiveSlice>,
    allocated_archives: Mutex<Vec<Arc<LogicalArchive>>>,

    inflate_scratch: Recycler<Vec<u8>>,
    module_readers: DashMap<String, Arc<Recycler<File>>>,

    temp_files: Mutex<VecDeque<PathBuf>>,
    mmap_releases: Arc<AtomicU64>,
    closed: AtomicBool,
    session_prefix: String,

    runtime: tokio::runtime::Runtime,
}

impl NestedArchiveHandler {
    pub fn new(spec: ScanSpec) -> Result<Self> {
        Self::with_parsers(
            spec,
            Arc::new(crate::central_directory::ZipCentralDirectoryParser),
            Arc::new(crate::manifest::JarManifestParser),
            Arc::new(FileModuleReaderFactory),
        )
    }

    pub fn with_parsers(
        spec: ScanSpec,
        cd_parser: Arc<dyn CentralDirectoryParser>,
        manifest_parser: Arc<dyn ManifestParser>,
        module_reader_factory: Arc<dyn ModuleReaderFactory>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        Ok(NestedArchiveHandler {
            spec,
            cd_parser,
            manifest_parser,
            module_reader_factory,
            canonical_physicals: SingletonMap::new(),
            additional_physicals: Mutex::new(Vec::new()),
            slice_to_archive: SingletonMap::new(),
            nested_path_archives: SingletonMap::new(),
            fast_entry_to_slice: SingletonMap::new(),
            allocated_archives: Mutex::new(Vec::new()),
            inflate_scratch: Recycler::new(Vec::new),
            module_readers: DashMap::new(),
            temp_files: Mutex::new(VecDeque::new()),
            mmap_releases: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            session_prefix: random_prefix(),
            runtime,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ErrorKind::Closed.into())
        } else {
            Ok(())
        }
    }

    /// Resolves a (possibly nested) archive path of the form `p0!p1!...!pn` to the
    /// logical archive it identifies, plus the intra-archive package root, if any.
    pub fn open(&self, nested_path: &str) -> Result<(Arc<LogicalArchive>, String)> {
        self.check_open()?;
        self.nested_path_archives
            .get(nested_path.to_string(), || self.open_uncached(nested_path))
    }

    fn open_uncached(&self, nested_path: &str) -> Result<(Arc<LogicalArchive>, String)> {
        match nested_path.rsplit_once('!') {
            None => self.open_root(nested_path),
            Some((parent_raw, child_raw)) => self.open_child(parent_raw, child_raw),
        }
    }

    fn open_root(&self, path_str: &str) -> Result<(Arc<LogicalArchive>, String)> {
        let canonical_path = if path_str.starts_with("http://") || path_str.starts_with("https://") {
            if !self.spec.enable_remote_jar_scanning {
                return Err(ErrorKind::Disabled("remote jar scanning").into());
            }
            let dest = remote_dest_path(&self.session_prefix, path_str);
            self.register_temp_file(dest.clone());
            self.runtime.block_on(download_remote(path_str, &dest))?;
            dest
        } else {
            std::fs::canonicalize(path_str)
                .map_err(|e| Error::with_chain(e, ErrorKind::NotFound(path_str.to_string())))?
        };

        if !canonical_path.is_file() {
            return Err(ErrorKind::NotArchive(canonical_path.to_string_lossy().into_owned()).into());
        }

        let mmap_releases = self.mmap_releases.clone();
        let physical = self.canonical_physicals.get(canonical_path.clone(), move || {
            PhysicalArchive::open_file(&canonical_path, mmap_releases.clone()).map(Arc::new)
        })?;

        let slice = ArchiveSlice::whole(physical);
        let archive = self.archive_for_slice(slice)?;
        Ok((archive, String::new()))
    }

    fn open_child(&self, parent_raw: &str, child_raw: &str) -> Result<(Arc<LogicalArchive>, String)> {
        let child_relative = child_raw.trim_start_matches('/');
        let (parent_archive, _parent_root) = self.open(parent_raw)?;

        let trimmed = child_relative.trim_end_matches('/');
        let is_explicit_dir = trimmed.len() != child_relative.len();

        if is_explicit_dir {
            parent_archive.add_classpath_root(trimmed.to_string());
            return Ok((parent_archive, trimmed.to_string()));
        }

        if let Some(entry) = parent_archive.find_entry(trimmed).cloned() {
            if !self.spec.scan_nested_jars {
                return Err(ErrorKind::Disabled("nested archive scanning").into());
            }
            return self.open_nested_entry(&parent_archive, &entry);
        }

        if parent_archive.has_directory_prefix(trimmed) {
            parent_archive.add_classpath_root(trimmed.to_string());
            return Ok((parent_archive, trimmed.to_string()));
        }

        Err(ErrorKind::NotFound(format!("{parent_raw}!{child_raw}")).into())
    }

    fn open_nested_entry(&self, parent: &Arc<LogicalArchive>, entry: &FastEntry) -> Result<(Arc<LogicalArchive>, String)> {
        let key = (Arc::as_ptr(parent) as usize, entry.name.clone());
        let parent_clone = parent.clone();
        let entry_clone = entry.clone();
        let slice = self
            .fast_entry_to_slice
            .get(key, move || self.extract_nested_slice(&parent_clone, &entry_clone))?;
        let archive = self.archive_for_slice(slice)?;
        Ok((archive, String::new()))
    }

    fn archive_for_slice(&self, slice: ArchiveSlice) -> Result<Arc<LogicalArchive>> {
        let spec = self.spec.clone();
        let cd_parser = self.cd_parser.clone();
        let archive = self.slice_to_archive.get(slice.clone(), move || {
            LogicalArchive::parse(slice, &spec, cd_parser.as_ref()).map(Arc::new)
        })?;
        self.allocated_archives.lock().unwrap().push(archive.clone());
        Ok(archive)
    }

    fn extract_nested_slice(&self, parent: &Arc<LogicalArchive>, entry: &FastEntry) -> Result<ArchiveSlice> {
        if !entry.is_deflated {
            return Ok(ArchiveSlice::sub(
                parent.slice.physical.clone(),
                parent.slice.offset + entry.offset,
                entry.compressed_size,
            ));
        }

        let is_large = entry.uncompressed_size == 0
            || entry.uncompressed_size >= LARGE_ENTRY_THRESHOLD
            || entry.compressed_size >= LARGE_ENTRY_THRESHOLD;

        if is_large {
            match self.extract_to_temp_file(parent, entry) {
                Ok(physical) => return Ok(ArchiveSlice::whole(physical)),
                Err(e) => {
                    warn!("extracting '{}' to a temp file failed ({}), falling back to in-memory inflation", entry.name, e);
                }
            }
        }

        self.inflate_to_memory(parent, entry)
    }

    fn inflate_to_memory(&self, parent: &Arc<LogicalArchive>, entry: &FastEntry) -> Result<ArchiveSlice> {
        if entry.uncompressed_size >= crate::physical_archive::CHUNK_SIZE {
            return Err(ErrorKind::TooLarge(entry.name.clone(), entry.uncompressed_size).into());
        }

        let compressed = parent
            .slice
            .physical
            .read_range(parent.slice.offset + entry.offset, entry.compressed_size)?;

        let inflated = self.inflate_scratch.scoped(|scratch| -> Result<Vec<u8>> {
            scratch.clear();
            scratch.reserve(entry.uncompressed_size as usize);
            let mut decoder = flate2::bufread::DeflateDecoder::new(&compressed[..]);
            decoder
                .read_to_end(scratch)
                .map_err(|e| Error::with_chain(e, ErrorKind::Extraction(PathBuf::from(&entry.name))))?;
            Ok(std::mem::take(scratch))
        })??;

        let physical = Arc::new(PhysicalArchive::from_buffer(inflated, self.mmap_releases.clone()));
        self.additional_physicals.lock().unwrap().push(physical.clone());
        Ok(ArchiveSlice::whole(physical))
    }

    fn extract_to_temp_file(&self, parent: &Arc<LogicalArchive>, entry: &FastEntry) -> Result<Arc<PhysicalArchive>> {
        let leaf = entry.name.rsplit('/').next().unwrap_or(&entry.name);
        let temp_path = std::env::temp_dir().join(util::temp_file_name(&self.session_prefix, leaf));
        self.register_temp_file(temp_path.clone());

        let result = (|| -> Result<()> {
            let compressed = parent
                .slice
                .physical
                .read_range(parent.slice.offset + entry.offset, entry.compressed_size)?;
            let file = File::create(&temp_path)
                .map_err(|e| Error::with_chain(e, ErrorKind::Extraction(temp_path.clone())))?;
            let mut writer = flate2::write::DeflateDecoder::new(file);
            std::io::Write::write_all(&mut writer, &compressed)
                .map_err(|e| Error::with_chain(e, ErrorKind::Extraction(temp_path.clone())))?;
            writer
                .finish()
                .map_err(|e| Error::with_chain(e, ErrorKind::Extraction(temp_path.clone())))?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        let mmap_releases = self.mmap_releases.clone();
        let physical = self.canonical_physicals.get(temp_path.clone(), move || {
            PhysicalArchive::open_file(&temp_path, mmap_releases.clone()).map(Arc::new)
        })?;
        self.additional_physicals.lock().unwrap().push(physical.clone());
        Ok(physical)
    }

    fn register_temp_file(&self, path: PathBuf) {
        self.temp_files.lock().unwrap().push_back(path);
    }

    /// Runs `body` with a pooled inflate scratch buffer, returning it to the pool
    /// afterwards. Exposes the same scratch-buffer recycler `inflate_to_memory` uses
    /// internally, for callers that need to inflate bytes outside of `open()`.
    pub fn borrow_inflater<R>(&self, body: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R> {
        self.check_open()?;
        self.inflate_scratch.scoped(body)
    }

    /// Runs `body` with a pooled reader for `module_ref`, returning it to the pool
    /// afterwards.
    pub fn borrow_module_reader<R>(&self, module_ref: &str, body: impl FnOnce(&mut File) -> R) -> Result<R> {
        self.check_open()?;
        let factory = self.module_reader_factory.clone();
        let module_ref_owned = module_ref.to_string();
        let recycler = self
            .module_readers
            .entry(module_ref.to_string())
            .or_insert_with(move || Arc::new(Recycler::new_fallible(move || factory.open(&module_ref_owned))))
            .clone();
        recycler.scoped(body)
    }

    /// Given an archive entry, returns its manifest's `Class-Path:` header value, if any.
    pub fn class_path_of(&self, slice: &ArchiveSlice) -> Result<Option<String>> {
        self.manifest_parser.class_path(slice)
    }

    /// Tears everything down in the order spec'd in the design notes. Idempotent: a
    /// second call is a no-op. Best-effort: every step runs even if an earlier one
    /// failed; the first error encountered (if any) is returned after all steps ran.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut errors: Vec<Error> = Vec::new();

        self.inflate_scratch.force_close();

        for entry in self.module_readers.iter() {
            entry.value().force_close();
        }
        self.module_readers.clear();

        self.slice_to_archive.clear();
        self.nested_path_archives.clear();

        let archives = std::mem::take(&mut *self.allocated_archives.lock().unwrap());
        drop(archives);

        for physical in self.canonical_physicals.values() {
            physical.close();
        }

        let additional = std::mem::take(&mut *self.additional_physicals.lock().unwrap());
        for physical in additional {
            physical.close();
        }

        self.fast_entry_to_slice.clear();

        #[cfg(not(target_os = "linux"))]
        debug!("requesting a gc hint before deleting mapped temp files (non-Linux close path)");

        let mut temp_files = self.temp_files.lock().unwrap();
        while let Some(path) = temp_files.pop_back() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to delete temp file '{}': {}", path.display(), e);
                    errors.push(Error::with_chain(e, ErrorKind::Extraction(path.clone())));
                }
            }
        }

        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for NestedArchiveHandler {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.close();
        }
    }
}

fn random_prefix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tid = format!("{:?}", std::thread::current().id());
    format!("{:x}{:x}", nanos, simple_hash(&tid))
}

fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
