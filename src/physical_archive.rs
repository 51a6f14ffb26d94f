//! Owns a byte source (a memory-mapped file or an in-memory buffer) and exposes
//! random-access, chunked views over it.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use memmap2::{Mmap, MmapOptions};

use crate::errors::{Error, ErrorKind, Result};
use crate::singleton_map::SingletonMap;

/// Each individual mapping is bounded to this span because the platform mapping
/// primitive on some targets cannot address a single region larger than `u32::MAX`.
pub const CHUNK_SIZE: u64 = 1u64 << 32;

enum Backing {
    /// A file, mapped lazily and on demand, one `SingletonMap`-guarded chunk at a time.
    File { file: File, path: PathBuf, chunks: SingletonMap<usize, Arc<Mmap>> },
    /// An in-memory buffer, e.g. the inflated contents of a small nested archive.
    Memory(Arc<Vec<u8>>),
}

/// A source of archive bytes. Equality/hash are by canonical file identity for file-backed
/// archives, or by the identity of the owning buffer for memory-backed ones, matching the
/// "structural, not reference" equality spec for `SingletonMap` keys.
pub struct PhysicalArchive {
    backing: Backing,
    len: u64,
    handler_mmap_releases: Arc<AtomicU64>,
}

impl PhysicalArchive {
    /// Opens `path` as a file-backed archive. The file is not mapped yet; chunks are
    /// mapped lazily on first access via `chunk`.
    pub fn open_file(path: &Path, handler_mmap_releases: Arc<AtomicU64>) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::with_chain(e, ErrorKind::NotFound(path.to_string_lossy().into_owned())))?;
        let len = file
            .metadata()
            .map_err(|e| Error::with_chain(e, ErrorKind::NotFound(path.to_string_lossy().into_owned())))?
            .len();
        Ok(PhysicalArchive {
            backing: Backing::File {
                file,
                path: path.to_path_buf(),
                chunks: SingletonMap::new(),
            },
            len,
            handler_mmap_releases,
        })
    }

    /// Wraps an in-memory buffer (e.g. an inflated small nested archive) as a physical
    /// archive. The whole buffer is one chunk.
    pub fn from_buffer(buffer: Vec<u8>, handler_mmap_releases: Arc<AtomicU64>) -> Self {
        let len = buffer.len() as u64;
        PhysicalArchive {
            backing: Backing::Memory(Arc::new(buffer)),
            len,
            handler_mmap_releases,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bytes in `[offset, offset + length)`. The returned slice may span a
    /// chunk boundary only if `length <= CHUNK_SIZE` and the whole range sits inside a
    /// single chunk; callers (ArchiveSlice) already guarantee ranges stay within one
    /// physical archive's addressable span.
    pub fn read_range(&self, offset: u64, length: u64) -> Result<Arc<[u8]>> {
        match &self.backing {
            Backing::Memory(buf) => {
                let start = offset as usize;
                let end = start + length as usize;
                Ok(Arc::from(&buf[start..end]))
            }
            Backing::File { path, .. } => {
                let chunk_index = (offset / CHUNK_SIZE) as usize;
                let chunk_offset = offset % CHUNK_SIZE;
                let mmap = self.chunk(chunk_index, path)?;
                let start = chunk_offset as usize;
                let end = start + length as usize;
                if end > mmap.len() {
                    return Err(ErrorKind::NotArchive(path.to_string_lossy().into_owned()).into());
                }
                Ok(Arc::from(&mmap[start..end]))
            }
        }
    }

    fn chunk(&self, index: usize, path: &Path) -> Result<Arc<Mmap>> {
        let (file, chunks) = match &self.backing {
            Backing::File { file, chunks, .. } => (file, chunks),
            Backing::Memory(_) => unreachable!("memory-backed archives never chunk"),
        };
        let chunk_start = index as u64 * CHUNK_SIZE;
        let chunk_len = std::cmp::min(CHUNK_SIZE, self.len.saturating_sub(chunk_start));
        chunks.get(index, || {
            let map = unsafe {
                MmapOptions::new()
                    .offset(chunk_start)
                    .len(chunk_len as usize)
                    .map(file)
            };
            let map = match map {
                Ok(m) => m,
                Err(_first_err) => {
                    // A single retry after the mapping failed once; some platforms return
                    // transient failures under memory pressure.
                    unsafe {
                        MmapOptions::new()
                            .offset(chunk_start)
                            .len(chunk_len as usize)
                            .map(file)
                    }
                    .map_err(|e| Error::with_chain(e, ErrorKind::Mapping(path.to_path_buf())))?
                }
            };
            Ok(Arc::new(map))
        })
    }

    /// Releases all mapped chunks. Idempotent: a second call finds nothing left to drop.
    pub fn close(&self) {
        if let Backing::File { chunks, .. } = &self.backing {
            let released = chunks.len() as u64;
            chunks.clear();
            if released > 0 {
                let total = self.handler_mmap_releases.fetch_add(released, Ordering::SeqCst) + released;
                maybe_request_gc(total, released);
            }
        }
    }

    pub fn canonical_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => Some(path),
            Backing::Memory(_) => None,
        }
    }
}

/// Every 20000th mmap chunk release, ask the platform to reclaim address space, since on
/// Linux unmapping is otherwise tied to deferred cleanup rather than happening immediately.
/// This is an advisory pressure-relief heuristic, not part of any correctness contract.
fn maybe_request_gc(total_releases: u64, just_released: u64) {
    #[cfg(target_os = "linux")]
    {
        let before = total_releases - just_released;
        if before / 20000 != total_releases / 20000 {
            warn!("mmap release counter crossed a 20000 boundary ({total_releases} total); requesting a gc hint");
            // There is no direct "unmap now" syscall exposed to safe Rust; dropping the
            // last Arc<Mmap> reference (done by `chunks.clear()` above) is what actually
            // triggers munmap. This log line exists purely so operators can see the
            // pressure-relief heuristic firing, mirroring the handler's own use of it.
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (total_releases, just_released);
    }
}
