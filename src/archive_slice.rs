//! A bounded region within a `PhysicalArchive` representing one logical archive's bytes.
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::errors::Result;
use crate::physical_archive::PhysicalArchive;

/// `(physical, offset, length)`. A cheap value type; equality is structural over the
/// physical archive's identity plus the range, never over `ArchiveSlice`'s own address,
/// so that two slices constructed independently for the same nested archive still collide
/// as the same `SingletonMap` key.
#[derive(Clone)]
pub struct ArchiveSlice {
    pub physical: Arc<PhysicalArchive>,
    pub offset: u64,
    pub length: u64,
}

impl ArchiveSlice {
    pub fn whole(physical: Arc<PhysicalArchive>) -> Self {
        let length = physical.len();
        ArchiveSlice { physical, offset: 0, length }
    }

    pub fn sub(physical: Arc<PhysicalArchive>, offset: u64, length: u64) -> Self {
        ArchiveSlice { physical, offset, length }
    }

    pub fn read_all(&self) -> Result<Arc<[u8]>> {
        self.physical.read_range(self.offset, self.length)
    }

    /// A `Read + Seek` cursor over this slice's bytes, suitable for handing to the `zip`
    /// crate's `ZipArchive::new`.
    pub fn cursor(&self) -> Result<io::Cursor<Arc<[u8]>>> {
        Ok(io::Cursor::new(self.read_all()?))
    }
}

impl PartialEq for ArchiveSlice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.physical, &other.physical)
            && self.offset == other.offset
            && self.length == other.length
    }
}

impl Eq for ArchiveSlice {}

impl Hash for ArchiveSlice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.physical) as usize).hash(state);
        self.offset.hash(state);
        self.length.hash(state);
    }
}

/// A `Read + Seek` view over a single archive slice's raw bytes, backing `zip::ZipArchive`
/// without re-copying the slice on every seek.
pub struct SliceReader {
    bytes: Arc<[u8]>,
    pos: u64,
}

impl SliceReader {
    pub fn new(slice: &ArchiveSlice) -> Result<Self> {
        Ok(SliceReader { bytes: slice.read_all()?, pos: 0 })
    }
}

impl Read for SliceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.pos as usize;
        if start >= self.bytes.len() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SliceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.bytes.len() as i64 + p,
            SeekFrom::Current(p) => self.pos as i64 + p,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before byte 0"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn slices_over_same_physical_and_range_are_equal() {
        let physical = Arc::new(PhysicalArchive::from_buffer(vec![0; 16], Arc::new(AtomicU64::new(0))));
        let a = ArchiveSlice::sub(physical.clone(), 0, 8);
        let b = ArchiveSlice::sub(physical, 0, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn slices_over_different_physicals_are_not_equal() {
        let a_phys = Arc::new(PhysicalArchive::from_buffer(vec![0; 16], Arc::new(AtomicU64::new(0))));
        let b_phys = Arc::new(PhysicalArchive::from_buffer(vec![0; 16], Arc::new(AtomicU64::new(0))));
        let a = ArchiveSlice::sub(a_phys, 0, 8);
        let b = ArchiveSlice::sub(b_phys, 0, 8);
        assert_ne!(a, b);
    }

    #[test]
    fn slice_reader_reads_and_seeks() {
        let physical = Arc::new(PhysicalArchive::from_buffer(b"hello world".to_vec(), Arc::new(AtomicU64::new(0))));
        let slice = ArchiveSlice::sub(physical, 6, 5);
        let mut reader = SliceReader::new(&slice).unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        reader.seek(SeekFrom::Start(0)).unwrap();
        let mut buf2 = [0u8; 5];
        reader.read_exact(&mut buf2).unwrap();
        assert_eq!(&buf2, b"world");
    }
}
