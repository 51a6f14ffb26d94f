//! A parsed archive (central directory loaded) layered atop an `ArchiveSlice`.
use std::collections::HashSet;
use std::sync::RwLock;

use crate::archive_slice::ArchiveSlice;
use crate::config::ScanSpec;
use crate::errors::Result;

/// Leaf descriptor inside a `LogicalArchive`. Holds no bytes of its own; callers read its
/// content through the owning `LogicalArchive`'s slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastEntry {
    pub name: String,
    /// Byte offset of this entry's (possibly compressed) data within its archive slice.
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub is_deflated: bool,
}

impl FastEntry {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Given an archive slice, returns the ordered list of entries in its central directory.
/// This is the external collaborator from the "central-directory parser" contract; a
/// default `zip`-backed implementation lives in `central_directory.rs`.
pub trait CentralDirectoryParser: Send + Sync {
    fn parse(&self, slice: &ArchiveSlice, spec: &ScanSpec) -> Result<Vec<FastEntry>>;
}

/// A parsed view over an `ArchiveSlice`: its entries, plus a mutable set of intra-archive
/// directory prefixes to be treated as classpath roots (populated as the resolver/handler
/// discovers directory-valued nested paths within this archive).
pub struct LogicalArchive {
    pub slice: ArchiveSlice,
    pub entries: Vec<FastEntry>,
    classpath_roots: RwLock<HashSet<String>>,
}

impl LogicalArchive {
    pub fn parse(slice: ArchiveSlice, spec: &ScanSpec, parser: &dyn CentralDirectoryParser) -> Result<Self> {
        let entries = parser.parse(&slice, spec)?;
        Ok(LogicalArchive { slice, entries, classpath_roots: RwLock::new(HashSet::new()) })
    }

    pub fn find_entry(&self, name: &str) -> Option<&FastEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// True if some entry's name begins with `prefix` followed by `/`, i.e. `prefix`
    /// denotes a directory within this archive even though it has no entry of its own.
    pub fn has_directory_prefix(&self, prefix: &str) -> bool {
        let with_slash = format!("{prefix}/");
        self.entries.iter().any(|e| e.name.starts_with(&with_slash))
    }

    pub fn add_classpath_root(&self, root: String) {
        if !root.is_empty() {
            self.classpath_roots.write().unwrap().insert(root);
        }
    }

    pub fn classpath_roots(&self) -> HashSet<String> {
        self.classpath_roots.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical_archive::PhysicalArchive;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    struct FixedEntries(Vec<FastEntry>);
    impl CentralDirectoryParser for FixedEntries {
        fn parse(&self, _slice: &ArchiveSlice, _spec: &ScanSpec) -> Result<Vec<FastEntry>> {
            Ok(self.0.clone())
        }
    }

    fn entry(name: &str) -> FastEntry {
        FastEntry { name: name.to_string(), offset: 0, compressed_size: 0, uncompressed_size: 0, is_deflated: false }
    }

    #[test]
    fn finds_entry_by_exact_name_and_directory_prefix() {
        let physical = Arc::new(PhysicalArchive::from_buffer(vec![], Arc::new(AtomicU64::new(0))));
        let slice = ArchiveSlice::whole(physical);
        let parser = FixedEntries(vec![entry("com/Foo.class"), entry("com/bar/Baz.class")]);
        let archive = LogicalArchive::parse(slice, &ScanSpec::default(), &parser).unwrap();

        assert!(archive.find_entry("com/Foo.class").is_some());
        assert!(archive.find_entry("com").is_none());
        assert!(archive.has_directory_prefix("com"));
        assert!(archive.has_directory_prefix("com/bar"));
        assert!(!archive.has_directory_prefix("org"));
    }

    #[test]
    fn classpath_roots_accumulate() {
        let physical = Arc::new(PhysicalArchive::from_buffer(vec![], Arc::new(AtomicU64::new(0))));
        let slice = ArchiveSlice::whole(physical);
        let parser = FixedEntries(vec![]);
        let archive = LogicalArchive::parse(slice, &ScanSpec::default(), &parser).unwrap();

        archive.add_classpath_root("com/acme".to_string());
        archive.add_classpath_root(String::new());
        assert_eq!(archive.classpath_roots().len(), 1);
    }
}
