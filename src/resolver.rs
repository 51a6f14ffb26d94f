//! The concurrent, priority-ordered classpath resolver.
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, trace, warn};
use rayon::ThreadPoolBuilder;

use crate::archive_slice::ArchiveSlice;
use crate::config::ScanSpec;
use crate::errors::{Error, ErrorKind, Result};
use crate::manifest::ManifestParser;
use crate::order_key::OrderKey;
use crate::physical_archive::PhysicalArchive;
use crate::util;

/// A positionally-derived classpath entry awaiting validation.
#[derive(Debug, Clone)]
pub struct OrderedClasspathElement {
    pub order_key: OrderKey,
    pub parent_path: PathBuf,
    pub raw_path: String,
}

impl PartialEq for OrderedClasspathElement {
    fn eq(&self, other: &Self) -> bool {
        self.order_key == other.order_key
    }
}
impl Eq for OrderedClasspathElement {}
impl PartialOrd for OrderedClasspathElement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedClasspathElement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key.cmp(&other.order_key)
    }
}

#[derive(Debug, Clone)]
struct ValidElement {
    order_key: OrderKey,
    canonical_path: PathBuf,
}
impl PartialEq for ValidElement {
    fn eq(&self, other: &Self) -> bool {
        self.order_key == other.order_key
    }
}
impl Eq for ValidElement {}
impl PartialOrd for ValidElement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ValidElement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order_key.cmp(&other.order_key)
    }
}

/// Shared concurrent state for one `resolve()` run.
struct ResolverState {
    queue: Mutex<BinaryHeap<Reverse<OrderedClasspathElement>>>,
    queue_cv: Condvar,
    remaining: AtomicUsize,
    path_to_earliest_key: DashMap<PathBuf, OrderKey>,
    known_jre_paths: DashMap<PathBuf, bool>,
    valid_out: Mutex<BinaryHeap<Reverse<ValidElement>>>,
    kill_all: AtomicBool,
}

impl ResolverState {
    fn new() -> Self {
        ResolverState {
            queue: Mutex::new(BinaryHeap::new()),
            queue_cv: Condvar::new(),
            remaining: AtomicUsize::new(0),
            path_to_earliest_key: DashMap::new(),
            known_jre_paths: DashMap::new(),
            valid_out: Mutex::new(BinaryHeap::new()),
            kill_all: AtomicBool::new(false),
        }
    }

    fn push(&self, element: OrderedClasspathElement) {
        self.queue.lock().unwrap().push(Reverse(element));
        self.queue_cv.notify_all();
    }

    /// Blocks (on a bounded wait, re-checked periodically — never a busy spin) until a
    /// work unit is available, the queue is provably drained, or cancellation is set.
    fn pop_wait(&self) -> Option<OrderedClasspathElement> {
        let mut guard = self.queue.lock().unwrap();
        loop {
            if self.kill_all.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(Reverse(item)) = guard.pop() {
                return Some(item);
            }
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return None;
            }
            let (g, _timeout) = self.queue_cv.wait_timeout(guard, Duration::from_millis(50)).unwrap();
            guard = g;
        }
    }
}

/// Produces the deduplicated, canonicalized, precedence-ordered classpath from a raw
/// classpath entry list, expanding manifest `Class-Path` references as it goes.
pub struct ClasspathResolver {
    spec: ScanSpec,
    manifest_parser: Arc<dyn ManifestParser>,
    jobs: usize,
}

impl ClasspathResolver {
    pub fn new(spec: ScanSpec, manifest_parser: Arc<dyn ManifestParser>) -> Self {
        let jobs = spec.resolved_jobs();
        ClasspathResolver { spec, manifest_parser, jobs }
    }

    /// `cwd` is the directory top-level relative classpath entries are resolved against.
    pub fn resolve(&self, raw_classpath: &[String], cwd: &Path) -> Result<Vec<PathBuf>> {
        let state = Arc::new(ResolverState::new());

        for (i, raw) in raw_classpath.iter().enumerate() {
            state.remaining.fetch_add(1, Ordering::SeqCst);
            state.push(OrderedClasspathElement {
                order_key: OrderKey::root(i),
                parent_path: cwd.to_path_buf(),
                raw_path: raw.clone(),
            });
        }

        let outcome = if self.jobs <= 1 {
            self.worker_loop(&state)
        } else {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.jobs - 1)
                .build()
                .map_err(|_| Error::from(ErrorKind::Interrupted))?;
            let mut caller_result = Ok(());
            pool.scope(|scope| {
                for _ in 0..self.jobs - 1 {
                    scope.spawn(|_| {
                        let _ = self.worker_loop(&state);
                    });
                }
                caller_result = self.worker_loop(&state);
            });
            caller_result
        };

        state.kill_all.store(true, Ordering::SeqCst);
        state.queue_cv.notify_all();
        outcome?;

        Ok(self.drain_ordered(&state))
    }

    fn worker_loop(&self, state: &ResolverState) -> Result<()> {
        loop {
            let item = match state.pop_wait() {
                Some(item) => item,
                None => return Ok(()),
            };
            let result = self.process_item(state, item);
            state.remaining.fetch_sub(1, Ordering::SeqCst);
            state.queue_cv.notify_all();
            if let Err(e) = result {
                state.kill_all.store(true, Ordering::SeqCst);
                state.queue_cv.notify_all();
                return Err(e);
            }
        }
    }

    fn process_item(&self, state: &ResolverState, item: OrderedClasspathElement) -> Result<()> {
        let canonical = match self.validate(state, &item) {
            Some(path) => path,
            None => return Ok(()),
        };

        state.valid_out.lock().unwrap().push(Reverse(ValidElement {
            order_key: item.order_key.clone(),
            canonical_path: canonical.clone(),
        }));

        if canonical.is_file() {
            self.expand_manifest(state, &item, &canonical);
        }

        Ok(())
    }

    fn validate(&self, state: &ResolverState, item: &OrderedClasspathElement) -> Option<PathBuf> {
        let resolved = util::resolve_against(&item.parent_path, Path::new(&item.raw_path));
        let canonical = match std::fs::canonicalize(&resolved) {
            Ok(c) => c,
            Err(_) => {
                debug!("rejecting classpath entry '{}': does not exist", resolved.display());
                return None;
            }
        };

        if !canonical.is_file() && !canonical.is_dir() {
            debug!("rejecting classpath entry '{}': neither a file nor a directory", canonical.display());
            return None;
        }

        if self.spec.blacklist_system_jars && self.is_system_path(state, &canonical) {
            debug!("rejecting classpath entry '{}': under a known JRE path", canonical.display());
            return None;
        }

        match state.path_to_earliest_key.entry(canonical.clone()) {
            Entry::Occupied(mut e) => {
                if *e.get() <= item.order_key {
                    debug!("rejecting classpath entry '{}': already claimed by an earlier entry", canonical.display());
                    return None;
                }
                e.insert(item.order_key.clone());
            }
            Entry::Vacant(e) => {
                e.insert(item.order_key.clone());
            }
        }

        Some(canonical)
    }

    fn is_system_path(&self, state: &ResolverState, canonical: &Path) -> bool {
        let parent = canonical.parent().unwrap_or(canonical).to_path_buf();
        if let Some(known) = state.known_jre_paths.get(&parent) {
            return *known;
        }
        let is_system = parent.components().any(|c| {
            let s = c.as_os_str().to_string_lossy();
            s.eq_ignore_ascii_case("jre") || s.eq_ignore_ascii_case("jvm")
        }) || std::env::var_os("JAVA_HOME")
            .map(PathBuf::from)
            .and_then(|home| std::fs::canonicalize(&home).ok())
            .map(|home| parent.starts_with(&home))
            .unwrap_or(false);
        state.known_jre_paths.insert(parent, is_system);
        is_system
    }

    fn expand_manifest(&self, state: &ResolverState, item: &OrderedClasspathElement, canonical: &Path) {
        let physical = match PhysicalArchive::open_file(canonical, Arc::new(AtomicU64::new(0))) {
            Ok(p) => p,
            Err(_) => return,
        };
        let slice = ArchiveSlice::whole(Arc::new(physical));

        let class_path = match self.manifest_parser.class_path(&slice) {
            Ok(Some(cp)) => cp,
            Ok(None) => return,
            Err(e) => {
                trace!("no manifest Class-Path expansion for '{}': {}", canonical.display(), e);
                return;
            }
        };

        let base_dir = canonical.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        for (i, child) in class_path.split_whitespace().enumerate() {
            state.remaining.fetch_add(1, Ordering::SeqCst);
            state.push(OrderedClasspathElement {
                order_key: item.order_key.child(i),
                parent_path: base_dir.clone(),
                raw_path: child.to_string(),
            });
        }
    }

    fn drain_ordered(&self, state: &ResolverState) -> Vec<PathBuf> {
        let mut heap = state.valid_out.lock().unwrap();
        let mut emitted = HashSet::new();
        let mut out = Vec::new();
        while let Some(Reverse(element)) = heap.pop() {
            if emitted.insert(element.canonical_path.clone()) {
                out.push(element.canonical_path);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::JarManifestParser;
    use std::fs;
    use std::io::Write;

    fn resolver(spec: ScanSpec) -> ClasspathResolver {
        ClasspathResolver::new(spec, Arc::new(JarManifestParser))
    }

    #[test]
    fn flat_classpath_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jar"), b"a").unwrap();
        fs::write(dir.path().join("b.jar"), b"b").unwrap();

        let result = resolver(ScanSpec { blacklist_system_jars: false, ..ScanSpec::default() })
            .resolve(&["a.jar".to_string(), "b.jar".to_string()], dir.path())
            .unwrap();

        assert_eq!(result, vec![dir.path().join("a.jar"), dir.path().join("b.jar")]);
    }

    #[test]
    fn duplicate_entries_dedup_to_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jar"), b"a").unwrap();

        let result = resolver(ScanSpec { blacklist_system_jars: false, ..ScanSpec::default() })
            .resolve(&["a.jar".to_string(), "./a.jar".to_string()], dir.path())
            .unwrap();

        assert_eq!(result, vec![dir.path().join("a.jar")]);
    }

    fn write_jar_with_class_path(path: &Path, class_path: &str) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer.start_file("META-INF/MANIFEST.MF", zip::write::FileOptions::default()).unwrap();
        writer
            .write_all(format!("Manifest-Version: 1.0\nClass-Path: {}\n", class_path).as_bytes())
            .unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn manifest_class_path_is_inserted_after_its_referrer() {
        let dir = tempfile::tempdir().unwrap();
        write_jar_with_class_path(&dir.path().join("a.jar"), "c.jar d.jar");
        fs::write(dir.path().join("b.jar"), b"b").unwrap();
        fs::write(dir.path().join("c.jar"), b"c").unwrap();
        fs::write(dir.path().join("d.jar"), b"d").unwrap();

        let result = resolver(ScanSpec { blacklist_system_jars: false, ..ScanSpec::default() })
            .resolve(&["a.jar".to_string(), "b.jar".to_string()], dir.path())
            .unwrap();

        assert_eq!(
            result,
            vec![
                dir.path().join("a.jar"),
                dir.path().join("c.jar"),
                dir.path().join("d.jar"),
                dir.path().join("b.jar"),
            ]
        );
    }

    #[test]
    fn system_jars_are_blacklisted() {
        let dir = tempfile::tempdir().unwrap();
        let jvm_dir = dir.path().join("usr/lib/jvm/java-17/lib");
        fs::create_dir_all(&jvm_dir).unwrap();
        fs::write(jvm_dir.join("rt.jar"), b"rt").unwrap();
        fs::write(dir.path().join("app.jar"), b"app").unwrap();

        let result = resolver(ScanSpec::default())
            .resolve(
                &[
                    jvm_dir.join("rt.jar").to_string_lossy().into_owned(),
                    "app.jar".to_string(),
                ],
                dir.path(),
            )
            .unwrap();

        assert_eq!(result, vec![dir.path().join("app.jar")]);
    }

    proptest::proptest! {
        /// Any permutation-free flat classpath of distinct files, with no manifest
        /// references, comes back in the same positional order.
        #[test]
        fn flat_classpath_of_distinct_files_preserves_order(count in 1usize..12) {
            let dir = tempfile::tempdir().unwrap();
            let mut names = Vec::new();
            for i in 0..count {
                let name = format!("entry-{i}.jar");
                fs::write(dir.path().join(&name), format!("contents-{i}").as_bytes()).unwrap();
                names.push(name);
            }

            let result = resolver(ScanSpec { blacklist_system_jars: false, ..ScanSpec::default() })
                .resolve(&names, dir.path())
                .unwrap();

            let expected: Vec<PathBuf> = names.iter().map(|n| dir.path().join(n)).collect();
            proptest::prop_assert_eq!(result, expected);
        }

        /// Repeating any entry in the raw classpath never changes the deduplicated
        /// output versus the classpath with duplicates removed (first occurrence kept).
        #[test]
        fn repeating_an_entry_does_not_change_the_deduplicated_result(
            count in 1usize..8,
            repeat_at in 0usize..8,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut names = Vec::new();
            for i in 0..count {
                let name = format!("entry-{i}.jar");
                fs::write(dir.path().join(&name), format!("contents-{i}").as_bytes()).unwrap();
                names.push(name);
            }

            let repeat_at = repeat_at % count;
            let mut with_duplicate = names.clone();
            with_duplicate.insert(repeat_at, names[repeat_at].clone());

            let spec = ScanSpec { blacklist_system_jars: false, ..ScanSpec::default() };
            let baseline = resolver(spec.clone()).resolve(&names, dir.path()).unwrap();
            let with_dup_result = resolver(spec).resolve(&with_duplicate, dir.path()).unwrap();

            proptest::prop_assert_eq!(baseline, with_dup_result);
        }
    }
}
