//! Resolves the classpath entries given on the command line and opens each of the
//! resulting archives, printing their entry counts. Run with e.g.
//! `cargo run --example resolve_classpath -- lib/a.jar lib/b.jar`.
use std::sync::Arc;

use classpath_core::config::ScanSpec;
use classpath_core::handler::NestedArchiveHandler;
use classpath_core::manifest::JarManifestParser;
use classpath_core::resolver::ClasspathResolver;

fn main() {
    env_logger::init();

    let entries: Vec<String> = std::env::args().skip(1).collect();
    if entries.is_empty() {
        eprintln!("usage: resolve_classpath <entry> [entry ...]");
        std::process::exit(2);
    }

    let spec = ScanSpec::default();
    let cwd = std::env::current_dir().expect("current directory is accessible");

    let resolver = ClasspathResolver::new(spec.clone(), Arc::new(JarManifestParser));
    let resolved = resolver.resolve(&entries, &cwd).expect("classpath resolution failed");

    let handler = NestedArchiveHandler::new(spec).expect("handler initialization failed");
    for path in &resolved {
        match handler.open(&path.to_string_lossy()) {
            Ok((archive, root)) => {
                println!("{}  ({} entries, root='{}')", path.display(), archive.entries.len(), root);
            }
            Err(e) => {
                println!("{}  (failed to open: {})", path.display(), e);
            }
        }
    }

    handler.close().expect("handler teardown failed");
}
