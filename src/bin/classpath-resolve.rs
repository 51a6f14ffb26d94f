use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;

use classpath_core::config::ScanSpec;
use classpath_core::manifest::JarManifestParser;
use classpath_core::resolver::ClasspathResolver;

#[derive(Parser)]
#[command(name = "classpath-resolve", about = "Resolves a raw classpath to its canonical, ordered, deduplicated form")]
struct Args {
    /// Classpath entries, in precedence order.
    entries: Vec<String>,

    /// Directory relative entries are resolved against. Defaults to the current directory.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Number of worker threads. Defaults to the number of available CPUs.
    #[arg(long)]
    jobs: Option<usize>,

    /// Do not exclude entries that resolve under a known JRE/JDK installation.
    #[arg(long)]
    no_blacklist_system_jars: bool,
}

enum Error {
    Io(io::Error),
    Resolve(classpath_core::errors::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<classpath_core::errors::Error> for Error {
    fn from(err: classpath_core::errors::Error) -> Self {
        Error::Resolve(err)
    }
}

fn run(args: Args) -> Result<(), Error> {
    let cwd = match args.cwd {
        Some(p) => p,
        None => std::env::current_dir()?,
    };

    let spec = ScanSpec {
        blacklist_system_jars: !args.no_blacklist_system_jars,
        jobs: args.jobs,
        ..ScanSpec::default()
    };

    let resolver = ClasspathResolver::new(spec, std::sync::Arc::new(JarManifestParser));
    let resolved = resolver.resolve(&args.entries, &cwd)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for path in resolved {
        writeln!(out, "{}", path.display())?;
    }

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    run(args).unwrap_or_else(|e| {
        match e {
            Error::Io(e) => eprintln!("an I/O operation failed: {}", e),
            Error::Resolve(e) => eprintln!("resolving the classpath failed: {}", e),
        }
        process::exit(2);
    });
}
