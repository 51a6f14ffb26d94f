use std::path::PathBuf;

error_chain::error_chain! {
    errors {
        NotFound(path: String) {
            description("path not found")
            display("'{}' does not exist or is not readable", path)
        }
        NotArchive(path: String) {
            description("not an archive")
            display("'{}' is not a regular file or could not be parsed as an archive", path)
        }
        Disabled(what: &'static str) {
            description("feature disabled")
            display("{} is disabled by the scan spec", what)
        }
        TooLarge(path: String, size: u64) {
            description("content too large")
            display("'{}' has uncompressed size {} which exceeds the single-region inflation ceiling", path, size)
        }
        Extraction(path: PathBuf) {
            description("extraction failed")
            display("extracting to temp file '{}' failed", path.to_string_lossy())
        }
        Mapping(path: PathBuf) {
            description("mmap failed")
            display("memory-mapping '{}' failed, even after a recovery attempt", path.to_string_lossy())
        }
        Closed {
            description("handler closed")
            display("operation attempted after the nested archive handler was closed")
        }
        Interrupted {
            description("interrupted")
            display("operation was interrupted")
        }
        ParseManifest(path: String) {
            description("manifest parse error")
            display("parsing the manifest of '{}' failed", path)
        }
        ParseCentralDirectory(path: String) {
            description("central directory parse error")
            display("parsing the central directory of '{}' failed", path)
        }
        Download(url: String) {
            description("remote download failed")
            display("downloading '{}' failed", url)
        }
    }
    foreign_links {
        Io(std::io::Error);
        Zip(zip::result::ZipError);
        SerdeJson(serde_json::Error);
    }
}
