//! The single remote-archive download primitive the core carries (spec Non-goal: no
//! broader ownership of network transport policy). Plain GET, exponential-backoff retry,
//! a connect/read timeout, written straight to a temp file.
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::client::{Client as HyperClient, HttpConnector};
use hyper::{Body, Request, StatusCode, Uri};
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::errors::{Error, ErrorKind, Result};

const CONNECT_TIMEOUT_MS: u64 = 10_000;
const MAX_RETRIES: usize = 5;

/// Downloads `url` (an `http://` or `https://` address) into `dest`, retrying transient
/// failures with jittered exponential backoff. `https://` is accepted syntactically but
/// rejected at request time: the teacher's own plain `HttpConnector` has no TLS support,
/// and adding a TLS connector is a separate architectural decision from "one download
/// primitive" (see DESIGN.md's Open Question decisions).
pub async fn download_remote(url: &str, dest: &Path) -> Result<()> {
    let uri: Uri = url
        .parse()
        .map_err(|_| Error::from(ErrorKind::Download(url.to_string())))?;

    if uri.scheme_str() == Some("https") {
        return Err(ErrorKind::Disabled("https remote archive scanning (no TLS connector in this build)").into());
    }
    if uri.scheme_str() != Some("http") {
        return Err(ErrorKind::Download(url.to_string()).into());
    }

    let client = HyperClient::builder().build(HttpConnector::new());
    let strategy = ExponentialBackoff::from_millis(50)
        .max_delay(Duration::from_millis(5_000))
        .map(jitter)
        .take(MAX_RETRIES);

    let url_owned = url.to_string();
    let bytes = Retry::spawn(strategy, || fetch_once(&client, &uri, &url_owned)).await?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::with_chain(e, ErrorKind::Extraction(dest.to_path_buf())))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| Error::with_chain(e, ErrorKind::Extraction(dest.to_path_buf())))?;
    debug!("downloaded '{}' to '{}' ({} bytes)", url, dest.display(), bytes.len());
    Ok(())
}

async fn fetch_once(client: &HyperClient<HttpConnector>, uri: &Uri, url: &str) -> Result<bytes::Bytes> {
    let request = Request::get(uri.clone())
        .body(Body::empty())
        .expect("GET request with empty body is always valid");

    let response = tokio::time::timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), client.request(request))
        .await
        .map_err(|_| Error::from(ErrorKind::Download(url.to_string())))?
        .map_err(|e| Error::with_chain(e, ErrorKind::Download(url.to_string())))?;

    if response.status() != StatusCode::OK {
        warn!("GET '{}' returned {}", url, response.status());
        return Err(ErrorKind::Download(url.to_string()).into());
    }

    hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| Error::with_chain(e, ErrorKind::Download(url.to_string())))
}

/// Builds a temp file destination path for a remote download under the session's temp dir.
pub fn remote_dest_path(session_prefix: &str, url: &str) -> PathBuf {
    let leaf = url.rsplit('/').next().unwrap_or(url);
    std::env::temp_dir().join(crate::util::temp_file_name(session_prefix, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_is_rejected_without_a_tls_connector() {
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(download_remote("https://example.com/a.jar", Path::new("/tmp/a.jar")));
        assert!(result.is_err());
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(download_remote("ftp://example.com/a.jar", Path::new("/tmp/a.jar")));
        assert!(result.is_err());
    }

    #[test]
    fn remote_dest_path_uses_temp_file_naming_contract() {
        let path = remote_dest_path("abc123", "http://example.com/lib/a.jar");
        assert!(path.to_string_lossy().contains("abc123---a.jar"));
    }
}
