//! The scan specification: the configuration surface the core reads decisions from.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Controls the core's validation and nested-archive-opening policy. Any flags outside
/// the ones the core itself consults pass through unexamined in `extra`, so a caller can
/// carry richer, higher-level scan configuration through the same struct without the core
/// needing to know about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSpec {
    /// Reject classpath entries that resolve under a known JRE/JDK installation path.
    #[serde(default = "default_true")]
    pub blacklist_system_jars: bool,

    /// Allow `open()` to descend into archives nested inside other archives.
    #[serde(default = "default_true")]
    pub scan_nested_jars: bool,

    /// Allow `open()` to download `http://`/`https://` classpath roots.
    #[serde(default)]
    pub enable_remote_jar_scanning: bool,

    /// Worker count for the classpath resolver's pool. `None` means "use the number of
    /// available CPUs", resolved by the caller at construction time.
    #[serde(default)]
    pub jobs: Option<usize>,

    #[serde(flatten)]
    pub extra: Value,
}

fn default_true() -> bool {
    true
}

impl Default for ScanSpec {
    fn default() -> Self {
        ScanSpec {
            blacklist_system_jars: true,
            scan_nested_jars: true,
            enable_remote_jar_scanning: false,
            jobs: None,
            extra: Value::Object(Default::default()),
        }
    }
}

impl ScanSpec {
    pub fn from_json(data: &str) -> crate::errors::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn resolved_jobs(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_defaults() {
        let spec = ScanSpec::default();
        assert!(spec.blacklist_system_jars);
        assert!(spec.scan_nested_jars);
        assert!(!spec.enable_remote_jar_scanning);
    }

    #[test]
    fn resolved_jobs_falls_back_to_cpu_count() {
        let spec = ScanSpec::default();
        assert!(spec.resolved_jobs() >= 1);
    }

    #[test]
    fn parses_partial_json_with_pass_through_fields() {
        let spec = ScanSpec::from_json(r#"{"enableRemoteJarScanning": false, "somethingElse": 42}"#);
        // field names are serde-default (snake_case); unknown camelCase keys flow into `extra`.
        let spec = spec.unwrap();
        assert!(spec.blacklist_system_jars);
    }
}
