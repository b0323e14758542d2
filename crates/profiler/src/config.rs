//! Profiler configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ProfilerError, ProfilerResult};

/// Enables or disables recording (`true`/`false`/`1`/`0`).
pub const ENV_ENABLED: &str = "PROFILER_ENABLED";
/// Output directory for WAL and trace files.
pub const ENV_OUT_DIR: &str = "PROFILER_OUT_DIR";
/// Base name for WAL and trace files.
pub const ENV_FILE_BASE_NAME: &str = "PROFILER_FILE_BASE_NAME";
/// Shared epoch (Unix microseconds) so worker processes record on the parent's timeline.
pub const ENV_EPOCH_US: &str = "PROFILER_EPOCH_US";

/// Configuration for a [`Profiler`](crate::Profiler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilerConfig {
    /// Whether entries are recorded
    pub enabled: bool,
    /// Directory holding the WAL and trace document
    pub out_dir: PathBuf,
    /// Exact file stem; disables process/thread suffixing when set
    pub file_name: Option<String>,
    /// File stem prefix; the process and thread ids are appended
    pub file_base_name: String,
    /// Copied verbatim into the trace document header
    pub metadata: BTreeMap<String, Value>,
    /// Buffered entries that trigger an automatic flush; `0` disables it
    pub flush_threshold: usize,
    /// Epoch to record against, as Unix microseconds; `None` captures one at construction
    pub epoch_unix_us: Option<u64>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            out_dir: PathBuf::from("tmp/profiles"),
            file_name: None,
            file_base_name: "trace".to_string(),
            metadata: BTreeMap::new(),
            flush_threshold: 256,
            epoch_unix_us: None,
        }
    }
}

impl ProfilerConfig {
    /// Create a config writing into `out_dir`.
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Default::default()
        }
    }

    /// Create a config with recording disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_file_base_name(mut self, base: impl Into<String>) -> Self {
        self.file_base_name = base.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn with_epoch_unix_us(mut self, epoch: u64) -> Self {
        self.epoch_unix_us = Some(epoch);
        self
    }

    /// Load a config from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ProfilerResult<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ProfilerError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            ProfilerError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Defaults overlaid with the `PROFILER_*` environment variables.
    pub fn from_env() -> ProfilerResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by the `PROFILER_*` variable names.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ProfilerResult<Self> {
        if let Some(raw) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(&raw).ok_or_else(|| {
                ProfilerError::Configuration(format!("{ENV_ENABLED} must be a boolean, got '{raw}'"))
            })?;
        }
        if let Some(dir) = lookup(ENV_OUT_DIR) {
            self.out_dir = PathBuf::from(dir);
        }
        if let Some(base) = lookup(ENV_FILE_BASE_NAME) {
            self.file_base_name = base;
        }
        if let Some(raw) = lookup(ENV_EPOCH_US) {
            let epoch = raw.trim().parse::<u64>().map_err(|e| {
                ProfilerError::Configuration(format!("{ENV_EPOCH_US} is not a timestamp: {e}"))
            })?;
            self.epoch_unix_us = Some(epoch);
        }
        Ok(self)
    }

    /// File stem for a profiler created on the given process and thread.
    pub fn file_stem(&self, process_id: u32, thread_id: u64) -> String {
        match &self.file_name {
            Some(name) => name.clone(),
            None => format!("{}.{}.{}", self.file_base_name, process_id, thread_id),
        }
    }

    /// Check names and the output directory.
    ///
    /// Creates the output directory when recording is enabled.
    pub fn validate(&self) -> ProfilerResult<()> {
        match &self.file_name {
            Some(name) => check_stem("fileName", name)?,
            None => check_stem("fileBaseName", &self.file_base_name)?,
        }

        if self.out_dir.as_os_str().is_empty() {
            return Err(ProfilerError::Configuration(
                "outDir must not be empty".to_string(),
            ));
        }
        if self.out_dir.exists() && !self.out_dir.is_dir() {
            return Err(ProfilerError::Configuration(format!(
                "outDir {} exists and is not a directory",
                self.out_dir.display()
            )));
        }
        if self.enabled {
            std::fs::create_dir_all(&self.out_dir).map_err(|e| {
                ProfilerError::Configuration(format!(
                    "cannot create outDir {}: {e}",
                    self.out_dir.display()
                ))
            })?;
        }
        Ok(())
    }
}

fn check_stem(field: &str, stem: &str) -> ProfilerResult<()> {
    if stem.trim().is_empty() {
        return Err(ProfilerError::Configuration(format!("{field} must not be empty")));
    }
    if stem.contains(['/', '\\']) {
        return Err(ProfilerError::Configuration(format!(
            "{field} '{stem}' must not contain path separators"
        )));
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = ProfilerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.out_dir, PathBuf::from("tmp/profiles"));
        assert_eq!(config.file_base_name, "trace");
        assert_eq!(config.flush_threshold, 256);
        assert!(config.epoch_unix_us.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = ProfilerConfig::new("/custom/path")
            .with_file_base_name("cli")
            .with_metadata("command", "collect")
            .with_flush_threshold(0)
            .with_epoch_unix_us(1_700_000_000_000_000);

        assert_eq!(config.out_dir, PathBuf::from("/custom/path"));
        assert_eq!(config.file_base_name, "cli");
        assert_eq!(config.metadata["command"], "collect");
        assert_eq!(config.flush_threshold, 0);
        assert_eq!(config.epoch_unix_us, Some(1_700_000_000_000_000));
        assert!(!ProfilerConfig::disabled().enabled);
    }

    #[test]
    fn test_file_stem_suffixing() {
        let config = ProfilerConfig::default().with_file_base_name("run");
        assert_eq!(config.file_stem(10, 2), "run.10.2");

        let config = config.with_file_name("fixed");
        assert_eq!(config.file_stem(10, 2), "fixed");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ENABLED, "false"),
            (ENV_OUT_DIR, "/var/profiles"),
            (ENV_FILE_BASE_NAME, "worker"),
            (ENV_EPOCH_US, "123456"),
        ]
        .into_iter()
        .collect();

        let config = ProfilerConfig::default()
            .with_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.out_dir, PathBuf::from("/var/profiles"));
        assert_eq!(config.file_base_name, "worker");
        assert_eq!(config.epoch_unix_us, Some(123456));
    }

    #[test]
    fn test_env_overrides_reject_garbage() {
        let err = ProfilerConfig::default()
            .with_env_overrides(|key| (key == ENV_ENABLED).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration(_)));

        let err = ProfilerConfig::default()
            .with_env_overrides(|key| (key == ENV_EPOCH_US).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration(_)));
    }

    #[test]
    fn test_from_json_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("profiler.json");
        std::fs::write(
            &path,
            r#"{"enabled": false, "fileBaseName": "audit", "metadata": {"version": "1.2.3"}}"#,
        )
        .unwrap();

        let config = ProfilerConfig::from_json_file(&path).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.file_base_name, "audit");
        assert_eq!(config.metadata["version"], "1.2.3");
        assert_eq!(config.flush_threshold, 256);
    }

    #[test]
    fn test_validate_creates_out_dir() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("nested").join("profiles");

        ProfilerConfig::new(&out_dir).validate().unwrap();
        assert!(out_dir.is_dir());
    }

    #[test]
    fn test_validate_disabled_does_not_create_dir() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("never");

        ProfilerConfig::new(&out_dir)
            .with_enabled(false)
            .validate()
            .unwrap();
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let err = ProfilerConfig::new(&file).validate().unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration(_)));

        let err = ProfilerConfig::new(temp_dir.path())
            .with_file_base_name("  ")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration(_)));

        let err = ProfilerConfig::new(temp_dir.path())
            .with_file_name("a/b")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ProfilerError::Configuration(_)));
    }
}
