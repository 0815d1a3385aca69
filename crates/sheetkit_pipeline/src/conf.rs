//! Pipeline constants and the reloadable configuration value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sheetkit_io_fs::replace_file_atomic;
use sheetkit_log::{sheet_info, sheet_warn};

use crate::spec::ConfigError;

/// HTML rows built between deadline and cancellation checks.
pub const N_ROWS_HTML_CHECK_INTERVAL: usize = 100;
/// HTML tokens consumed between deadline and cancellation checks.
pub const N_TOKENS_HTML_CHECK_INTERVAL: usize = 1024;
/// Row cap of the optimized HTML path.
pub const N_ROWS_HTML_OPTIMIZED_MAX: usize = 10_000;
/// Row cap of the fast fallback HTML path.
pub const N_ROWS_HTML_FAST_MAX: usize = 100;
/// Leading characters inspected by the fast fallback HTML path.
pub const N_CHARS_HTML_FAST_WINDOW: usize = 50_000;
/// Consecutive progress sink failures tolerated before reporting is disabled.
pub const N_PROGRESS_ERRORS_MAX: u32 = 5;
/// Suffix of merged output base names.
pub const C_SUFFIX_MERGED: &str = "_Merged";
/// Suffix of split output base names.
pub const C_SUFFIX_SPLIT: &str = "_Split";

////////////////////////////////////////////////////////////////////////////////
// #region RecoveryPolicy

/// Delays applied by recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecRecoveryPolicy {
    /// Delay before retrying an access-denied failure.
    pub n_ms_delay_access_denied: u64,
    /// Delay before retrying a locked file.
    pub n_ms_delay_file_locked: u64,
    /// Delay after releasing pooled buffers on resource exhaustion.
    pub n_ms_delay_reclaim: u64,
}

impl Default for SpecRecoveryPolicy {
    fn default() -> Self {
        Self {
            n_ms_delay_access_denied: 1_000,
            n_ms_delay_file_locked: 2_000,
            n_ms_delay_reclaim: 500,
        }
    }
}

impl SpecRecoveryPolicy {
    /// Policy with every delay set to zero.
    pub fn immediate() -> Self {
        Self {
            n_ms_delay_access_denied: 0,
            n_ms_delay_file_locked: 0,
            n_ms_delay_reclaim: 0,
        }
    }

    pub(crate) fn delay_access_denied(&self) -> Duration {
        Duration::from_millis(self.n_ms_delay_access_denied)
    }

    pub(crate) fn delay_file_locked(&self) -> Duration {
        Duration::from_millis(self.n_ms_delay_file_locked)
    }

    pub(crate) fn delay_reclaim(&self) -> Duration {
        Duration::from_millis(self.n_ms_delay_reclaim)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PipelineConfig

/// Pipeline configuration. Every field has a default, so partial TOML files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecPipelineConfig {
    /// Read buffer size in KiB.
    pub n_kb_buffer_read: usize,
    /// Write buffer size in KiB.
    pub n_kb_buffer_write: usize,
    /// Encoding label used for CSV and HTML input (`encoding_rs` label).
    pub csv_encoding: String,
    /// Detect and strip a leading BOM on input; emit one on CSV output.
    pub if_csv_bom: bool,
    /// Per-file size (MiB) above which streaming mode is forced.
    pub n_mb_large_file_threshold: u64,
    /// Always use streaming mode.
    pub if_force_streaming: bool,
    /// Minimum interval between two delivered progress reports.
    pub n_ms_progress_interval: u64,
    /// Progress delta that bypasses the interval.
    pub n_progress_min_delta: f64,
    /// HTML parse time budget.
    pub n_ms_html_parse_timeout: u64,
    /// HTML content cap in KiB; longer content is truncated.
    pub n_kb_html_content_max: usize,
    /// Use the bounded optimized HTML path instead of the whole-document one.
    pub if_html_optimized: bool,
    /// Rows per streamed batch.
    pub n_rows_batch_max: usize,
    /// Rows reserved per file in batch mode.
    pub n_rows_reserved_per_file: usize,
    /// Batch-mode parallelism.
    pub n_max_parallelism: usize,
    /// Jobs allowed to run at once per service.
    pub n_max_concurrent_jobs: usize,
    /// Recovery delays.
    pub policy_recovery: SpecRecoveryPolicy,
}

impl Default for SpecPipelineConfig {
    fn default() -> Self {
        Self {
            n_kb_buffer_read: 64,
            n_kb_buffer_write: 64,
            csv_encoding: "utf-8".to_string(),
            if_csv_bom: true,
            n_mb_large_file_threshold: 50,
            if_force_streaming: false,
            n_ms_progress_interval: 100,
            n_progress_min_delta: 5.0,
            n_ms_html_parse_timeout: 30_000,
            n_kb_html_content_max: 10 * 1024,
            if_html_optimized: true,
            n_rows_batch_max: 1_000,
            n_rows_reserved_per_file: 10_000,
            n_max_parallelism: 4,
            n_max_concurrent_jobs: 2,
            policy_recovery: SpecRecoveryPolicy::default(),
        }
    }
}

impl SpecPipelineConfig {
    /// Parse TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML text.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Reject values no pipeline run can honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if encoding_rs::Encoding::for_label(self.csv_encoding.trim().as_bytes()).is_none() {
            return Err(ConfigError::Invalid(format!(
                "csv_encoding: unknown encoding label {:?}",
                self.csv_encoding
            )));
        }
        if !self.n_progress_min_delta.is_finite() || self.n_progress_min_delta < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "n_progress_min_delta must be a finite value >= 0, got {}",
                self.n_progress_min_delta
            )));
        }
        if self.n_kb_html_content_max == 0 {
            return Err(ConfigError::Invalid(
                "n_kb_html_content_max must be >= 1".to_string(),
            ));
        }
        if self.n_rows_reserved_per_file == 0 {
            return Err(ConfigError::Invalid(
                "n_rows_reserved_per_file must be >= 1".to_string(),
            ));
        }
        if self.n_max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "n_max_concurrent_jobs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-file size threshold in bytes.
    pub fn n_bytes_large_file(&self) -> u64 {
        self.n_mb_large_file_threshold.saturating_mul(1024 * 1024)
    }

    /// Read buffer size in bytes (at least 4 KiB).
    pub fn n_bytes_buffer_read(&self) -> usize {
        self.n_kb_buffer_read.max(4) * 1024
    }

    /// Write buffer size in bytes (at least 4 KiB).
    pub fn n_bytes_buffer_write(&self) -> usize {
        self.n_kb_buffer_write.max(4) * 1024
    }

    /// HTML content cap in bytes.
    pub fn n_bytes_html_content_max(&self) -> usize {
        self.n_kb_html_content_max.max(1) * 1024
    }

    /// Batch size clamped to at least one row.
    pub fn n_rows_batch(&self) -> usize {
        self.n_rows_batch_max.max(1)
    }

    /// Batch-mode parallelism clamped to at least one.
    pub fn n_parallelism(&self) -> usize {
        self.n_max_parallelism.max(1)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ConfigStore

/// Holder of the current configuration snapshot.
///
/// Jobs take an immutable [`Arc`] snapshot at start; [`Self::reload`] swaps
/// in a fresh value for later jobs only.
#[derive(Debug)]
pub struct ConfigStore {
    path_config: Option<PathBuf>,
    current: RwLock<Arc<SpecPipelineConfig>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(SpecPipelineConfig::default())
    }
}

impl ConfigStore {
    /// In-memory store without a backing file.
    pub fn new(config: SpecPipelineConfig) -> Self {
        Self {
            path_config: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Store backed by a TOML file; a missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            SpecPipelineConfig::load(path)?
        } else {
            sheet_warn!(
                "Config file {} not found; using defaults",
                path.display()
            );
            SpecPipelineConfig::default()
        };
        Ok(Self {
            path_config: Some(path.to_path_buf()),
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Current configuration.
    pub fn snapshot(&self) -> Arc<SpecPipelineConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the backing file. The previous value stays on error.
    pub fn reload(&self) -> Result<Arc<SpecPipelineConfig>, ConfigError> {
        let Some(path_config) = self.path_config.as_deref() else {
            return Ok(self.snapshot());
        };
        let config = Arc::new(SpecPipelineConfig::load(path_config)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        sheet_info!("Reloaded configuration from {}", path_config.display());
        Ok(config)
    }

    /// Replace the current value, persisting it when file-backed.
    pub fn replace(&self, config: SpecPipelineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(path_config) = self.path_config.as_deref() {
            let text = config.to_toml_string()?;
            replace_file_atomic(path_config, text.as_bytes())?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_toml_str_fills_defaults_for_missing_fields() {
        let config = SpecPipelineConfig::from_toml_str(
            r#"
            n_rows_batch_max = 250
            csv_encoding = "gbk"

            [policy_recovery]
            n_ms_delay_file_locked = 10
            "#,
        )
        .expect("parse");
        assert_eq!(config.n_rows_batch_max, 250);
        assert_eq!(config.csv_encoding, "gbk");
        assert_eq!(config.policy_recovery.n_ms_delay_file_locked, 10);
        assert_eq!(config.policy_recovery.n_ms_delay_access_denied, 1_000);
        assert_eq!(config.n_rows_reserved_per_file, 10_000);
        assert_eq!(config.n_bytes_large_file(), 50 * 1024 * 1024);
    }

    #[test]
    fn validate_rejects_unknown_encoding_and_zero_limits() {
        let err = SpecPipelineConfig::from_toml_str("csv_encoding = \"klingon\"")
            .expect_err("unknown label");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = SpecPipelineConfig {
            n_max_concurrent_jobs: 0,
            ..SpecPipelineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SpecPipelineConfig::from_toml_str("n_rows_batch_max = \"x\"").is_err());
        assert_eq!(
            SpecPipelineConfig {
                n_rows_batch_max: 0,
                ..SpecPipelineConfig::default()
            }
            .n_rows_batch(),
            1
        );
    }

    #[test]
    fn config_store_reload_and_replace() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_config = tmp.path().join("sheetkit.toml");
        std::fs::write(&path_config, "n_max_parallelism = 8\n").expect("write");

        let store = ConfigStore::from_file(&path_config).expect("store");
        let snapshot_before = store.snapshot();
        assert_eq!(snapshot_before.n_max_parallelism, 8);

        std::fs::write(&path_config, "n_max_parallelism = 3\n").expect("rewrite");
        assert_eq!(snapshot_before.n_max_parallelism, 8);
        store.reload().expect("reload");
        assert_eq!(store.snapshot().n_max_parallelism, 3);

        std::fs::write(&path_config, "n_max_parallelism = [").expect("corrupt");
        assert!(store.reload().is_err());
        assert_eq!(store.snapshot().n_max_parallelism, 3);

        store
            .replace(SpecPipelineConfig {
                n_max_parallelism: 6,
                ..SpecPipelineConfig::default()
            })
            .expect("replace");
        let reloaded = SpecPipelineConfig::load(&path_config).expect("load persisted");
        assert_eq!(reloaded.n_max_parallelism, 6);
    }

    #[test]
    fn config_store_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::from_file(&tmp.path().join("absent.toml")).expect("store");
        assert_eq!(*store.snapshot(), SpecPipelineConfig::default());
    }
}
