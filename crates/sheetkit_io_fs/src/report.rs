//! Probe report models and mutable report builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::spec::EnumFileFormat;

/// One path that could not be fully probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecProbeIssue {
    /// Affected input path.
    pub path: PathBuf,
    /// User-facing diagnostic text.
    pub message: String,
}

/// Aggregate counters and diagnostics for one `probe_files` run.
#[derive(Debug, Default, Clone)]
pub struct ReportProbe {
    /// Number of probed paths.
    pub cnt_probed: u64,
    /// Paths whose size could not be resolved.
    pub cnt_size_unresolved: u64,
    /// Paths whose leading bytes could not be read (format from extension).
    pub cnt_sniff_failed: u64,
    /// Count per detected format label.
    pub cnt_by_format: BTreeMap<String, u64>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
    /// Per-path issues.
    pub issues: Vec<SpecProbeIssue>,
}

impl ReportProbe {
    /// Number of collected per-path issues.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_probed".to_string(), self.cnt_probed);
        dict_counts.insert("cnt_size_unresolved".to_string(), self.cnt_size_unresolved);
        dict_counts.insert("cnt_sniff_failed".to_string(), self.cnt_sniff_failed);
        dict_counts.insert("cnt_issues".to_string(), self.issue_count() as u64);
        for (c_format, n_cnt) in &self.cnt_by_format {
            dict_counts.insert(format!("cnt_format_{c_format}"), *n_cnt);
        }
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let c_formats = self
            .cnt_by_format
            .iter()
            .map(|(c_format, n_cnt)| format!("{c_format}={n_cnt}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{prefix} probed={} size_unresolved={} sniff_failed={} issues={} formats=[{c_formats}]",
            self.cnt_probed,
            self.cnt_size_unresolved,
            self.cnt_sniff_failed,
            self.issue_count(),
        )
    }
}

impl fmt::Display for ReportProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[PROBE]"))
    }
}

/// Mutable accumulator for probe statistics.
#[derive(Debug, Default, Clone)]
pub struct ReportProbeBuilder {
    cnt_probed: u64,
    cnt_size_unresolved: u64,
    cnt_sniff_failed: u64,
    cnt_by_format: BTreeMap<String, u64>,
    warnings: Vec<String>,
    issues: Vec<SpecProbeIssue>,
}

impl ReportProbeBuilder {
    /// Record one probed file with its detected format.
    pub fn add_probed(&mut self, format: EnumFileFormat) {
        self.cnt_probed += 1;
        *self
            .cnt_by_format
            .entry(format.label().to_string())
            .or_default() += 1;
    }

    /// Record an unresolved size.
    pub fn add_size_unresolved(&mut self, path: PathBuf, message: String) {
        self.cnt_size_unresolved += 1;
        self.issues.push(SpecProbeIssue { path, message });
    }

    /// Record a failed sniff.
    pub fn add_sniff_failed(&mut self, path: PathBuf, message: String) {
        self.cnt_sniff_failed += 1;
        self.issues.push(SpecProbeIssue { path, message });
    }

    /// Add warning message.
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Finalize builder into immutable report.
    pub fn build(self) -> ReportProbe {
        ReportProbe {
            cnt_probed: self.cnt_probed,
            cnt_size_unresolved: self.cnt_size_unresolved,
            cnt_sniff_failed: self.cnt_sniff_failed,
            cnt_by_format: self.cnt_by_format,
            warnings: self.warnings,
            issues: self.issues,
        }
    }
}
