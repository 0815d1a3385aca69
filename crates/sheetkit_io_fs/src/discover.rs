//! Expand an input directory into an ordered list of tabular files.

use std::fs;
use std::path::{Path, PathBuf};

use sheetkit_log::sheet_warn;

use crate::spec::{EnumPatternMode, FsError};
use crate::util::{TypePatternSeq, compile_patterns, should_exclude_by_patterns};

/// Default include patterns: every format the pipeline can read.
pub const TUP_PATTERNS_TABULAR: [&str; 6] = ["*.xlsx", "*.xlsm", "*.xls", "*.csv", "*.htm", "*.html"];

/// Input discovery options for [`collect_input_files`].
#[derive(Debug, Clone)]
pub struct SpecDiscoverOptions {
    /// Include patterns applied to file basename; `None` uses [`TUP_PATTERNS_TABULAR`].
    pub patterns_include: Option<Vec<String>>,
    /// Exclude patterns applied to file basename.
    pub patterns_exclude: Option<Vec<String>>,
    /// Pattern interpretation mode.
    pub rule_pattern: EnumPatternMode,
    /// Descend into sub-directories.
    pub if_recursive: bool,
}

impl Default for SpecDiscoverOptions {
    fn default() -> Self {
        Self {
            patterns_include: None,
            patterns_exclude: None,
            rule_pattern: EnumPatternMode::Glob,
            if_recursive: false,
        }
    }
}

/// Collect input files under `dir_input`, sorted by relative path.
///
/// Office owner/lock files (`~$name.xlsx`) and hidden files are always skipped.
pub fn collect_input_files(
    dir_input: &Path,
    options: &SpecDiscoverOptions,
) -> Result<Vec<PathBuf>, FsError> {
    if !dir_input.is_dir() {
        return Err(FsError::NotDirectory(dir_input.to_path_buf()));
    }

    let patterns_include = match options.patterns_include.as_deref() {
        Some(patterns) => compile_patterns(Some(patterns), options.rule_pattern)?,
        None => {
            let l_default = TUP_PATTERNS_TABULAR
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>();
            compile_patterns(Some(&l_default), EnumPatternMode::Glob)?
        }
    };
    let patterns_exclude =
        compile_patterns(options.patterns_exclude.as_deref(), options.rule_pattern)?;

    let mut l_files = Vec::new();
    walk_input_dir(
        dir_input,
        options.if_recursive,
        patterns_include.as_ref(),
        patterns_exclude.as_ref(),
        &mut l_files,
    );
    l_files.sort();
    Ok(l_files)
}

fn walk_input_dir(
    path_dir: &Path,
    if_recursive: bool,
    patterns_include: Option<&TypePatternSeq>,
    patterns_exclude: Option<&TypePatternSeq>,
    l_files: &mut Vec<PathBuf>,
) {
    let iter_entries = match fs::read_dir(path_dir) {
        Ok(iter) => iter,
        Err(e) => {
            sheet_warn!("Failed to read directory {} ({e})", path_dir.display());
            return;
        }
    };

    for _entry_res in iter_entries {
        let Ok(entry) = _entry_res else {
            continue;
        };
        let path_entry = entry.path();
        let c_name = entry.file_name().to_string_lossy().to_string();
        if c_name.starts_with("~$") || c_name.starts_with('.') {
            continue;
        }

        let Ok(cfg_file_type) = entry.file_type() else {
            continue;
        };
        if cfg_file_type.is_dir() {
            if if_recursive {
                walk_input_dir(
                    &path_entry,
                    if_recursive,
                    patterns_include,
                    patterns_exclude,
                    l_files,
                );
            }
            continue;
        }
        if !path_entry.is_file() {
            continue;
        }
        if should_exclude_by_patterns(&c_name, patterns_include, patterns_exclude) {
            continue;
        }
        l_files.push(path_entry);
    }
}
