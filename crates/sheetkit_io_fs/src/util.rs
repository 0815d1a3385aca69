//! Shared helpers: pattern matching, content sniffing and output paths.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use regex::RegexBuilder;
use tempfile::NamedTempFile;

use crate::spec::{EnumFileFormat, EnumPatternMode, FsError, derive_extension};

/// Leading bytes inspected when sniffing a file's real format.
pub const N_BYTES_SNIFF_DEFAULT: usize = 1024;

/// Markers that identify HTML table content regardless of extension.
pub const TUP_HTML_MARKERS: [&str; 3] = ["<html", "<!doctype html", "<table"];

const V_MAGIC_ZIP: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const V_MAGIC_OLE: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

#[derive(Debug, Clone)]
pub(crate) enum TypePatternSeq {
    Literal(Vec<String>),
    Glob(Vec<GlobMatcher>),
    Regex(Vec<regex::Regex>),
}

impl TypePatternSeq {
    pub(crate) fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Literal(v) => v.iter().any(|p| value.contains(p.as_str())),
            Self::Glob(v) => v.iter().any(|p| p.is_match(value)),
            Self::Regex(v) => v.iter().any(|p| p.is_match(value)),
        }
    }
}

/// Compile raw patterns; empty/`None` means "no filter".
///
/// Glob and regex patterns are matched case-insensitively because user file
/// names mix `.XLS` and `.xls` freely.
pub(crate) fn compile_patterns(
    patterns: Option<&[String]>,
    rule_pattern: EnumPatternMode,
) -> Result<Option<TypePatternSeq>, FsError> {
    let Some(patterns) = patterns else {
        return Ok(None);
    };
    if patterns.is_empty() {
        return Ok(None);
    }

    match rule_pattern {
        EnumPatternMode::Literal => Ok(Some(TypePatternSeq::Literal(patterns.to_vec()))),
        EnumPatternMode::Glob => {
            let mut l_glob = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let matcher = globset::GlobBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|glob: Glob| glob.compile_matcher())
                    .map_err(|e| FsError::InvalidPattern(e.to_string()))?;
                l_glob.push(matcher);
            }
            Ok(Some(TypePatternSeq::Glob(l_glob)))
        }
        EnumPatternMode::Regex => {
            let mut l_regex = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| FsError::InvalidPattern(e.to_string()))?;
                l_regex.push(regex);
            }
            Ok(Some(TypePatternSeq::Regex(l_regex)))
        }
    }
}

pub(crate) fn should_exclude_by_patterns(
    value: &str,
    patterns_include: Option<&TypePatternSeq>,
    patterns_exclude: Option<&TypePatternSeq>,
) -> bool {
    let if_included = patterns_include.is_none_or(|p| p.is_match(value));
    let if_excluded = patterns_exclude.is_some_and(|p| p.is_match(value));
    !if_included || if_excluded
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ContentSniffing

/// Byte offset of the first ASCII case-insensitive occurrence of `needle`.
pub fn find_ascii_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&n_idx| haystack[n_idx..n_idx + needle.len()].eq_ignore_ascii_case(needle))
}

/// Byte offset of the last ASCII case-insensitive occurrence of `needle`.
pub fn rfind_ascii_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(haystack.len());
    }
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&n_idx| haystack[n_idx..n_idx + needle.len()].eq_ignore_ascii_case(needle))
}

/// Whether `head` contains any HTML table marker (case-insensitive).
pub fn contains_html_markers(head: &[u8]) -> bool {
    TUP_HTML_MARKERS
        .iter()
        .any(|marker| find_ascii_ci(head, marker.as_bytes()).is_some())
}

/// Read up to `n_bytes` leading bytes of `path`.
pub fn read_head(path: &Path, n_bytes: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut v_head = Vec::with_capacity(n_bytes);
    file.take(n_bytes as u64).read_to_end(&mut v_head)?;
    Ok(v_head)
}

/// Whether the file at `path` starts with HTML markers in its first KiB.
///
/// Unreadable files are reported as `false`.
pub fn sniff_html_markers(path: &Path) -> bool {
    match read_head(path, N_BYTES_SNIFF_DEFAULT) {
        Ok(v_head) => contains_html_markers(&v_head),
        Err(_) => false,
    }
}

/// Decide the file format from leading bytes and extension.
pub fn detect_format(path: &Path, head: &[u8]) -> EnumFileFormat {
    let c_ext = derive_extension(path);

    if V_MAGIC_ZIP.iter().any(|magic| head.starts_with(magic)) {
        return EnumFileFormat::Xlsx;
    }
    if head.starts_with(V_MAGIC_OLE) {
        return EnumFileFormat::Xls;
    }

    let if_html_candidate = matches!(c_ext.as_str(), "xls" | "xlsx" | "xlsm" | "htm" | "html");
    if if_html_candidate && contains_html_markers(head) {
        return EnumFileFormat::HtmlDisguised;
    }

    match c_ext.as_str() {
        "csv" | "txt" => EnumFileFormat::Csv,
        "xlsx" | "xlsm" => EnumFileFormat::Xlsx,
        "xls" => EnumFileFormat::Xls,
        _ => EnumFileFormat::Unknown,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region OutputPaths

pub(crate) fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    let n_cpu = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);

    match num_workers_max {
        Some(n) => n.clamp(1, n_cpu),
        None => n_cpu.clamp(1, 8),
    }
}

/// Ensure `dir` exists and is a writable directory; create it when missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), FsError> {
    if dir.as_os_str().is_empty() {
        return Err(FsError::OutputDir {
            path: dir.to_path_buf(),
            message: "output directory must not be empty".to_string(),
        });
    }
    if dir.exists() && !dir.is_dir() {
        return Err(FsError::OutputDir {
            path: dir.to_path_buf(),
            message: "path is not a directory".to_string(),
        });
    }
    fs::create_dir_all(dir).map_err(|e| FsError::OutputDir {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;
    NamedTempFile::new_in(dir).map_err(|e| FsError::OutputDir {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Atomically replace `path_target` with `content` (temp file + rename).
pub fn replace_file_atomic(path_target: &Path, content: &[u8]) -> Result<(), FsError> {
    let path_dir = match path_target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&path_dir).map_err(|e| FsError::io(&path_dir, e))?;

    let mut tmp = NamedTempFile::new_in(&path_dir).map_err(|e| FsError::io(&path_dir, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.flush())
        .and_then(|_| tmp.as_file_mut().sync_all())
        .map_err(|e| FsError::io(tmp.path(), e))?;
    tmp.persist(path_target)
        .map_err(|e| FsError::io(path_target, e.error))?;
    Ok(())
}

/// Join `dir` and `file_name`, refusing names that escape `dir`.
pub fn derive_output_path(dir: &Path, file_name: &str) -> Result<PathBuf, FsError> {
    let path_name = Path::new(file_name);
    if path_name.components().count() != 1 || path_name.is_absolute() {
        return Err(FsError::OutputDir {
            path: dir.join(file_name),
            message: format!("output file name must be a plain name: {file_name:?}"),
        });
    }
    Ok(dir.join(path_name))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
