//! Input probing: size resolution and format sniffing.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use sheetkit_log::{sheet_debug, sheet_warn};

use crate::report::{ReportProbe, ReportProbeBuilder};
use crate::spec::{SpecFileDescriptor, SpecProbeOptions};
use crate::util::{calculate_worker_limit, detect_format, read_head};

/// Raw per-path probe result, folded into the report on the calling thread.
#[derive(Debug)]
struct SpecProbeResult {
    file_desc: SpecFileDescriptor,
    err_size: Option<String>,
    err_sniff: Option<String>,
}

/// Probe one path.
///
/// Never fails: an unreadable size is recorded as `None`, an unreadable head
/// falls back to extension-based detection.
pub fn probe_file(path: &Path, n_bytes_sniff: usize) -> SpecFileDescriptor {
    probe_one(path, n_bytes_sniff).file_desc
}

fn probe_one(path: &Path, n_bytes_sniff: usize) -> SpecProbeResult {
    let (size, err_size) = match fs::metadata(path) {
        Ok(meta) => (Some(meta.len()), None),
        Err(e) => (None, Some(format!("Failed to read size of {} ({e})", path.display()))),
    };
    let (v_head, err_sniff) = match read_head(path, n_bytes_sniff) {
        Ok(v_head) => (v_head, None),
        Err(e) => (
            Vec::new(),
            Some(format!("Failed to sniff {} ({e})", path.display())),
        ),
    };
    let format = detect_format(path, &v_head);

    SpecProbeResult {
        file_desc: SpecFileDescriptor {
            path: path.to_path_buf(),
            size,
            format,
        },
        err_size,
        err_sniff,
    }
}

/// Probe `paths` in input order, in parallel when more than one worker is allowed.
///
/// Returns descriptors in the same order as `paths` plus a [`ReportProbe`].
pub fn probe_files(
    paths: &[PathBuf],
    options: &SpecProbeOptions,
) -> (Vec<SpecFileDescriptor>, ReportProbe) {
    let mut builder_probe_report = ReportProbeBuilder::default();
    let n_workers_max = calculate_worker_limit(options.num_workers_max);
    let n_bytes_sniff = options.n_bytes_sniff;

    let probe_serial = |paths: &[PathBuf]| -> Vec<SpecProbeResult> {
        paths
            .iter()
            .map(|path| probe_one(path, n_bytes_sniff))
            .collect()
    };

    let l_results = if n_workers_max <= 1 || paths.len() <= 1 {
        probe_serial(paths)
    } else {
        match ThreadPoolBuilder::new().num_threads(n_workers_max).build() {
            Ok(thread_pool) => thread_pool.install(|| {
                paths
                    .par_iter()
                    .map(|path| probe_one(path, n_bytes_sniff))
                    .collect::<Vec<_>>()
            }),
            Err(_) => {
                builder_probe_report.add_warning(format!(
                    "Failed to initialize thread pool (workers={n_workers_max}); fallback to serial probe."
                ));
                probe_serial(paths)
            }
        }
    };

    let mut l_file_descs = Vec::with_capacity(l_results.len());
    for result in l_results {
        if let Some(msg) = result.err_size {
            sheet_warn!("{msg}; counted as 0 bytes");
            builder_probe_report.add_size_unresolved(result.file_desc.path.clone(), msg);
        }
        if let Some(msg) = result.err_sniff {
            sheet_debug!("{msg}; format taken from extension");
            builder_probe_report.add_sniff_failed(result.file_desc.path.clone(), msg);
        }
        builder_probe_report.add_probed(result.file_desc.format);
        l_file_descs.push(result.file_desc);
    }

    (l_file_descs, builder_probe_report.build())
}
