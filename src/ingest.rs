use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::db;
use crate::model::{CoverageData, FileCoverage, LineCoverage};
use crate::profile::MergedProfile;

/// The constant recorded as `source_format` on every ingested report. There
/// is only one input format, so unlike a multi-format tool this isn't a
/// detected value — it just labels where the data came from.
pub const SOURCE_FORMAT: &str = "vimprofile";

/// Parse one or more `:profile` report files, reconcile their functions
/// against their scripts, merge the results, and insert the combined
/// coverage into the database as a single report.
///
/// `source_roots` restricts the result to files found under those
/// directories (or named directly); pass an empty slice to keep every file
/// mentioned by the reports. Returns (report_id, actual_report_name).
pub fn ingest(
    conn: &mut rusqlite::Connection,
    files: &[PathBuf],
    source_roots: &[PathBuf],
    report_name: Option<&str>,
    overwrite: bool,
) -> Result<(i64, String)> {
    let mut merged = if source_roots.is_empty() {
        MergedProfile::new()
    } else {
        MergedProfile::with_source_roots(source_roots.to_vec())
    };
    merged.add_profile_files(files)?;
    let record = merged.coverage_record();

    let name = match report_name {
        Some(n) => n.to_string(),
        None => default_report_name(files),
    };

    let source_file_str = files.first().and_then(|p| p.to_str());

    let mut data = CoverageData::new();
    for (path, lines) in &record.files {
        let mut file = FileCoverage::new(path.clone());
        file.file_tracer = record.file_tracers.get(path).cloned();
        file.lines = lines
            .iter()
            .map(|&line_number| LineCoverage {
                line_number,
                hit_count: 1,
            })
            .collect();
        data.files.push(file);
    }

    if data.files.is_empty() {
        log::warn!("no source files found in ingested profile report(s)");
    }

    let report_id = db::insert_coverage(conn, &name, SOURCE_FORMAT, source_file_str, &data, overwrite)?;

    Ok((report_id, name))
}

fn default_report_name(files: &[PathBuf]) -> String {
    match files {
        [single] => file_stem(single),
        _ => files
            .iter()
            .map(|p| file_stem(p))
            .collect::<Vec<_>>()
            .join("+"),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string()
}
