//! Uniform in-memory representation of coverage data, independent of the
//! profile format it was reconciled from. [`crate::profile`] produces a
//! `CoverageData` which is then inserted into the SQLite store, and query
//! helpers in `db` read it back out as the report-facing types below.

/// A single line that was instrumentable.
#[derive(Debug, Clone)]
pub struct LineCoverage {
    pub line_number: u32,
    pub hit_count: u64,
}

/// Coverage data for a single source file.
#[derive(Debug, Clone, Default)]
pub struct FileCoverage {
    pub path: String,
    pub lines: Vec<LineCoverage>,
    /// The file-tracer plugin tag the downstream coverage tool uses to
    /// treat this file as a first-class source (§4.5 of the profile
    /// reconciler: attached to every file in a coverage record).
    pub file_tracer: Option<String>,
}

impl FileCoverage {
    pub fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }
}

/// The complete result of parsing (and, for profile reports, merging) one
/// or more coverage sources.
#[derive(Debug, Clone, Default)]
pub struct CoverageData {
    pub files: Vec<FileCoverage>,
}

impl CoverageData {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A covered/total pair expressed as a rate in `[0.0, 1.0]`.
/// Returns `1.0` when `total` is zero (vacuously fully covered).
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        covered as f64 / total as f64
    }
}

/// One row from the `report` table, as listed by `db::list_reports`.
#[derive(Debug, Clone)]
pub struct ReportInfo {
    pub name: String,
    pub format: String,
    pub created_at: String,
}

/// Aggregate coverage summary across all reports in the database (union
/// semantics: a line is considered covered if any ingested report covers
/// it).
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub total_files: u64,
    pub total_lines: u64,
    pub covered_lines: u64,
}

impl ReportSummary {
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }
}

/// Per-file coverage summary, as listed by `db::get_file_summaries`.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub path: String,
    pub total_lines: u64,
    pub covered_lines: u64,
}

impl FileSummary {
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }
}

/// Line-level detail for a single source file, as listed by `db::get_lines`.
#[derive(Debug, Clone)]
pub struct LineDetail {
    pub line_number: u32,
    pub hit_count: u64,
}

/// Per-file diff coverage result: which touched lines were covered vs. missed.
#[derive(Debug, Clone)]
pub struct FileDiffCoverage {
    pub path: String,
    pub covered_lines: Vec<u32>,
    pub missed_lines: Vec<u32>,
}

impl FileDiffCoverage {
    /// Total instrumentable diff lines for this file.
    pub fn total(&self) -> usize {
        self.covered_lines.len() + self.missed_lines.len()
    }
}

/// A line-range annotation for the GitHub Check Runs API.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub message: String,
}
