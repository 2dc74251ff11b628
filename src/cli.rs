//! Command handler functions for the covrs CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::ValueEnum;
use rusqlite::Connection;

use crate::{db, diff, report};

/// Output style for the `diff-coverage` command.
#[derive(Clone, ValueEnum)]
pub enum Style {
    Text,
    Markdown,
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Style::Text => f.write_str("text"),
            Style::Markdown => f.write_str("markdown"),
        }
    }
}

pub fn cmd_ingest(
    conn: &mut Connection,
    files: &[PathBuf],
    source_roots: &[PathBuf],
    name: Option<&str>,
    overwrite: bool,
) -> Result<String> {
    let (report_id, actual_name) =
        crate::ingest::ingest(conn, files, source_roots, name, overwrite)?;
    let file_list = files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "Ingested {file_list} → report id {report_id} (name: '{actual_name}')\n",
    ))
}

pub fn cmd_summary(conn: &Connection) -> Result<String> {
    let summary = db::get_summary(conn)?;

    let mut out = String::new();
    writeln!(out, "Files:      {}", summary.total_files).unwrap();
    writeln!(
        out,
        "Lines:      {}/{} ({:.1}%)",
        summary.covered_lines,
        summary.total_lines,
        summary.line_rate() * 100.0
    )
    .unwrap();
    Ok(out)
}

pub fn cmd_reports(conn: &Connection) -> Result<String> {
    let reports = db::list_reports(conn)?;
    if reports.is_empty() {
        return Ok("No reports in database.\n".to_string());
    }
    let mut out = String::new();
    writeln!(out, "{:<30} {:<15} CREATED", "NAME", "FORMAT").unwrap();
    writeln!(out, "{}", "-".repeat(70)).unwrap();
    for r in &reports {
        writeln!(out, "{:<30} {:<15} {}", r.name, r.format, r.created_at).unwrap();
    }
    Ok(out)
}

pub fn cmd_files(conn: &Connection, sort_by_coverage: bool) -> Result<String> {
    let mut files = db::get_file_summaries(conn)?;

    if sort_by_coverage {
        files.sort_by(|a, b| a.line_rate().total_cmp(&b.line_rate()));
    }

    let mut out = String::new();
    writeln!(
        out,
        "{:<60} {:>8} {:>8} {:>8}",
        "FILE", "LINES", "COVERED", "RATE"
    )
    .unwrap();
    writeln!(out, "{}", "-".repeat(88)).unwrap();

    for f in &files {
        writeln!(
            out,
            "{:<60} {:>8} {:>8} {:>7.1}%",
            f.path,
            f.total_lines,
            f.covered_lines,
            f.line_rate() * 100.0
        )
        .unwrap();
    }

    Ok(out)
}

pub fn cmd_lines(conn: &Connection, source_file: &str, uncovered: bool) -> Result<String> {
    let lines = db::get_lines(conn, source_file)?;

    if uncovered {
        let uncovered_lines: Vec<_> = lines.iter().filter(|l| l.hit_count == 0).collect();

        if uncovered_lines.is_empty() {
            return Ok(format!(
                "All instrumentable lines are covered in '{}'\n",
                source_file
            ));
        }

        let mut out = String::new();
        writeln!(out, "Uncovered lines in '{}':", source_file).unwrap();
        let uncovered_numbers: Vec<u32> = uncovered_lines.iter().map(|l| l.line_number).collect();
        writeln!(out, "  {}", report::format_line_ranges(&uncovered_numbers)).unwrap();
        writeln!(out, "  ({} lines)", uncovered_lines.len()).unwrap();
        Ok(out)
    } else {
        if lines.is_empty() {
            return Ok(format!("No coverage data for '{}'\n", source_file));
        }

        let mut out = String::new();
        writeln!(out, "{:>6}  {:>10}", "LINE", "HITS").unwrap();
        writeln!(out, "{}", "-".repeat(18)).unwrap();
        for line in &lines {
            let marker = if line.hit_count > 0 { "✓" } else { "✗" };
            writeln!(
                out,
                "{:>6}  {:>10}  {}",
                line.line_number, line.hit_count, marker
            )
            .unwrap();
        }
        Ok(out)
    }
}

/// Core diff-coverage logic. Accepts the diff text directly so callers can
/// obtain it from stdin, `git diff`, or the GitHub API.
pub fn cmd_diff_coverage(
    conn: &Connection,
    diff_text: &str,
    path_prefix: Option<&str>,
    style: &Style,
    sha: Option<String>,
) -> Result<String> {
    let mut diff_lines = diff::parse_diff(diff_text);

    if let Some(prefix) = path_prefix {
        diff_lines = diff::apply_path_prefix(diff_lines, prefix);
    }

    let report = report::build_report(conn, &diff_lines, sha)?;

    let output = match style {
        Style::Text => report.format_text(),
        Style::Markdown => report.format_markdown(),
    };

    Ok(output)
}
