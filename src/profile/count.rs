//! Decodes the fixed-column count / total-time / self-time prefix that
//! precedes every profile data line.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CountFieldError {
    #[error("malformed count field: {0:?}")]
    Count(String),
    #[error("malformed total-time field: {0:?}")]
    TotalTime(String),
    #[error("malformed self-time field: {0:?}")]
    SelfTime(String),
}

/// `(count, total_time, self_time)` decoded from a data line's fixed-column
/// prefix. An empty count field (line shorter than the count column) yields
/// `(Some(0), None, None)` — the terminator case. A spaces-only count field
/// yields `count = None` (executed but unmeasured, typically a
/// continuation). Otherwise count parses as a non-negative integer; times
/// parse as finite non-negative decimals. Malformed fields are reported as
/// an error rather than panicking so the caller can log and skip the line.
pub fn parse_count_and_times(
    raw: &str,
) -> Result<(Option<u64>, Option<f64>, Option<f64>), CountFieldError> {
    // `get` rather than byte-index slicing: a column boundary may land
    // inside a multibyte char on malformed/fuzzed input, and slicing would
    // panic where `get` just yields `None` (treated as the field being
    // absent for that column).
    let field = |start: usize, end: usize| -> &str { raw.get(start..end).unwrap_or("") };

    let count_field = field(0, 5);
    if count_field.is_empty() {
        return Ok((Some(0), None, None));
    }
    let count = if count_field.chars().all(|c| c == ' ') {
        None
    } else {
        Some(
            count_field
                .trim()
                .parse::<u64>()
                .map_err(|_| CountFieldError::Count(count_field.to_string()))?,
        )
    };

    let total_field = field(8, 16);
    let total_time = if total_field.is_empty() || total_field.chars().all(|c| c == ' ') {
        None
    } else {
        Some(
            total_field
                .trim()
                .parse::<f64>()
                .map_err(|_| CountFieldError::TotalTime(total_field.to_string()))?,
        )
    };

    let self_field = field(19, 27);
    let self_time = if self_field.is_empty() || self_field.chars().all(|c| c == ' ') {
        None
    } else {
        Some(
            self_field
                .trim()
                .parse::<f64>()
                .map_err(|_| CountFieldError::SelfTime(self_field.to_string()))?,
        )
    };

    Ok((count, total_time, self_time))
}

/// Source text starts at this column on every data line (§6 of the format).
pub const SOURCE_TEXT_COLUMN: usize = 28;

/// Slices the source text out of a data line, tolerating lines shorter than
/// the fixed prefix, and a multibyte char straddling the column boundary
/// (an empty remainder rather than a panic) — same rationale as `field` in
/// `parse_count_and_times`.
pub fn source_text(raw: &str) -> &str {
    raw.get(SOURCE_TEXT_COLUMN..).unwrap_or("")
}
