//! Profile parser and function-to-script reconciler.
//!
//! Turns one or more Vim `:profile` reports into a coverage record: for
//! every sourced script, the set of lines executed at least once, with a
//! function's reported lines folded back into the script that defines it.
//!
//! Pipeline: [`parser::Profile::parse`] reads one report into a `Profile`
//! (a list of [`script::Script`] plus a list of pending
//! [`function::Function`]s), [`mapper`] resolves and folds each Function
//! into its owning Script, and [`merge::MergedProfile`] combines several
//! Profiles into the final [`merge::CoverageRecord`].

pub mod classify;
pub mod count;
pub mod function;
pub mod mapper;
pub mod merge;
pub mod parser;
pub mod script;

pub use merge::{CoverageRecord, MergedProfile, FILE_TRACER_TAG};
pub use parser::Profile;

/// A single reconstructed source line: text with the profile's fixed-width
/// prefix stripped, plus optional execution count and timings. `count` and
/// `total_time`/`self_time` accumulate monotonically as a Function's counts
/// are folded in and as Profiles are merged; they never decrease.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    pub text: String,
    pub count: Option<u64>,
    pub total_time: Option<f64>,
    pub self_time: Option<f64>,
}

/// Combine two optional counts: missing + missing = missing, one side
/// missing = the other side, both present = sum.
pub fn combine_count(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(x + y),
    }
}

/// Same combination rule as [`combine_count`] but for timings.
pub fn combine_time(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(x + y),
    }
}
