//! Combines several parsed [`Profile`]s into a single per-script line-count
//! table, applies the first-line workaround, filters by source root, and
//! produces the final coverage record.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use walkdir::WalkDir;

use super::{classify, combine_count, combine_time, parser::Profile, Line};

/// Tag recorded against every file in a coverage record, so the downstream
/// coverage tool treats these files as covered by this plugin rather than
/// ignoring them as non-instrumented.
pub const FILE_TRACER_TAG: &str = "covrs.CoveragePlugin";

/// The logical output: per absolute file path, the set of line numbers
/// executed at least once, plus a per-file tracer tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageRecord {
    pub files: BTreeMap<String, BTreeSet<u32>>,
    pub file_tracers: BTreeMap<String, String>,
}

/// A set of Profiles, an optional list of authoritative source roots, and
/// an optional path to an existing coverage database to extend. The
/// coverage record is memoised and invalidated whenever a profile is added.
pub struct MergedProfile {
    profiles: Vec<Profile>,
    pub source: Vec<PathBuf>,
    pub append_to: Option<PathBuf>,
    cached_record: Option<CoverageRecord>,
}

impl Default for MergedProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl MergedProfile {
    pub fn new() -> Self {
        Self {
            profiles: Vec::new(),
            source: Vec::new(),
            append_to: None,
            cached_record: None,
        }
    }

    pub fn with_source_roots(source: Vec<PathBuf>) -> Self {
        Self {
            source,
            ..Self::new()
        }
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn push_profile(&mut self, profile: Profile) {
        self.profiles.push(profile);
        self.cached_record = None;
    }

    /// Parses each of `paths` into a Profile and adds it. The only error
    /// this surfaces is a genuine I/O failure; malformed data within a
    /// report is logged and recovered from by the parser itself.
    pub fn add_profile_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            debug!("parsing profile report {}", path.display());
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open profile report {}", path.display()))?;
            let mut reader = std::io::BufReader::new(file);
            let profile = Profile::parse(&mut reader)
                .with_context(|| format!("failed to parse profile report {}", path.display()))?;
            self.push_profile(profile);
        }
        Ok(())
    }

    /// Step 1-2: the per-path, per-line merged table, with the first-line
    /// workaround applied. Exposed separately from [`Self::coverage_record`]
    /// so tests can assert on exact summed counts, not just booleanized
    /// coverage.
    pub fn merged_lines(&self) -> BTreeMap<String, BTreeMap<u32, Line>> {
        let mut merged: BTreeMap<String, BTreeMap<u32, Line>> = BTreeMap::new();

        for profile in &self.profiles {
            for script in &profile.scripts {
                let entry = merged.entry(script.path.clone()).or_default();
                for (&lnum, line) in &script.lines {
                    entry
                        .entry(lnum)
                        .and_modify(|existing| {
                            existing.count = combine_count(existing.count, line.count);
                            existing.total_time = combine_time(existing.total_time, line.total_time);
                            existing.self_time = combine_time(existing.self_time, line.self_time);
                        })
                        .or_insert_with(|| line.clone());
                }

                if let Some(sourced) = script.sourced_count {
                    if sourced > 0 {
                        if let Some(line1) = entry.get_mut(&1) {
                            if line1.count.unwrap_or(0) == 0 && classify::is_executable(&line1.text)
                            {
                                line1.count = Some(1);
                            }
                        }
                    }
                }
            }
        }

        merged
    }

    fn compute_record(&self) -> CoverageRecord {
        let merged = self.merged_lines();
        let mut record = CoverageRecord::default();

        if self.source.is_empty() {
            for (path, lines) in merged {
                let abs_path = to_absolute(&path);
                let covered = covered_lines(&lines);
                record.files.insert(abs_path.clone(), covered);
                record.file_tracers.insert(abs_path, FILE_TRACER_TAG.to_string());
            }
            return record;
        }

        let source_files = discover_source_files(&self.source);
        debug!("{} executable files under configured source roots", source_files.len());

        for (path, lines) in merged {
            let abs_path = to_absolute(&path);
            if !source_files.contains(&abs_path) {
                info!("Ignoring non-source: {abs_path}");
                continue;
            }
            let covered = covered_lines(&lines);
            record.files.insert(abs_path.clone(), covered);
            record.file_tracers.insert(abs_path, FILE_TRACER_TAG.to_string());
        }

        for path in &source_files {
            record.files.entry(path.clone()).or_default();
            record
                .file_tracers
                .entry(path.clone())
                .or_insert_with(|| FILE_TRACER_TAG.to_string());
        }

        record
    }

    /// The merged coverage record, built on first access and recomputed
    /// after the cache is invalidated by [`Self::push_profile`].
    pub fn coverage_record(&mut self) -> &CoverageRecord {
        if self.cached_record.is_none() {
            self.cached_record = Some(self.compute_record());
        }
        self.cached_record.as_ref().unwrap()
    }
}

fn covered_lines(lines: &BTreeMap<u32, Line>) -> BTreeSet<u32> {
    lines
        .iter()
        .filter(|(_, line)| line.count.unwrap_or(0) > 0)
        .map(|(&lnum, _)| lnum)
        .collect()
}

fn to_absolute(path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_string_lossy().into_owned();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(p).to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Union of each root's explicit file (if it names a file directly) and the
/// executable files discovered by walking it (if it names a directory).
///
/// Normalised the same way as merged script paths (`to_absolute`, not
/// `canonicalize`): a profiled file genuinely under a symlinked source
/// root must still compare equal against its entry here, and
/// `canonicalize` would resolve the symlink on one side only.
fn discover_source_files(roots: &[PathBuf]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for root in roots {
        let abs_root = to_absolute(&root.to_string_lossy());
        let root_path = Path::new(&abs_root);
        if root_path.is_file() {
            found.insert(abs_root);
        } else if root_path.is_dir() {
            for entry in WalkDir::new(root_path).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() && looks_like_source(entry.path()) {
                    found.insert(to_absolute(&entry.path().to_string_lossy()));
                }
            }
        }
    }
    found
}

fn looks_like_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("vim"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::script::Script;
    use std::io::Cursor;

    fn profile_with_line(path: &str, lnum: u32, count: u64) -> Profile {
        let mut profile = Profile::new();
        let mut script = Script::new(path);
        script.lines.insert(
            lnum,
            Line {
                text: format!("line {lnum}"),
                count: Some(count),
                total_time: None,
                self_time: None,
            },
        );
        profile.scripts.push(script);
        profile
    }

    #[test]
    fn merging_two_profiles_sums_counts() {
        let mut merged = MergedProfile::new();

        let mut a = Profile::new();
        let mut script_a = Script::new("/t/x.vim");
        script_a.lines.insert(
            10,
            Line {
                text: "echo a".to_string(),
                count: Some(2),
                total_time: None,
                self_time: None,
            },
        );
        a.scripts.push(script_a);
        merged.push_profile(a);

        let mut b = Profile::new();
        let mut script_b = Script::new("/t/x.vim");
        script_b.lines.insert(
            10,
            Line {
                text: "echo a".to_string(),
                count: Some(3),
                total_time: None,
                self_time: None,
            },
        );
        script_b.lines.insert(
            11,
            Line {
                text: "echo b".to_string(),
                count: Some(1),
                total_time: None,
                self_time: None,
            },
        );
        b.scripts.push(script_b);
        merged.push_profile(b);

        let lines = merged.merged_lines();
        let x = &lines["/t/x.vim"];
        assert_eq!(x[&10].count, Some(5));
        assert_eq!(x[&11].count, Some(1));

        let record = merged.coverage_record();
        let covered = &record.files["/t/x.vim"];
        assert_eq!(covered, &BTreeSet::from([10, 11]));
    }

    #[test]
    fn empty_merge_yields_empty_record() {
        let mut merged = MergedProfile::new();
        assert!(merged.coverage_record().files.is_empty());
    }

    #[test]
    fn merge_is_commutative_on_profile_order() {
        let a = profile_with_line("/t/x.vim", 10, 2);
        let b = profile_with_line("/t/x.vim", 10, 3);

        let mut ab = MergedProfile::new();
        ab.push_profile(profile_with_line("/t/x.vim", 10, 2));
        ab.push_profile(profile_with_line("/t/x.vim", 10, 3));

        let mut ba = MergedProfile::new();
        ba.push_profile(b);
        ba.push_profile(a);

        assert_eq!(
            ab.merged_lines()["/t/x.vim"][&10].count,
            ba.merged_lines()["/t/x.vim"][&10].count
        );
    }

    #[test]
    fn first_line_workaround_fires_when_sourced_and_uncounted() {
        let mut merged = MergedProfile::new();
        let mut profile = Profile::new();
        let mut script = Script::new("/t/x.vim");
        script.sourced_count = Some(1);
        script.lines.insert(
            1,
            Line {
                text: "let y = 0".to_string(),
                count: None,
                total_time: None,
                self_time: None,
            },
        );
        script.lines.insert(
            2,
            Line {
                text: "let x = 1".to_string(),
                count: Some(1),
                total_time: None,
                self_time: None,
            },
        );
        profile.scripts.push(script);
        merged.push_profile(profile);

        let record = merged.coverage_record();
        assert_eq!(record.files["/t/x.vim"], BTreeSet::from([1, 2]));
    }

    #[test]
    fn first_line_workaround_does_not_fire_when_not_sourced() {
        let mut merged = MergedProfile::new();
        let mut profile = Profile::new();
        let mut script = Script::new("/t/x.vim");
        script.sourced_count = Some(0);
        script.lines.insert(
            1,
            Line {
                text: "let y = 0".to_string(),
                count: None,
                total_time: None,
                self_time: None,
            },
        );
        profile.scripts.push(script);
        merged.push_profile(profile);

        let record = merged.coverage_record();
        assert!(record.files["/t/x.vim"].is_empty());
    }

    #[test]
    fn basic_script_only_end_to_end() {
        // count[0,5) + 3-col gap + total[8,16) + 3-col gap + self[19,27) + 1-col gap + text
        let data_line = format!("{:<5}   {:<8}   {:<8} {}", "3", "", "", "echo 1");
        let report = format!(
            "SCRIPT  /t/x.vim\nSourced 1 time\ncount  total (s)   self (s)\n{data_line}\n"
        );
        let mut cursor = Cursor::new(report.as_bytes());
        let profile = Profile::parse(&mut cursor).unwrap();

        let mut merged = MergedProfile::new();
        merged.push_profile(profile);
        let record = merged.coverage_record();
        assert_eq!(record.files["/t/x.vim"], BTreeSet::from([1]));
        assert_eq!(record.file_tracers["/t/x.vim"], FILE_TRACER_TAG);
    }

    #[test]
    fn source_filtering_drops_paths_outside_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let src_root = tmp.path().join("src");
        std::fs::create_dir_all(&src_root).unwrap();
        let keep = src_root.join("keep.vim");
        std::fs::write(&keep, "\" empty\n").unwrap();

        let mut merged = MergedProfile::with_source_roots(vec![src_root.clone()]);
        merged.push_profile(profile_with_line("/tmp/y.vim", 2, 1));

        let record = merged.coverage_record();
        assert!(!record.files.contains_key("/tmp/y.vim"));
        // Non-canonical: `keep` is already absolute (tempdir roots are),
        // and normalisation must not resolve symlinks on either side.
        let keep_abs = keep.to_string_lossy().into_owned();
        assert!(record.files.contains_key(&keep_abs));
        assert!(record.files[&keep_abs].is_empty());
    }
}
