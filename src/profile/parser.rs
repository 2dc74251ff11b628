//! Reads one profile report into a [`Profile`]: an ordered list of
//! [`Script`]s, a by-path index, and the Functions discovered during
//! parsing — then hands the Functions to [`super::mapper`] to be resolved
//! and folded in.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::LazyLock;

use anyhow::Result;
use log::warn;
use regex::Regex;

use super::count::{parse_count_and_times, source_text};
use super::function::{DeclaredSource, Function};
use super::mapper;
use super::script::Script;
use super::{classify, Line};

static SOURCED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Sourced (\d+) time").unwrap());

/// One parsed profile report: its Scripts (in encounter order), a by-path
/// index over them, and a memoisation cache for anonymous-function
/// resolutions, keyed by function name.
#[derive(Debug, Default)]
pub struct Profile {
    pub scripts: Vec<Script>,
    scripts_by_path: HashMap<String, usize>,
    pub(super) anon_cache: HashMap<String, (usize, u32)>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_index(&self, path: &str) -> Option<usize> {
        self.scripts_by_path.get(path).copied()
    }

    /// Parses one profile report from `reader` into a `Profile`, with every
    /// discovered Function already resolved and folded into its owning
    /// Script where possible. The only error this returns is a genuine
    /// failure reading the input stream; malformed data and unresolved
    /// functions are logged and recovered from per §7 of the core design.
    pub fn parse(reader: &mut dyn BufRead) -> Result<Self> {
        let mut profile = Profile::new();
        let pending = profile.parse_into(reader)?;
        mapper::map_functions(&mut profile, pending);
        Ok(profile)
    }

    fn parse_into(&mut self, reader: &mut dyn BufRead) -> Result<Vec<Function>> {
        let mut lines = LineReader::new(reader);
        let mut pending_functions = Vec::new();

        let mut state = State::Idle;
        let mut counter: u32 = 0;

        while let Some(raw) = lines.next_line()? {
            if raw.is_empty() {
                if let State::InFunction(f) = state {
                    pending_functions.push(f);
                }
                state = State::Idle;
                counter = 0;
                continue;
            }

            state = match state {
                State::Idle => self.handle_idle_line(&raw, &mut lines, &mut counter)?,
                State::InScript(idx) => {
                    counter += 1;
                    self.feed_script_line(idx, counter, &raw);
                    State::InScript(idx)
                }
                State::InFunction(mut f) => {
                    counter += 1;
                    feed_function_line(&mut f, counter, &raw);
                    State::InFunction(f)
                }
            };
        }

        if let State::InFunction(f) = state {
            pending_functions.push(f);
        }

        Ok(pending_functions)
    }

    fn handle_idle_line(
        &mut self,
        line: &str,
        lines: &mut LineReader,
        counter: &mut u32,
    ) -> Result<State> {
        if let Some(path) = line.strip_prefix("SCRIPT  ") {
            let mut script = Script::new(path.to_string());
            if let Some(sourced_line) = lines.next_line()? {
                script.sourced_count = SOURCED_RE
                    .captures(&sourced_line)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok());
            }
            self.skip_header_until_count(lines)?;

            let idx = self.scripts.len();
            self.scripts_by_path.insert(script.path.clone(), idx);
            self.scripts.push(script);
            *counter = 0;
            return Ok(State::InScript(idx));
        }

        if let Some(rest) = line.strip_prefix("FUNCTION  ") {
            let name = rest.strip_suffix("()").unwrap_or(rest);
            let mut f = Function::new(name);
            loop {
                let Some(header_line) = lines.next_line()? else {
                    break;
                };
                if header_line.starts_with("count") {
                    break;
                }
                if let Some(rest) = header_line.strip_prefix("    Defined:") {
                    if let Some(declared) = self.resolve_defined(rest.trim_start()) {
                        f.declared = Some(declared);
                    }
                }
            }
            *counter = 0;
            return Ok(State::InFunction(f));
        }

        Ok(State::Idle)
    }

    fn skip_header_until_count(&self, lines: &mut LineReader) -> Result<()> {
        loop {
            match lines.next_line()? {
                Some(ref l) if l.starts_with("count") => return Ok(()),
                Some(_) => continue,
                None => return Ok(()),
            }
        }
    }

    /// `Defined: <path>:<line>` or `Defined: <path> line <line>`. Splits on
    /// the last `:` if present, else the last ` line `, tilde-expands the
    /// path and looks it up in this Profile's by-path index.
    fn resolve_defined(&self, defined: &str) -> Option<DeclaredSource> {
        let (path_part, lnum_part) = if let Some(idx) = defined.rfind(':') {
            (&defined[..idx], &defined[idx + 1..])
        } else if let Some(idx) = defined.rfind(" line ") {
            (&defined[..idx], &defined[idx + " line ".len()..])
        } else {
            return None;
        };

        let lnum: u32 = lnum_part.trim().parse().ok()?;
        let expanded = tilde_expand(path_part.trim());
        match self.script_index(&expanded) {
            Some(idx) => Some(DeclaredSource {
                script_path: self.scripts[idx].path.clone(),
                line: lnum,
            }),
            None => {
                warn!("Defined: header names unknown script {expanded:?}");
                None
            }
        }
    }

    fn feed_script_line(&mut self, idx: usize, lnum: u32, raw: &str) {
        let (mut count, total_time, self_time) = match parse_count_and_times(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "malformed data line in script {:?} at line {lnum}: {e}",
                    self.scripts[idx].path
                );
                return;
            }
        };
        let text = source_text(raw).to_string();

        if count.is_none() && classify::is_continuation(&text) {
            count = self.scripts[idx]
                .lines
                .get(&(lnum.wrapping_sub(1)))
                .and_then(|l| l.count);
        }

        let should_check_header = count.map(|c| c > 0).unwrap_or(false) || lnum == 1;

        let script = &mut self.scripts[idx];
        script.lines.insert(
            lnum,
            Line {
                text: text.clone(),
                count,
                total_time,
                self_time,
            },
        );

        if should_check_header {
            script.record_function_header(lnum, &text);
        }
    }
}

fn feed_function_line(f: &mut Function, lnum: u32, raw: &str) {
    let (mut count, total_time, self_time) = match parse_count_and_times(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "malformed data line in function {:?} at line {lnum}: {e}",
                f.name
            );
            return;
        }
    };
    let text = source_text(raw).to_string();

    if count.is_none() && classify::is_executable(&text) {
        count = Some(0);
    }

    f.lines.insert(
        lnum,
        Line {
            text,
            count,
            total_time,
            self_time,
        },
    );
}

fn tilde_expand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    }
    path.to_string()
}

enum State {
    Idle,
    InScript(usize),
    InFunction(Function),
}

/// Physical-line reader over a `BufRead`, stripping the trailing newline so
/// callers see the same text a human reading the report would.
struct LineReader<'a> {
    reader: &'a mut dyn BufRead,
}

impl<'a> LineReader<'a> {
    fn new(reader: &'a mut dyn BufRead) -> Self {
        Self { reader }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn data_line(count: &str, text: &str) -> String {
        format!("{count:<5}   {:<8}   {:<8} {text}", "", "")
    }

    #[test]
    fn basic_script_only_profile() {
        let report = format!(
            "SCRIPT  /t/x.vim\nSourced 1 time\ncount  total (s)   self (s)\n{}\n",
            data_line("3", "echo 1")
        );
        let mut cursor = Cursor::new(report.into_bytes());
        let profile = Profile::parse(&mut cursor).unwrap();

        assert_eq!(profile.scripts.len(), 1);
        let script = &profile.scripts[0];
        assert_eq!(script.path, "/t/x.vim");
        assert_eq!(script.lines.len(), 1);
        assert_eq!(script.lines[&1].count, Some(3));
        assert_eq!(script.lines[&1].text, "echo 1");
    }

    #[test]
    fn script_with_named_function_and_defined_header() {
        let report = format!(
            "SCRIPT  /t/x.vim\nSourced 1 time\ncount  total (s)   self (s)\n{}\n{}\n\n\
             FUNCTION  s:Foo()\n    Defined: /t/x.vim:1\ncount  total (s)   self (s)\n{}\n",
            data_line("", "function! s:Foo()"),
            data_line("", "  let x = 1"),
            data_line("2", "  let x = 1"),
        );
        let mut cursor = Cursor::new(report.into_bytes());
        let profile = Profile::parse(&mut cursor).unwrap();

        let script = &profile.scripts[0];
        assert_eq!(script.lines[&2].count, Some(2));
        assert!(script.func_to_lnums.contains_key("s:Foo"));
    }

    #[test]
    fn continuation_lines_share_inherited_count() {
        let report = format!(
            "SCRIPT  /t/x.vim\nSourced 1 time\ncount  total (s)   self (s)\n{}\n{}\n",
            data_line("1", "    call f("),
            data_line("", "\\ 1, 2)"),
        );
        let mut cursor = Cursor::new(report.into_bytes());
        let profile = Profile::parse(&mut cursor).unwrap();

        let script = &profile.scripts[0];
        assert_eq!(script.lines[&1].count, Some(1));
        assert_eq!(script.lines[&2].count, Some(1));
    }

    #[test]
    fn script_lines_are_contiguous() {
        let report = format!(
            "SCRIPT  /t/x.vim\nSourced 1 time\ncount  total (s)   self (s)\n{}\n{}\n{}\n",
            data_line("1", "one"),
            data_line("", "two"),
            data_line("0", "three"),
        );
        let mut cursor = Cursor::new(report.into_bytes());
        let profile = Profile::parse(&mut cursor).unwrap();
        let script = &profile.scripts[0];
        let keys: Vec<u32> = script.lines.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
