//! A single sourced file's reconstructed line table, its discovered
//! function-name-to-line-numbers index, and the set of lines known to open
//! dict-style (anonymous-capable) function definitions.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{classify, Line};

#[derive(Debug, Clone)]
pub struct Script {
    pub path: String,
    pub lines: BTreeMap<u32, Line>,
    /// Line numbers at which a dict-style function (`function! d.f()`) is
    /// defined — candidates for anonymous-function resolution.
    pub dict_functions: HashSet<u32>,
    /// Dict-function sites already consumed by a mapping, so a repeated
    /// profile (or a second anonymous function at the same site) doesn't
    /// alias onto it again.
    pub mapped_dict_functions: HashSet<u32>,
    /// Declared function name -> line numbers where that name is defined.
    pub func_to_lnums: HashMap<String, Vec<u32>>,
    pub sourced_count: Option<u64>,
}

impl Script {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: BTreeMap::new(),
            dict_functions: HashSet::new(),
            mapped_dict_functions: HashSet::new(),
            func_to_lnums: HashMap::new(),
            sourced_count: None,
        }
    }

    /// Re-runs the function-header detector against `text` at `lnum`,
    /// recording any match in the name index (and the dict-function set, if
    /// it's a dict-style definition). Called both while parsing a script's
    /// own body and, during folding, against lines first revealed by a
    /// mapped Function's body.
    pub fn record_function_header(&mut self, lnum: u32, text: &str) {
        if let Some(header) = classify::function_header(text) {
            if header.is_dict {
                self.dict_functions.insert(lnum);
            }
            self.func_to_lnums.entry(header.name).or_default().push(lnum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_named_and_dict_headers() {
        let mut s = Script::new("/t/x.vim");
        s.record_function_header(3, "function! s:Foo()");
        s.record_function_header(9, "function! d.f()");

        assert_eq!(s.func_to_lnums.get("s:Foo"), Some(&vec![3]));
        assert!(s.dict_functions.contains(&9));
        assert!(s.func_to_lnums.contains_key("d.f"));
    }

    #[test]
    fn non_header_line_is_ignored() {
        let mut s = Script::new("/t/x.vim");
        s.record_function_header(1, "let x = 1");
        assert!(s.func_to_lnums.is_empty());
        assert!(s.dict_functions.is_empty());
    }
}
