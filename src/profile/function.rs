//! A function's body as captured from a `FUNCTION` stanza: its name,
//! optional declared source location, and an own line table numbered from
//! 1 at the function's first body line.

use std::collections::BTreeMap;

use super::Line;

/// A `Defined: <path>:<line>` header, resolved against the Profile's
/// by-path Script index at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSource {
    pub script_path: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub declared: Option<DeclaredSource>,
    pub lines: BTreeMap<u32, Line>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: None,
            lines: BTreeMap::new(),
        }
    }

    /// A purely decimal name denotes an anonymous dict function — the
    /// profiler never learns its source-level name, only a numeric handle.
    pub fn is_anonymous(&self) -> bool {
        !self.name.is_empty() && self.name.bytes().all(|b| b.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_name_is_anonymous() {
        assert!(Function::new("17").is_anonymous());
        assert!(!Function::new("s:Foo").is_anonymous());
        assert!(!Function::new("").is_anonymous());
    }
}
