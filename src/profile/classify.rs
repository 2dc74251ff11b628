//! Pure predicates over a single source line: executability, continuation,
//! and function-header detection, plus the name normalisation that both the
//! in-script detector and the function mapper must agree on (§9 of the
//! design: normalisation is syntactic and lives here, not duplicated).

use std::sync::LazyLock;

use regex::Regex;

/// Matches the case-sensitive abbreviations `fu|fun|func|funct|functi|
/// functio|function`, an optional `!`, then whitespace. The identifier
/// itself starts right after the match.
static FUNC_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*fu(?:n(?:c(?:t(?:i(?:o(?:n)?)?)?)?)?)?!?\s+").unwrap());

static SNR_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<SNR>\d+_").unwrap());

/// True iff, after removing leading whitespace, the line is neither empty,
/// nor a comment (first non-blank char `"`), nor a continuation (first
/// non-blank char `\`).
pub fn is_executable(text: &str) -> bool {
    match text.trim_start().chars().next() {
        None => false,
        Some(c) => c != '"' && c != '\\',
    }
}

/// If `text` is a continuation line (optional whitespace then a literal
/// `\`), returns the byte offset right after that backslash — i.e. where
/// the continued text begins. `None` if it isn't one.
pub fn continuation_prefix_len(text: &str) -> Option<usize> {
    let leading = text.len() - text.trim_start().len();
    if text[leading..].starts_with('\\') {
        Some(leading + 1)
    } else {
        None
    }
}

/// True iff `text` is a continuation line.
pub fn is_continuation(text: &str) -> bool {
    continuation_prefix_len(text).is_some()
}

/// A function header matched on a line: its normalised name plus whether
/// the raw name looked like a dict-member access (`.` in it), marking the
/// defining line as an anonymous-capable dict-function site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHeader {
    pub name: String,
    pub is_dict: bool,
}

/// Detects a function-definition header and returns its normalised name.
/// `None` if the line isn't one.
pub fn function_header(text: &str) -> Option<FunctionHeader> {
    let m = FUNC_HEADER_RE.find(text)?;
    let rest = &text[m.end()..];
    let raw = rest.split('(').next().unwrap_or("");
    if raw.is_empty() {
        return None;
    }
    let is_dict = raw.contains('.');
    Some(FunctionHeader {
        name: normalize_name(raw),
        is_dict,
    })
}

/// `<SID>` becomes `s:`; a leading `g:` is stripped; anything else passes
/// through unchanged.
pub fn normalize_name(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("<SID>") {
        format!("s:{rest}")
    } else if let Some(rest) = raw.strip_prefix("g:") {
        rest.to_string()
    } else {
        raw.to_string()
    }
}

/// Strips a `<SNR>N_` prefix and substitutes `s:`, the key form under which
/// script-local functions are indexed. Used when resolving a `FUNCTION`
/// stanza's reported name against a Script's name index.
pub fn strip_snr_prefix(name: &str) -> String {
    match SNR_PREFIX_RE.find(name) {
        Some(m) => format!("s:{}", &name[m.end()..]),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_skips_blank_comment_continuation() {
        assert!(!is_executable(""));
        assert!(!is_executable("   "));
        assert!(!is_executable("  \" a comment"));
        assert!(!is_executable("  \\ continued"));
        assert!(is_executable("  echo 1"));
    }

    #[test]
    fn continuation_detection() {
        assert!(is_continuation("\\ tail"));
        assert!(is_continuation("   \\ tail"));
        assert!(!is_continuation("echo 1"));
        assert_eq!(continuation_prefix_len("  \\ x"), Some(3));
    }

    #[test]
    fn header_abbreviations_all_match() {
        for kw in ["fu", "fun", "func", "funct", "functi", "functio", "function"] {
            let line = format!("{kw} Foo()");
            let header = function_header(&line).unwrap_or_else(|| panic!("{kw} should match"));
            assert_eq!(header.name, "Foo");
        }
    }

    #[test]
    fn header_with_bang_and_whitespace() {
        let header = function_header("  function! s:Bar(a, b)").unwrap();
        assert_eq!(header.name, "s:Bar");
        assert!(!header.is_dict);
    }

    #[test]
    fn header_dict_function_is_flagged() {
        let header = function_header("function! d.f()").unwrap();
        assert_eq!(header.name, "d.f");
        assert!(header.is_dict);
    }

    #[test]
    fn header_sid_and_g_prefix_normalisation() {
        assert_eq!(function_header("fu <SID>Baz()").unwrap().name, "s:Baz");
        assert_eq!(function_header("fu g:Qux()").unwrap().name, "Qux");
    }

    #[test]
    fn non_header_line_does_not_match() {
        assert!(function_header("let x = 1").is_none());
        assert!(function_header("echo function_name").is_none());
    }

    #[test]
    fn snr_prefix_stripped_to_script_local() {
        assert_eq!(strip_snr_prefix("<SNR>12_Foo"), "s:Foo");
        assert_eq!(strip_snr_prefix("Bar"), "Bar");
    }
}
