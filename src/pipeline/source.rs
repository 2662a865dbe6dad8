//! Source preparation: turn a snippet into a compilable TeX document.

use crate::config::DocumentTemplate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Job name used for every file in a build's work directory.
pub const JOB_NAME: &str = "snippet";

/// Canonicalise line endings (CRLF and lone CR become LF).
///
/// This is the only normalisation applied before fingerprinting; whitespace
/// can be significant to TeX and is left untouched.
pub fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_DOCUMENTCLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\\documentclass\b").unwrap());

/// Whether `source` already declares its own document class.
pub fn is_complete_document(source: &str) -> bool {
    RE_DOCUMENTCLASS.is_match(source)
}

/// Build the `.tex` file contents for `source`.
///
/// When `template.wrap` is set and the source is not already a complete
/// document, it is wrapped in the template's class and preamble.
pub fn prepare_document(source: &str, template: &DocumentTemplate) -> String {
    let source = normalise_line_endings(source);
    if !template.wrap || is_complete_document(&source) {
        return ensure_trailing_newline(source);
    }

    let mut doc = String::with_capacity(source.len() + 128);
    doc.push_str("\\documentclass");
    if !template.class_options.is_empty() {
        doc.push('[');
        doc.push_str(&template.class_options.join(","));
        doc.push(']');
    }
    doc.push('{');
    doc.push_str(&template.class);
    doc.push_str("}\n");
    for line in &template.preamble {
        doc.push_str(line);
        doc.push('\n');
    }
    doc.push_str("\\begin{document}\n");
    doc.push_str(source.trim_end_matches('\n'));
    doc.push_str("\n\\end{document}\n");
    doc
}

fn ensure_trailing_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}
