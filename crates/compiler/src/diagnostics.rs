//! Rewrites driver info logs so line numbers point into the unified file
//! instead of the derived per-stage source.
//!
//! Recognised line prefixes:
//!
//! - Mesa: `0:12(5): error: ...`
//! - NVIDIA: `0(12) : error C1008: ...`
//! - glslang, AMD and the naga backend: `ERROR: 0:12: ...`
use std::fmt;
use std::ops::Range;

use unified::StageBlock;

/// One line of a compiler log, with its line number already remapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Line in the unified file, when the log line carried one.
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Renders diagnostics one per line.
pub fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits `log` into diagnostics and remaps every embedded line number using
/// the header/body offsets recorded on `block`.
pub fn remap_log(log: &str, block: &StageBlock) -> Vec<Diagnostic> {
    remap_with(log, |line| block.original_line(line))
}

pub(crate) fn remap_with(log: &str, map: impl Fn(u32) -> u32) -> Vec<Diagnostic> {
    log.lines()
        .map(|line| line.trim_end_matches('\0').trim_end())
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let Some(span) = line_number_span(line) else {
                return Diagnostic {
                    line: None,
                    message: line.trim().to_string(),
                };
            };
            match line[span.clone()].parse::<u32>() {
                Ok(derived) => {
                    let original = map(derived);
                    Diagnostic {
                        line: Some(original),
                        message: format!(
                            "{}{}{}",
                            line[..span.start].trim_start(),
                            original,
                            &line[span.end..]
                        ),
                    }
                }
                Err(_) => Diagnostic {
                    line: None,
                    message: line.trim().to_string(),
                },
            }
        })
        .collect()
}

/// Byte range of the line number in a log line, if it has a known prefix.
fn line_number_span(line: &str) -> Option<Range<usize>> {
    let bytes = line.as_bytes();
    let mut at = line.len() - line.trim_start().len();

    for severity in ["ERROR:", "WARNING:", "error:", "warning:"] {
        if line[at..].starts_with(severity) {
            at += severity.len();
            while bytes.get(at) == Some(&b' ') {
                at += 1;
            }
            break;
        }
    }

    let string_end = digits_end(bytes, at)?;
    let number_start = string_end + 1;
    match bytes.get(string_end) {
        Some(b':') => {
            let number_end = digits_end(bytes, number_start)?;
            matches!(bytes.get(number_end), Some(b':') | Some(b'('))
                .then_some(number_start..number_end)
        }
        Some(b'(') => {
            let number_end = digits_end(bytes, number_start)?;
            (bytes.get(number_end) == Some(&b')')).then_some(number_start..number_end)
        }
        _ => None,
    }
}

fn digits_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut end = start;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    (end > start).then_some(end)
}
