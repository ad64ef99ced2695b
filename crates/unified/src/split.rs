//! Splits a unified shader file into its shared header and one derived,
//! self-contained source per stage.
//!
//! The file layout is:
//!
//! ```text
//!   #version 410 core          ─┐
//!   uniform mat4 mvp;           │ shared header (copied into every stage)
//!                              ─┘
//!   #pragma vertex             ─┐
//!   @entry void vertex() {...}  │ stage block, entry renamed to `main`
//!   #pragma fragment           ─┤
//!   @entry void fragment() {}   │ stage block
//!                              ─┘
//! ```
//!
//! Scanning runs over a copy of the text with comments blanked out, so
//! pragmas and `@entry` annotations inside comments are ignored while byte
//! offsets and line numbers still line up with the original.
use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::source::ShaderSource;

/// Annotation that marks the entry function of a stage block.
pub const ENTRY_ANNOTATION: &str = "@entry";

/// Entry-point name the native GLSL compiler expects.
pub const ENTRY_POINT: &str = "main";

/// Standard GLSL pragmas that may be passed through when enabled.
const NATIVE_PRAGMAS: [&str; 3] = ["optimize", "debug", "STDGL"];

/// Programmable pipeline stage a block is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl StageKind {
    /// Every stage kind in pipeline order.
    pub const ALL: [StageKind; 6] = [
        StageKind::Vertex,
        StageKind::TessControl,
        StageKind::TessEval,
        StageKind::Geometry,
        StageKind::Fragment,
        StageKind::Compute,
    ];

    pub fn from_pragma(name: &str) -> Option<Self> {
        match name {
            "vertex" => Some(Self::Vertex),
            "tess_control" => Some(Self::TessControl),
            "tess_eval" => Some(Self::TessEval),
            "geometry" => Some(Self::Geometry),
            "fragment" => Some(Self::Fragment),
            "compute" => Some(Self::Compute),
            _ => None,
        }
    }

    pub fn pragma_name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessControl => "tess_control",
            Self::TessEval => "tess_eval",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    /// Vertex and fragment stages must be present in every file.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Vertex | Self::Fragment)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pragma_name())
    }
}

/// Inclusive, 1-based range of lines in the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn single(line: u32) -> Self {
        Self::new(line, line)
    }

    pub fn contains(&self, line: u32) -> bool {
        (self.start..=self.end).contains(&line)
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "line {}", self.start)
        } else {
            write!(f, "lines {}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("no `#version` directive before the first stage pragma")]
    MissingVersion,

    #[error("malformed {} ({lines}): {reason}", stage_label(.stage))]
    MalformedStage {
        stage: Option<StageKind>,
        lines: LineRange,
        reason: String,
    },

    #[error("incomplete program: missing {} stage", join_kinds(.missing))]
    IncompleteProgram { missing: Vec<StageKind> },
}

impl SplitError {
    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::MalformedStage { stage, .. } => *stage,
            _ => None,
        }
    }
}

fn stage_label(stage: &Option<StageKind>) -> String {
    match stage {
        Some(kind) => format!("{kind} stage"),
        None => "unified shader".to_string(),
    }
}

fn join_kinds(kinds: &[StageKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.pragma_name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Knobs for the splitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitOptions {
    /// Pass `#pragma optimize(..)`, `#pragma debug(..)` and `#pragma STDGL`
    /// through instead of rejecting them as unknown stage pragmas.
    pub native_pragmas: bool,
}

/// One stage of a unified file, ready to hand to the native compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBlock {
    kind: StageKind,
    source: String,
    entry: String,
    header_lines: u32,
    body: LineRange,
}

impl StageBlock {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Shared header, a newline, then the rewritten stage body.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name the entry function had before it was renamed to `main`.
    pub fn entry_name(&self) -> &str {
        &self.entry
    }

    /// Number of header lines that precede the body in [`Self::source`].
    pub fn header_lines(&self) -> u32 {
        self.header_lines
    }

    /// Original line number of the first body line.
    pub fn first_line(&self) -> u32 {
        self.body.start
    }

    /// Lines of the original file the body occupies.
    pub fn body_lines(&self) -> LineRange {
        self.body
    }

    pub fn body_line_count(&self) -> u32 {
        self.body.end - self.body.start + 1
    }

    pub fn is_required(&self) -> bool {
        self.kind.is_required()
    }

    /// Maps a 1-based line of the derived source back to the unified file.
    ///
    /// Header lines sit at the top of both texts and keep their number.
    pub fn original_line(&self, derived: u32) -> u32 {
        if derived <= self.header_lines {
            derived
        } else {
            derived - self.header_lines + self.body.start - 1
        }
    }
}

/// A unified file taken apart into header and stage blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitShader {
    name: String,
    header: String,
    version: String,
    stages: Vec<StageBlock>,
}

impl SplitShader {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text before the first stage pragma, verbatim.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// The `#version` line every derived source starts from.
    pub fn version_directive(&self) -> &str {
        &self.version
    }

    /// Stage blocks in file order.
    pub fn stages(&self) -> &[StageBlock] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageBlock> {
        self.stages.iter().find(|block| block.kind == kind)
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|block| block.kind).collect()
    }
}

/// Splits a loaded source. See [`split_text`].
pub fn split(source: &ShaderSource, options: &SplitOptions) -> Result<SplitShader, SplitError> {
    split_text(source.name(), source.text(), options)
}

/// Parses `text` into a shared header and per-stage derived sources.
///
/// Checks run in this order so the cheapest, most fundamental problem is the
/// one reported: missing mandatory stages, pragma structure (unknown or
/// duplicated pragmas), the `#version` directive, then each block's entry
/// annotation.
pub fn split_text(
    name: &str,
    text: &str,
    options: &SplitOptions,
) -> Result<SplitShader, SplitError> {
    let masked = mask_comments(text);
    let lines: Vec<&str> = text.lines().collect();
    let masked_lines: Vec<&str> = masked.lines().collect();

    let scan = scan_pragmas(&masked_lines, options);

    let present: HashSet<StageKind> = scan.markers.iter().map(|marker| marker.kind).collect();
    let missing: Vec<StageKind> = StageKind::ALL
        .into_iter()
        .filter(|kind| kind.is_required() && !present.contains(kind))
        .collect();
    if !missing.is_empty() {
        return Err(SplitError::IncompleteProgram { missing });
    }

    if let Some(problem) = scan.problem {
        return Err(problem);
    }

    let header_end = scan
        .markers
        .first()
        .map(|marker| marker.line)
        .unwrap_or(lines.len());
    let version = lines[..header_end]
        .iter()
        .zip(&masked_lines[..header_end])
        .find(|(_, masked)| is_version_directive(masked))
        .map(|(line, _)| line.trim().to_string())
        .ok_or(SplitError::MissingVersion)?;

    if let Some(index) = masked_lines[..header_end]
        .iter()
        .position(|line| !find_annotations(line).is_empty())
    {
        return Err(SplitError::MalformedStage {
            stage: None,
            lines: LineRange::single(index as u32 + 1),
            reason: format!("`{ENTRY_ANNOTATION}` is not allowed in the shared header"),
        });
    }

    let header = lines[..header_end].join("\n");
    let header_lines = header_end as u32;

    let mut stages = Vec::with_capacity(scan.markers.len());
    for (index, marker) in scan.markers.iter().enumerate() {
        let body_start = marker.line + 1;
        let body_end = scan
            .markers
            .get(index + 1)
            .map(|next| next.line)
            .unwrap_or(lines.len());
        let block_lines = LineRange::new(marker.line as u32 + 1, body_end as u32);

        let masked_body = masked_lines[body_start..body_end].join("\n");
        if masked_body.trim().is_empty() {
            return Err(SplitError::MalformedStage {
                stage: Some(marker.kind),
                lines: block_lines,
                reason: "stage body is empty; every stage needs an `@entry` function".into(),
            });
        }

        let body = lines[body_start..body_end].join("\n");
        let first_line = body_start as u32 + 1;
        let (rewritten, entry) = rewrite_entry(&body, &masked_body, first_line).map_err(
            |reason| SplitError::MalformedStage {
                stage: Some(marker.kind),
                lines: block_lines,
                reason,
            },
        )?;

        stages.push(StageBlock {
            kind: marker.kind,
            source: format!("{header}\n{rewritten}"),
            entry,
            header_lines,
            body: LineRange::new(first_line, body_end as u32),
        });
    }

    debug!(
        shader = name,
        stages = ?stages.iter().map(|block| block.kind).collect::<Vec<_>>(),
        header_lines,
        "split unified shader"
    );

    Ok(SplitShader {
        name: name.to_string(),
        header,
        version,
        stages,
    })
}

struct StageMarker {
    kind: StageKind,
    /// 0-based index of the pragma line.
    line: usize,
}

struct PragmaScan {
    markers: Vec<StageMarker>,
    /// First structural problem found, reported after the presence check.
    problem: Option<SplitError>,
}

fn scan_pragmas(masked_lines: &[&str], options: &SplitOptions) -> PragmaScan {
    let mut markers: Vec<StageMarker> = Vec::new();
    let mut problem = None;

    for (index, line) in masked_lines.iter().enumerate() {
        let Some(argument) = pragma_argument(line) else {
            continue;
        };
        let line_number = index as u32 + 1;

        if let Some(kind) = StageKind::from_pragma(argument) {
            if let Some(first) = markers.iter().find(|marker| marker.kind == kind) {
                problem.get_or_insert(SplitError::MalformedStage {
                    stage: Some(kind),
                    lines: LineRange::new(first.line as u32 + 1, line_number),
                    reason: format!(
                        "duplicate `#pragma {kind}` (first declared on line {})",
                        first.line + 1
                    ),
                });
                continue;
            }
            markers.push(StageMarker { kind, line: index });
            continue;
        }

        let leading = argument
            .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .next()
            .unwrap_or_default();
        if options.native_pragmas && NATIVE_PRAGMAS.contains(&leading) {
            continue;
        }

        problem.get_or_insert(SplitError::MalformedStage {
            stage: None,
            lines: LineRange::single(line_number),
            reason: format!("unknown pragma `{argument}`"),
        });
    }

    PragmaScan { markers, problem }
}

/// Returns the text after `#pragma` when `line` is a pragma directive.
fn pragma_argument(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("pragma")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn is_version_directive(line: &str) -> bool {
    line.trim_start()
        .strip_prefix('#')
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix("version"))
        .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

/// Byte offsets of every `@entry` token in `masked`.
fn find_annotations(masked: &str) -> Vec<usize> {
    masked
        .match_indices(ENTRY_ANNOTATION)
        .map(|(offset, _)| offset)
        .filter(|offset| {
            masked[offset + ENTRY_ANNOTATION.len()..]
                .chars()
                .next()
                .map_or(true, |next| !is_ident_char(next))
        })
        .collect()
}

/// Finds the single annotated entry in a block body and renames it.
///
/// The annotation is blanked with spaces so every other column on the line
/// keeps its position; only the function name changes length.
fn rewrite_entry(body: &str, masked: &str, first_line: u32) -> Result<(String, String), String> {
    let annotations = find_annotations(masked);
    let line_of = |offset: usize| first_line + masked[..offset].matches('\n').count() as u32;

    let at = match annotations.as_slice() {
        [] => return Err(format!("no `{ENTRY_ANNOTATION}` function in stage body")),
        [single] => *single,
        many => {
            let found = many
                .iter()
                .map(|offset| line_of(*offset).to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!(
                "found {} `{ENTRY_ANNOTATION}` functions (lines {found}); exactly one is allowed",
                many.len()
            ));
        }
    };

    let name = parse_entry_declaration(masked.as_bytes(), at + ENTRY_ANNOTATION.len())
        .map_err(|reason| format!("line {}: {reason}", line_of(at)))?;

    let mut rewritten = String::with_capacity(body.len());
    rewritten.push_str(&body[..at]);
    rewritten.push_str(&" ".repeat(ENTRY_ANNOTATION.len()));
    rewritten.push_str(&body[at + ENTRY_ANNOTATION.len()..name.start]);
    rewritten.push_str(ENTRY_POINT);
    rewritten.push_str(&body[name.end..]);

    Ok((rewritten, body[name].to_string()))
}

/// Matches `return_type name ( params ) {` after the annotation and returns
/// the byte span of `name`.
fn parse_entry_declaration(bytes: &[u8], from: usize) -> Result<std::ops::Range<usize>, String> {
    let start = skip_whitespace(bytes, from);
    let return_type = identifier(bytes, start)
        .ok_or_else(|| format!("`{ENTRY_ANNOTATION}` must be followed by a function declaration"))?;

    let start = skip_whitespace(bytes, return_type.end);
    let name = identifier(bytes, start)
        .ok_or_else(|| "expected the entry function name after its return type".to_string())?;

    let open = skip_whitespace(bytes, name.end);
    if bytes.get(open) != Some(&b'(') {
        return Err("expected `(` after the entry function name".into());
    }

    let mut depth = 0usize;
    let mut close = None;
    for (offset, byte) in bytes.iter().enumerate().skip(open) {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(offset);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close.ok_or_else(|| "unterminated entry function parameter list".to_string())?;

    let body = skip_whitespace(bytes, close + 1);
    if bytes.get(body) != Some(&b'{') {
        return Err("the entry function must have a body".into());
    }

    Ok(name)
}

fn skip_whitespace(bytes: &[u8], mut at: usize) -> usize {
    while bytes.get(at).is_some_and(|byte| byte.is_ascii_whitespace()) {
        at += 1;
    }
    at
}

fn identifier(bytes: &[u8], at: usize) -> Option<std::ops::Range<usize>> {
    let first = *bytes.get(at)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut end = at + 1;
    while bytes
        .get(end)
        .is_some_and(|byte| byte.is_ascii_alphanumeric() || *byte == b'_')
    {
        end += 1;
    }
    Some(at..end)
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Copies `text` with the contents of `//` and `/* */` comments replaced by
/// spaces. Line breaks survive, so line and byte positions are unchanged.
fn mask_comments(text: &str) -> String {
    enum State {
        Code,
        Line,
        Block,
    }

    fn blank(out: &mut String, ch: char) {
        if ch == '\n' || ch == '\r' {
            out.push(ch);
        } else {
            out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
        }
    }

    let mut masked = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut state = State::Code;

    while let Some(ch) = chars.next() {
        match state {
            State::Code => {
                if ch == '/' {
                    match chars.peek() {
                        Some('/') => {
                            chars.next();
                            masked.push_str("  ");
                            state = State::Line;
                            continue;
                        }
                        Some('*') => {
                            chars.next();
                            masked.push_str("  ");
                            state = State::Block;
                            continue;
                        }
                        _ => {}
                    }
                }
                masked.push(ch);
            }
            State::Line => {
                if ch == '\n' {
                    state = State::Code;
                }
                blank(&mut masked, ch);
            }
            State::Block => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    masked.push_str("  ");
                    state = State::Code;
                } else {
                    blank(&mut masked, ch);
                }
            }
        }
    }

    masked
}
