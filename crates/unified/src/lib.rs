//! Unified GLSL files: one text file carrying every stage of a program,
//! separated by `#pragma <stage>` lines, with each stage's entry function
//! marked `@entry`.
mod source;
mod split;

pub use source::{FileLoader, LoadError, MemoryLoader, ShaderSource, SourceLoader};
pub use split::{
    split, split_text, LineRange, SplitError, SplitOptions, SplitShader, StageBlock, StageKind,
    ENTRY_ANNOTATION, ENTRY_POINT,
};
